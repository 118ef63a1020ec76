//! `remember`: create a new memory, or update an existing one by slug.
//! Optionally attaches a free-form annotation and/or marks another memory
//! as superseded in the same call.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;

use crate::errors::CairnError;
use crate::locker::Bound;
use crate::markdown::{self, Header, HeaderAnnotation, HeaderAssociation, MemoryDoc};
use crate::organizer::{self, PlacementInput};
use crate::services::connect_service;
use crate::services::{require_found, with_lock, MemoryService};
use crate::types::{
    Annotation, AnnotationType, Association, AssociationType, Memory, Slug, Strength, Tag, Title,
};

const UPDATE_RETRY_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Default)]
pub struct RememberRequest {
    /// When set, updates the existing memory instead of creating a new one.
    pub slug: Option<String>,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    /// Overrides the derived `category`/date folder entirely.
    pub path: Option<String>,
    /// Free-form text attached as an annotation, typed automatically.
    pub note: Option<String>,
    /// Slug of a memory this one replaces.
    pub supersedes: Option<String>,
    /// Slugs to auto-connect to (as `related_to`) once the memory exists.
    /// A target that doesn't exist is reported in
    /// `RememberOutcome::failed_connections` rather than failing the call.
    pub connections: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RememberOutcome {
    pub slug: Slug,
    pub created: bool,
    pub commit: String,
    pub annotation_commit: Option<String>,
    pub supersede_commit: Option<String>,
    pub failed_connections: Vec<String>,
}

pub async fn remember(
    service: &MemoryService,
    holder: &str,
    request: RememberRequest,
) -> Result<RememberOutcome> {
    let title = Title::new(&request.title)?;
    let tags: Vec<Tag> = request
        .tags
        .iter()
        .map(Tag::new)
        .collect::<Result<_>>()?;

    let (slug, created) = match &request.slug {
        Some(raw) => (Slug::new(raw)?, false),
        None => (Slug::new(markdown::generate_slug(&request.title, None))?, true),
    };

    let commit = with_lock(service, &slug, holder, || async {
        if created {
            create(service, &slug, title.clone(), tags.clone(), &request).await
        } else {
            update(service, &slug, title.clone(), tags.clone(), &request).await
        }
    })
    .await?;

    let annotation_commit = match &request.note {
        Some(note) => Some(annotate(service, &slug, holder, note).await?),
        None => None,
    };

    let supersede_commit = match &request.supersedes {
        Some(old_raw) => Some(supersede(service, &slug, old_raw, holder).await?),
        None => None,
    };

    let failed_connections = connect_requested(service, holder, &slug, &request.connections).await;

    Ok(RememberOutcome {
        slug,
        created,
        commit,
        annotation_commit,
        supersede_commit,
        failed_connections,
    })
}

/// Auto-connect the just-created-or-updated memory to every slug in
/// `connections` as a `related_to` edge. A target that doesn't exist is
/// collected and returned rather than failing the whole call.
async fn connect_requested(
    service: &MemoryService,
    holder: &str,
    slug: &Slug,
    connections: &[String],
) -> Vec<String> {
    let mut failed = Vec::new();
    for target in connections {
        let outcome = connect_service::connect(
            service,
            holder,
            slug.as_str(),
            target,
            "related_to",
            None,
        )
        .await;
        if outcome.is_err() {
            failed.push(target.clone());
        }
    }
    failed
}

/// Path for a new memory: `request.path`, treated as a folder and joined
/// with `<slug>.md`, overrides the Organizer's category/tag derivation
/// entirely when given.
fn resolved_file_path(
    slug: &Slug,
    created: chrono::DateTime<Utc>,
    request: &RememberRequest,
    tags: &[Tag],
) -> String {
    match request.path.as_deref().map(str::trim_end_matches('/')) {
        Some(folder) if !folder.is_empty() => format!("{folder}/{slug}.md"),
        Some(_) => format!("{slug}.md"),
        None => {
            let placement = PlacementInput {
                category: request.category.as_deref(),
                tags,
            };
            organizer::canonical_path(slug, created, &placement)
        }
    }
}

async fn create(
    service: &MemoryService,
    slug: &Slug,
    title: Title,
    tags: Vec<Tag>,
    request: &RememberRequest,
) -> Result<String> {
    let now = Utc::now();
    let file_path = resolved_file_path(slug, now, request, &tags);

    let doc = MemoryDoc {
        header: Header {
            id: Some(slug.as_str().to_string()),
            title: title.as_str().to_string(),
            tags: tags.iter().map(|t| t.as_str().to_string()).collect(),
            created: now,
            updated: now,
            superseded_by: None,
            associations: Vec::new(),
            annotations: Vec::new(),
        },
        body: request.content.clone(),
    };
    let text = markdown::emit(&doc)?;
    let content_hash = markdown::sha256_hex(&text);

    let memory = Memory {
        slug: slug.clone(),
        title,
        tags,
        created: now,
        updated: now,
        content: request.content.clone(),
        file_path: file_path.clone(),
        content_hash,
        version: 1,
        superseded_by: None,
        access_count: 0,
        last_accessed_at: None,
        deleted_at: None,
        annotations: Vec::new(),
    };

    service.write_file(&file_path, &text)?;
    let commit = service.commit(
        &[file_path],
        &format!("feat: Create memory '{slug}'"),
    )?;
    service.index.create_memory(&memory).await?;

    Ok(commit)
}

async fn update(
    service: &MemoryService,
    slug: &Slug,
    title: Title,
    tags: Vec<Tag>,
    request: &RememberRequest,
) -> Result<String> {
    let existing = require_found(
        service.index.by_slug_unscoped(slug).await?,
        format!("memory '{slug}'"),
    )?;
    if existing.deleted_at.is_some() {
        return Err(CairnError::archived(format!(
            "memory '{slug}' is archived; restore it before updating"
        ))
        .into());
    }

    let now = Utc::now();
    let doc = MemoryDoc {
        header: Header {
            id: Some(slug.as_str().to_string()),
            title: title.as_str().to_string(),
            tags: tags.iter().map(|t| t.as_str().to_string()).collect(),
            created: existing.created,
            updated: now,
            superseded_by: existing.superseded_by.as_ref().map(|s| s.to_string()),
            associations: existing_associations(service, slug).await?,
            annotations: existing
                .annotations
                .iter()
                .map(annotation_to_header)
                .collect(),
        },
        body: request.content.clone(),
    };
    let text = markdown::emit(&doc)?;
    let content_hash = markdown::sha256_hex(&text);

    service.write_file(&existing.file_path, &text)?;
    let commit = service.commit(
        &[existing.file_path.clone()],
        &format!("update: Modify memory '{slug}'"),
    )?;

    let title_str = title.as_str().to_string();
    let updated_str = now.to_rfc3339();
    service
        .locker
        .retry_with_backoff(UPDATE_RETRY_ATTEMPTS, || {
            let title_str = title_str.clone();
            let content_hash = content_hash.clone();
            let updated_str = updated_str.clone();
            async move {
                let current = require_found(
                    service.index.by_slug_unscoped(slug).await?,
                    format!("memory '{slug}'"),
                )?;
                let mut updates = BTreeMap::new();
                updates.insert("title", Bound::Text(title_str));
                updates.insert("content_hash", Bound::Text(content_hash));
                updates.insert("updated", Bound::Text(updated_str));
                service
                    .locker
                    .update_with_version(slug, current.version, updates)
                    .await?;
                Ok(())
            }
        })
        .await?;
    service.index.set_tags(slug, &tags).await?;

    Ok(commit)
}

async fn existing_associations(
    service: &MemoryService,
    slug: &Slug,
) -> Result<Vec<HeaderAssociation>> {
    let edges = service.index.associations_by_source(slug).await?;
    Ok(edges
        .into_iter()
        .map(|a| HeaderAssociation {
            target: a.target.to_string(),
            association_type: a.association_type.as_str().to_string(),
            strength: a.strength.get(),
        })
        .collect())
}

fn annotation_to_header(a: &Annotation) -> HeaderAnnotation {
    HeaderAnnotation {
        annotation_type: a.annotation_type.as_str().to_string(),
        content: a.content.clone(),
        created_at: a.created_at,
    }
}

async fn annotate(service: &MemoryService, slug: &Slug, holder: &str, note: &str) -> Result<String> {
    with_lock(service, slug, holder, || async {
        let memory = require_found(
            service.index.by_slug(slug).await?,
            format!("memory '{slug}'"),
        )?;

        let annotation_type = AnnotationType::infer(note);
        let annotation = Annotation {
            annotation_type,
            content: note.to_string(),
            created_at: Utc::now(),
        };

        let mut header_annotations: Vec<HeaderAnnotation> =
            memory.annotations.iter().map(annotation_to_header).collect();
        header_annotations.push(annotation_to_header(&annotation));

        let body = markdown::parse(&service.read_file(&memory.file_path)?)?.body;
        let doc = MemoryDoc {
            header: Header {
                id: Some(slug.as_str().to_string()),
                title: memory.title.as_str().to_string(),
                tags: memory.tags.iter().map(|t| t.as_str().to_string()).collect(),
                created: memory.created,
                updated: memory.updated,
                superseded_by: memory.superseded_by.as_ref().map(|s| s.to_string()),
                associations: existing_associations(service, slug).await?,
                annotations: header_annotations,
            },
            body,
        };
        let text = markdown::emit(&doc)?;

        service.write_file(&memory.file_path, &text)?;
        let commit = service.commit(
            &[memory.file_path.clone()],
            &format!("annotate: Add {annotation_type} to '{slug}'"),
        )?;
        service.index.insert_annotation(slug, &annotation).await?;

        Ok(commit)
    })
    .await
}

async fn supersede(
    service: &MemoryService,
    new_slug: &Slug,
    old_raw: &str,
    holder: &str,
) -> Result<String> {
    let old_slug = Slug::new(old_raw)?;

    with_lock(service, &old_slug, holder, || async {
        let old = require_found(
            service.index.by_slug(&old_slug).await?,
            format!("memory '{old_slug}'"),
        )?;

        let now = Utc::now();
        let body = markdown::parse(&service.read_file(&old.file_path)?)?.body;
        let doc = MemoryDoc {
            header: Header {
                id: Some(old_slug.as_str().to_string()),
                title: old.title.as_str().to_string(),
                tags: old.tags.iter().map(|t| t.as_str().to_string()).collect(),
                created: old.created,
                updated: now,
                superseded_by: Some(new_slug.to_string()),
                associations: existing_associations(service, &old_slug).await?,
                annotations: old.annotations.iter().map(annotation_to_header).collect(),
            },
            body,
        };
        let text = markdown::emit(&doc)?;

        service.write_file(&old.file_path, &text)?;
        let commit = service.commit(
            &[old.file_path.clone()],
            &format!("supersede: '{old_slug}' replaced by '{new_slug}'"),
        )?;

        let mut updates = BTreeMap::new();
        updates.insert("superseded_by", Bound::OptText(Some(new_slug.to_string())));
        updates.insert("updated", Bound::Text(now.to_rfc3339()));
        service
            .locker
            .update_with_version(&old_slug, old.version, updates)
            .await?;
        service
            .index
            .upsert_association(&Association {
                source: new_slug.clone(),
                target: old_slug.clone(),
                association_type: AssociationType::Supersedes,
                strength: Strength::default(),
            })
            .await?;

        Ok(commit)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use tempfile::TempDir;

    async fn service() -> (MemoryService, TempDir) {
        let dir = TempDir::new().unwrap();
        #[cfg(feature = "git-integration")]
        crate::git::Repository::init(dir.path()).unwrap();
        let index = Index::open(dir.path()).await.unwrap();
        (
            MemoryService::new(index, dir.path(), "tester", "tester@localhost"),
            dir,
        )
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn path_override_replaces_derived_placement() {
        let (service, _dir) = service().await;

        let outcome = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Standup Notes".to_string(),
                content: "Body".to_string(),
                category: Some("engineering".to_string()),
                path: Some("inbox".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let memory = service.index.by_slug(&outcome.slug).await.unwrap().unwrap();
        assert_eq!(memory.file_path, format!("inbox/{}.md", outcome.slug));
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn connections_auto_connect_and_report_failures() {
        let (service, _dir) = service().await;

        let a = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Node A".to_string(),
                content: "Body A".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let outcome = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Node B".to_string(),
                content: "Body B".to_string(),
                connections: vec![a.slug.as_str().to_string(), "ghost-slug".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.failed_connections, vec!["ghost-slug".to_string()]);
        let forward = service.index.associations_by_source(&outcome.slug).await.unwrap();
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].target, a.slug);
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn updating_an_archived_memory_is_refused() {
        let (service, _dir) = service().await;

        let outcome = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Scratch".to_string(),
                content: "Body".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        crate::services::lifecycle_service::forget(&service, "tester", outcome.slug.as_str())
            .await
            .unwrap();

        let err = remember(
            &service,
            "tester",
            RememberRequest {
                slug: Some(outcome.slug.as_str().to_string()),
                title: "Scratch".to_string(),
                content: "Edited body".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CairnError>(),
            Some(CairnError::Archived { .. })
        ));
    }
}
