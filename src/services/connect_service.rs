//! `connect`/`disconnect`: create or remove a typed association between two
//! memories. Non-directional types (`related_to`, `references`,
//! `related_project`, `person`) get the reverse edge written automatically
//! so either memory's header lists the link; directional types only touch
//! the source's header.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;

use crate::locker::Bound;
use crate::markdown::{self, Header, HeaderAssociation, MemoryDoc};
use crate::services::{require_found, MemoryService};
use crate::types::{Association, AssociationType, Slug, Strength};

#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub commit: String,
}

pub async fn connect(
    service: &MemoryService,
    holder: &str,
    source: &str,
    target: &str,
    association_type: &str,
    strength: Option<f64>,
) -> Result<ConnectOutcome> {
    let source_slug = Slug::new(source)?;
    let target_slug = Slug::new(target)?;
    let association_type = AssociationType::parse(association_type)?;
    let strength = Strength::new(strength.unwrap_or(Strength::DEFAULT.get()))?;

    with_pair_lock(service, holder, &source_slug, &target_slug, || {
        do_connect(service, &source_slug, &target_slug, association_type, strength)
    })
    .await
}

pub async fn disconnect(
    service: &MemoryService,
    holder: &str,
    source: &str,
    target: &str,
    association_type: &str,
) -> Result<ConnectOutcome> {
    let source_slug = Slug::new(source)?;
    let target_slug = Slug::new(target)?;
    let association_type = AssociationType::parse(association_type)?;

    with_pair_lock(service, holder, &source_slug, &target_slug, || {
        do_disconnect(service, &source_slug, &target_slug, association_type)
    })
    .await
}

/// Lock both slugs in a stable order so two concurrent calls touching the
/// same pair never deadlock, run `body`, then release both locks even if
/// `body` fails.
async fn with_pair_lock<F, Fut>(
    service: &MemoryService,
    holder: &str,
    source_slug: &Slug,
    target_slug: &Slug,
    body: F,
) -> Result<ConnectOutcome>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<ConnectOutcome>>,
{
    let (first, second) = if source_slug.as_str() <= target_slug.as_str() {
        (source_slug.clone(), target_slug.clone())
    } else {
        (target_slug.clone(), source_slug.clone())
    };
    service.locker.acquire(&first, holder).await?;
    let second_acquired = service.locker.acquire(&second, holder).await;
    let result = match second_acquired {
        Ok(()) => body().await,
        Err(e) => Err(e),
    };

    if second != first {
        let _ = service.locker.release(&second, holder).await;
    }
    let _ = service.locker.release(&first, holder).await;

    result
}

async fn do_connect(
    service: &MemoryService,
    source_slug: &Slug,
    target_slug: &Slug,
    association_type: AssociationType,
    strength: Strength,
) -> Result<ConnectOutcome> {
    let source_memory = require_found(
        service.index.by_slug(source_slug).await?,
        format!("memory '{source_slug}'"),
    )?;
    require_found(
        service.index.by_slug(target_slug).await?,
        format!("memory '{target_slug}'"),
    )?;

    let mut paths = vec![source_memory.file_path.clone()];
    append_association(
        service,
        source_slug,
        &source_memory.file_path,
        target_slug,
        association_type,
        strength,
    )?;

    service
        .index
        .upsert_association(&Association {
            source: source_slug.clone(),
            target: target_slug.clone(),
            association_type,
            strength,
        })
        .await?;

    if !association_type.is_directional() {
        let target_memory = require_found(
            service.index.by_slug(target_slug).await?,
            format!("memory '{target_slug}'"),
        )?;
        append_association(
            service,
            target_slug,
            &target_memory.file_path,
            source_slug,
            association_type,
            strength,
        )?;
        paths.push(target_memory.file_path.clone());

        service
            .index
            .upsert_association(&Association {
                source: target_slug.clone(),
                target: source_slug.clone(),
                association_type,
                strength,
            })
            .await?;
    }

    let commit = service.commit(
        &paths,
        &format!("associate: Link '{source_slug}' -> '{target_slug}' ({association_type})"),
    )?;

    Ok(ConnectOutcome { commit })
}

async fn do_disconnect(
    service: &MemoryService,
    source_slug: &Slug,
    target_slug: &Slug,
    association_type: AssociationType,
) -> Result<ConnectOutcome> {
    let source_memory = require_found(
        service.index.by_slug(source_slug).await?,
        format!("memory '{source_slug}'"),
    )?;
    let target_memory = require_found(
        service.index.by_slug(target_slug).await?,
        format!("memory '{target_slug}'"),
    )?;

    let mut paths = vec![source_memory.file_path.clone()];

    service
        .index
        .delete_association(source_slug, target_slug, association_type)
        .await?;
    remove_association(
        service,
        &source_memory.file_path,
        target_slug,
        association_type,
    )?;

    if !association_type.is_directional() {
        service
            .index
            .delete_association(target_slug, source_slug, association_type)
            .await?;
        remove_association(
            service,
            &target_memory.file_path,
            source_slug,
            association_type,
        )?;
        paths.push(target_memory.file_path.clone());
    }

    if association_type == AssociationType::Supersedes
        && target_memory.superseded_by.as_ref() == Some(source_slug)
    {
        clear_superseded_by(service, &target_memory.file_path)?;
        if !paths.contains(&target_memory.file_path) {
            paths.push(target_memory.file_path.clone());
        }
        let mut updates = BTreeMap::new();
        updates.insert("superseded_by", Bound::OptText(None));
        updates.insert("updated", Bound::Text(Utc::now().to_rfc3339()));
        service
            .locker
            .update_with_version(target_slug, target_memory.version, updates)
            .await?;
    }

    let commit = service.commit(
        &paths,
        &format!("disassociate: Unlink '{source_slug}' -> '{target_slug}' ({association_type})"),
    )?;

    Ok(ConnectOutcome { commit })
}

/// Rewrite `file_path`'s header to add one more `HeaderAssociation`
/// pointing at `target`, unless an entry for the same `{target, type}`
/// pair is already present.
fn append_association(
    service: &MemoryService,
    owner_slug: &Slug,
    file_path: &str,
    target: &Slug,
    association_type: AssociationType,
    strength: Strength,
) -> Result<()> {
    let text = service.read_file(file_path)?;
    let mut doc: MemoryDoc = markdown::parse(&text)?;

    let type_str = association_type.as_str();
    let already_present = doc
        .header
        .associations
        .iter()
        .any(|a| a.target == target.as_str() && a.association_type == type_str);
    if already_present {
        return Ok(());
    }

    doc.header.associations.push(HeaderAssociation {
        target: target.to_string(),
        association_type: type_str.to_string(),
        strength: strength.get(),
    });
    doc.header.updated = Utc::now();
    doc.header.id.get_or_insert_with(|| owner_slug.to_string());
    ensure_header_title(&mut doc.header, owner_slug);

    let rewritten = markdown::emit(&doc)?;
    service.write_file(file_path, &rewritten)
}

/// Rewrite `file_path`'s header to drop the `{target, type}` association
/// entry, if present.
fn remove_association(
    service: &MemoryService,
    file_path: &str,
    target: &Slug,
    association_type: AssociationType,
) -> Result<()> {
    let text = service.read_file(file_path)?;
    let mut doc: MemoryDoc = markdown::parse(&text)?;

    let type_str = association_type.as_str();
    let before = doc.header.associations.len();
    doc.header
        .associations
        .retain(|a| !(a.target == target.as_str() && a.association_type == type_str));
    if doc.header.associations.len() == before {
        return Ok(());
    }

    doc.header.updated = Utc::now();
    let rewritten = markdown::emit(&doc)?;
    service.write_file(file_path, &rewritten)
}

/// Clear `superseded_by` from `file_path`'s header.
fn clear_superseded_by(service: &MemoryService, file_path: &str) -> Result<()> {
    let text = service.read_file(file_path)?;
    let mut doc: MemoryDoc = markdown::parse(&text)?;
    doc.header.superseded_by = None;
    doc.header.updated = Utc::now();
    let rewritten = markdown::emit(&doc)?;
    service.write_file(file_path, &rewritten)
}

fn ensure_header_title(header: &mut Header, owner_slug: &Slug) {
    if header.title.is_empty() {
        header.title = owner_slug.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::services::remember_service::{remember, RememberRequest};
    use tempfile::TempDir;

    async fn service_with_repo() -> (MemoryService, TempDir) {
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
    async fn non_directional_connect_writes_both_headers() {
        let (service, _dir) = service_with_repo().await;

        let a = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Alpha".to_string(),
                content: "Body A".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let b = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Beta".to_string(),
                content: "Body B".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        connect(
            &service,
            "tester",
            a.slug.as_str(),
            b.slug.as_str(),
            "related_to",
            Some(0.8),
        )
        .await
        .unwrap();

        let forward = service.index.associations_by_source(&a.slug).await.unwrap();
        let backward = service.index.associations_by_source(&b.slug).await.unwrap();
        assert_eq!(forward.len(), 1);
        assert_eq!(backward.len(), 1);
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn directional_connect_only_writes_source_header() {
        let (service, _dir) = service_with_repo().await;

        let a = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Alpha".to_string(),
                content: "Body A".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let b = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Beta".to_string(),
                content: "Body B".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        connect(&service, "tester", a.slug.as_str(), b.slug.as_str(), "follows", None)
            .await
            .unwrap();

        let forward = service.index.associations_by_source(&a.slug).await.unwrap();
        let backward = service.index.associations_by_source(&b.slug).await.unwrap();
        assert_eq!(forward.len(), 1);
        assert!(backward.is_empty());
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn repeated_connect_does_not_duplicate_header_entry() {
        let (service, _dir) = service_with_repo().await;

        let a = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Alpha".to_string(),
                content: "Body A".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let b = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Beta".to_string(),
                content: "Body B".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        connect(&service, "tester", a.slug.as_str(), b.slug.as_str(), "related_to", None)
            .await
            .unwrap();
        connect(&service, "tester", a.slug.as_str(), b.slug.as_str(), "related_to", None)
            .await
            .unwrap();

        let memory = service.index.by_slug(&a.slug).await.unwrap().unwrap();
        let doc = markdown::parse(&service.read_file(&memory.file_path).unwrap()).unwrap();
        assert_eq!(doc.header.associations.len(), 1);
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn disconnect_removes_edges_and_header_entries() {
        let (service, _dir) = service_with_repo().await;

        let a = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Alpha".to_string(),
                content: "Body A".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let b = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Beta".to_string(),
                content: "Body B".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        connect(&service, "tester", a.slug.as_str(), b.slug.as_str(), "related_to", None)
            .await
            .unwrap();
        disconnect(&service, "tester", a.slug.as_str(), b.slug.as_str(), "related_to")
            .await
            .unwrap();

        assert!(service
            .index
            .associations_by_source(&a.slug)
            .await
            .unwrap()
            .is_empty());
        assert!(service
            .index
            .associations_by_source(&b.slug)
            .await
            .unwrap()
            .is_empty());
    }
}
