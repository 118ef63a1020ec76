//! `forget` and `restore`: soft-delete a memory into `archive/`, and bring
//! it back out again.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;

use crate::errors::CairnError;
use crate::locker::Bound;
use crate::markdown::{self, MemoryDoc};
use crate::organizer::{self, PlacementInput};
use crate::services::{require_found, with_lock, MemoryService};
use crate::types::Slug;

const UPDATE_RETRY_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct LifecycleOutcome {
    pub commit: String,
    pub cleared_supersession_commit: Option<String>,
}

pub async fn forget(service: &MemoryService, holder: &str, slug_raw: &str) -> Result<LifecycleOutcome> {
    let slug = Slug::new(slug_raw)?;

    let commit = with_lock(service, &slug, holder, || async {
        let memory = require_found(
            service.index.by_slug_unscoped(&slug).await?,
            format!("memory '{slug}'"),
        )?;
        if memory.deleted_at.is_some() {
            return Err(CairnError::archived(format!("memory '{slug}' is already archived")).into());
        }

        let archive_path = organizer::archive_path(&slug);
        let text = service.read_file(&memory.file_path)?;
        service.write_file(&archive_path, &text)?;
        service.remove_file(&memory.file_path)?;

        let commit = service.commit(
            &[memory.file_path.clone(), archive_path.clone()],
            &format!("archive: Soft delete memory '{slug}'"),
        )?;

        let now = Utc::now();
        service.index.soft_delete(&slug, now).await?;
        let updated_str = now.to_rfc3339();
        service
            .locker
            .retry_with_backoff(UPDATE_RETRY_ATTEMPTS, || {
                let archive_path = archive_path.clone();
                let updated_str = updated_str.clone();
                async move {
                    let current = require_found(
                        service.index.by_slug_unscoped(&slug).await?,
                        format!("memory '{slug}'"),
                    )?;
                    let mut updates = BTreeMap::new();
                    updates.insert("file_path", Bound::Text(archive_path));
                    updates.insert("updated", Bound::Text(updated_str));
                    service
                        .locker
                        .update_with_version(&slug, current.version, updates)
                        .await?;
                    Ok(())
                }
            })
            .await?;

        Ok(commit)
    })
    .await?;

    Ok(LifecycleOutcome {
        commit,
        cleared_supersession_commit: None,
    })
}

pub async fn restore(
    service: &MemoryService,
    holder: &str,
    slug_raw: &str,
) -> Result<LifecycleOutcome> {
    let slug = Slug::new(slug_raw)?;

    with_lock(service, &slug, holder, || async {
        let memory = require_found(
            service.index.by_slug_unscoped(&slug).await?,
            format!("memory '{slug}'"),
        )?;

        let placement = PlacementInput {
            category: None,
            tags: &memory.tags,
        };
        let restored_path = organizer::canonical_path(&slug, memory.created, &placement);

        let text = service.read_file(&memory.file_path)?;
        service.write_file(&restored_path, &text)?;
        service.remove_file(&memory.file_path)?;

        let commit = service.commit(
            &[memory.file_path.clone(), restored_path.clone()],
            &format!("restore: Unarchive memory '{slug}'"),
        )?;

        let now = Utc::now();
        service
            .index
            .restore_unscoped(&slug, &restored_path, now)
            .await?;

        let cleared_supersession_commit = if memory.superseded_by.is_some() {
            let doc: MemoryDoc = markdown::parse(&service.read_file(&restored_path)?)?;
            let mut header = doc.header;
            header.superseded_by = None;
            header.updated = now;
            let rewritten = markdown::emit(&MemoryDoc { header, body: doc.body })?;
            service.write_file(&restored_path, &rewritten)?;
            let commit = service.commit(
                &[restored_path.clone()],
                &format!("update: Clear superseded status from '{slug}'"),
            )?;

            let updated_str = now.to_rfc3339();
            service
                .locker
                .retry_with_backoff(UPDATE_RETRY_ATTEMPTS, || {
                    let updated_str = updated_str.clone();
                    async move {
                        let current = require_found(
                            service.index.by_slug_unscoped(&slug).await?,
                            format!("memory '{slug}'"),
                        )?;
                        let mut updates = BTreeMap::new();
                        updates.insert("superseded_by", Bound::OptText(None));
                        updates.insert("updated", Bound::Text(updated_str));
                        service
                            .locker
                            .update_with_version(&slug, current.version, updates)
                            .await?;
                        Ok(())
                    }
                })
                .await?;
            Some(commit)
        } else {
            None
        };

        Ok(LifecycleOutcome {
            commit,
            cleared_supersession_commit,
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::services::remember_service::{remember, RememberRequest};
    use tempfile::TempDir;

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn forget_then_restore_round_trips() {
        let dir = TempDir::new().unwrap();
        crate::git::Repository::init(dir.path()).unwrap();
        let index = Index::open(dir.path()).await.unwrap();
        let service = MemoryService::new(index, dir.path(), "tester", "tester@localhost");

        let outcome = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Alpha".to_string(),
                content: "Body".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        forget(&service, "tester", outcome.slug.as_str()).await.unwrap();
        assert!(service.index.by_slug(&outcome.slug).await.unwrap().is_none());

        restore(&service, "tester", outcome.slug.as_str()).await.unwrap();
        assert!(service.index.by_slug(&outcome.slug).await.unwrap().is_some());
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn forgetting_an_already_archived_memory_is_refused() {
        let dir = TempDir::new().unwrap();
        crate::git::Repository::init(dir.path()).unwrap();
        let index = Index::open(dir.path()).await.unwrap();
        let service = MemoryService::new(index, dir.path(), "tester", "tester@localhost");

        let outcome = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Alpha".to_string(),
                content: "Body".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        forget(&service, "tester", outcome.slug.as_str()).await.unwrap();

        let err = forget(&service, "tester", outcome.slug.as_str()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CairnError>(),
            Some(CairnError::Archived { .. })
        ));
    }
}
