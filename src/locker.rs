//! Concurrency primitives backing the Memory Service:
//!
//! - Optimistic concurrency on `memories.version` via compare-and-swap.
//! - Advisory per-slug lease locks with a TTL, used to bracket the
//!   file-write -> git-commit -> index-upsert sequence so two concurrent
//!   `remember` calls on the same slug don't interleave.
//!
//! Both live in the per-user Index; there is no process-wide lock.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;

use crate::errors::CairnError;
use crate::index::Index;
use crate::types::Slug;

/// A value bound into a dynamic `UPDATE ... SET col = ?` column list.
/// Deliberately narrow: callers are internal service code, never raw user
/// input, since column names are interpolated directly into SQL.
#[derive(Debug, Clone)]
pub enum Bound {
    Text(String),
    OptText(Option<String>),
    Int(i64),
}

pub struct Locker {
    index: Index,
    default_ttl: Duration,
}

impl Locker {
    pub fn new(index: Index) -> Self {
        Self {
            index,
            default_ttl: Duration::from_secs(30),
        }
    }

    pub fn with_ttl(index: Index, ttl: Duration) -> Self {
        Self {
            index,
            default_ttl: ttl,
        }
    }

    /// Acquire the advisory lease lock on `slug` for `locked_by`. Fails if
    /// the lock is already held by someone else and unexpired.
    pub async fn acquire(&self, slug: &Slug, locked_by: &str) -> Result<()> {
        self.cleanup_expired(slug).await?;

        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(self.default_ttl).unwrap();

        let result = sqlx::query(
            "INSERT INTO lease_locks (slug, locked_by, locked_at, expires_at, version) \
             VALUES (?, ?, ?, ?, 1) \
             ON CONFLICT(slug) DO NOTHING",
        )
        .bind(slug.as_str())
        .bind(locked_by)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(self.index.pool())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let holder: Option<(String,)> =
            sqlx::query_as("SELECT locked_by FROM lease_locks WHERE slug = ?")
                .bind(slug.as_str())
                .fetch_optional(self.index.pool())
                .await?;

        match holder {
            Some((holder,)) if holder == locked_by => Ok(()),
            _ => Err(CairnError::LockNotHeld {
                slug: slug.to_string(),
            }
            .into()),
        }
    }

    pub async fn release(&self, slug: &Slug, locked_by: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM lease_locks WHERE slug = ? AND locked_by = ?")
            .bind(slug.as_str())
            .bind(locked_by)
            .execute(self.index.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(CairnError::LockNotHeld {
                slug: slug.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Push the expiry of a held lock out by `default_ttl`, for long-running
    /// operations (e.g. a slow remote push during sync).
    pub async fn extend(&self, slug: &Slug, locked_by: &str) -> Result<()> {
        let new_expiry = Utc::now() + chrono::Duration::from_std(self.default_ttl).unwrap();

        let result = sqlx::query(
            "UPDATE lease_locks SET expires_at = ?, version = version + 1 \
             WHERE slug = ? AND locked_by = ?",
        )
        .bind(new_expiry.to_rfc3339())
        .bind(slug.as_str())
        .bind(locked_by)
        .execute(self.index.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CairnError::LockNotHeld {
                slug: slug.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub async fn is_locked(&self, slug: &Slug) -> Result<bool> {
        self.cleanup_expired(slug).await?;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT locked_by FROM lease_locks WHERE slug = ?")
                .bind(slug.as_str())
                .fetch_optional(self.index.pool())
                .await?;
        Ok(row.is_some())
    }

    /// Drop the lock row for `slug` if its `expires_at` has passed.
    pub async fn cleanup_expired(&self, slug: &Slug) -> Result<()> {
        sqlx::query("DELETE FROM lease_locks WHERE slug = ? AND expires_at < ?")
            .bind(slug.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(self.index.pool())
            .await?;
        Ok(())
    }

    /// Sweep every expired lock, regardless of slug. Run periodically by
    /// the Scheduler alongside the sync sweep.
    pub async fn cleanup_all_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM lease_locks WHERE expires_at < ?")
            .bind(Utc::now().to_rfc3339())
            .execute(self.index.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Optimistic compare-and-swap update against the `memories` table: the
    /// write only applies if the row's current `version` still matches
    /// `expected_version`, and it always bumps `version` by one. Returns
    /// `CairnError::VersionConflict` if another writer moved the row first.
    pub async fn update_with_version(
        &self,
        slug: &Slug,
        expected_version: i64,
        updates: BTreeMap<&'static str, Bound>,
    ) -> Result<i64> {
        if updates.is_empty() {
            return Err(CairnError::invalid_input("no columns to update").into());
        }

        let mut set_clause = String::new();
        for column in updates.keys() {
            set_clause.push_str(column);
            set_clause.push_str(" = ?, ");
        }
        set_clause.push_str("version = version + 1");

        let sql = format!(
            "UPDATE memories SET {set_clause} WHERE slug = ? AND version = ?"
        );

        let mut query = sqlx::query(&sql);
        for value in updates.values() {
            query = match value {
                Bound::Text(s) => query.bind(s.clone()),
                Bound::OptText(s) => query.bind(s.clone()),
                Bound::Int(i) => query.bind(*i),
            };
        }
        query = query.bind(slug.as_str()).bind(expected_version);

        let result = query.execute(self.index.pool()).await?;

        if result.rows_affected() == 0 {
            return Err(CairnError::VersionConflict {
                expected: expected_version,
            }
            .into());
        }

        Ok(expected_version + 1)
    }

    /// Retry an optimistic update a handful of times with jittered backoff,
    /// re-reading the current version between attempts via `reload`.
    pub async fn retry_with_backoff<F, Fut>(&self, max_attempts: u32, mut attempt: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut last_err = None;
        for n in 0..max_attempts {
            match attempt().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let is_conflict = e
                        .downcast_ref::<CairnError>()
                        .map(|ce| matches!(ce, CairnError::VersionConflict { .. }))
                        .unwrap_or(false);
                    if !is_conflict {
                        return Err(e);
                    }
                    last_err = Some(e);
                    let jitter_ms = rand::thread_rng().gen_range(10..=50) * (n + 1);
                    tokio::time::sleep(Duration::from_millis(jitter_ms as u64)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CairnError::Fatal {
            detail: "retry loop exited without an error".to_string(),
        }
        .into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn locker_with_memory(slug: &str) -> (Locker, Slug) {
        let index = Index::open_url("sqlite::memory:").await.unwrap();
        let now = Utc::now();
        let memory = crate::types::Memory {
            slug: Slug::new_unchecked(slug.to_string()),
            title: crate::types::Title::new("Title").unwrap(),
            tags: vec![],
            created: now,
            updated: now,
            content: String::new(),
            file_path: format!("2026/07/{slug}.md"),
            content_hash: "hash".to_string(),
            version: 1,
            superseded_by: None,
            access_count: 0,
            last_accessed_at: None,
            deleted_at: None,
            annotations: vec![],
        };
        index.create_memory(&memory).await.unwrap();
        (Locker::new(index), memory.slug)
    }

    #[tokio::test]
    async fn acquire_then_second_caller_is_rejected() {
        let (locker, slug) = locker_with_memory("lock-me-2026-07-27").await;
        locker.acquire(&slug, "alice").await.unwrap();
        let err = locker.acquire(&slug, "bob").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CairnError>(),
            Some(CairnError::LockNotHeld { .. })
        ));
    }

    #[tokio::test]
    async fn acquire_is_reentrant_for_same_holder() {
        let (locker, slug) = locker_with_memory("reentrant-2026-07-27").await;
        locker.acquire(&slug, "alice").await.unwrap();
        locker.acquire(&slug, "alice").await.unwrap();
    }

    #[tokio::test]
    async fn release_then_reacquire_by_another_holder_succeeds() {
        let (locker, slug) = locker_with_memory("release-2026-07-27").await;
        locker.acquire(&slug, "alice").await.unwrap();
        locker.release(&slug, "alice").await.unwrap();
        locker.acquire(&slug, "bob").await.unwrap();
    }

    #[tokio::test]
    async fn update_with_version_rejects_stale_version() {
        let (locker, slug) = locker_with_memory("cas-2026-07-27").await;
        let mut updates = BTreeMap::new();
        updates.insert("content_hash", Bound::Text("new-hash".to_string()));

        locker.update_with_version(&slug, 1, updates.clone()).await.unwrap();

        let err = locker
            .update_with_version(&slug, 1, updates)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CairnError>(),
            Some(CairnError::VersionConflict { .. })
        ));
    }
}
