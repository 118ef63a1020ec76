//! Business logic for the seven MCP tools, all built atop a
//! shared `MemoryService` context: one per-user Index, one Locker over
//! it, and the worktree root the Repository opens against.
//!
//! Every mutating operation follows the same bracket: acquire the
//! per-slug lease lock, write the Markdown file, commit it, upsert the
//! Index row, release the lock. The file and the commit are the source
//! of truth; the Index update is a mirror that a `rebuild` can always
//! regenerate.

pub mod connect_service;
pub mod history_service;
pub mod lifecycle_service;
pub mod recall_service;
pub mod remember_service;
pub mod sync_service;

pub use connect_service::{connect, disconnect, ConnectOutcome};
pub use history_service::{history, HistoryOptions};
pub use lifecycle_service::{forget, restore, LifecycleOutcome};
pub use recall_service::{recall, MatchSource, RecallHit, RecallOptions, RecallResult};
pub use remember_service::{remember, RememberOutcome, RememberRequest};
pub use sync_service::sync_repository;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embeddings::EmbeddingProvider;
use crate::errors::CairnError;
use crate::git::Repository;
use crate::index::Index;
use crate::locker::Locker;

/// Shared context every service function operates against.
pub struct MemoryService {
    pub index: Index,
    pub locker: Locker,
    repo_root: PathBuf,
    pub commit_author: String,
    pub commit_author_email: String,
    /// Optional semantic-similarity backend for `recall`'s `topic` mode.
    /// Absent by default; substring/tag/content/graph strategies work
    /// without it.
    pub embeddings: Option<Arc<dyn EmbeddingProvider>>,
}

impl MemoryService {
    pub fn new(
        index: Index,
        repo_root: impl Into<PathBuf>,
        commit_author: impl Into<String>,
        commit_author_email: impl Into<String>,
    ) -> Self {
        let locker = Locker::new(index.clone());
        Self {
            index,
            locker,
            repo_root: repo_root.into(),
            commit_author: commit_author.into(),
            commit_author_email: commit_author_email.into(),
            embeddings: None,
        }
    }

    pub fn with_embeddings(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings = Some(provider);
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn repository(&self) -> Result<Repository> {
        Repository::open(&self.repo_root).context("opening worktree")
    }

    /// Write `content` to `relative_path` under the worktree, creating
    /// parent directories as needed.
    pub fn write_file(&self, relative_path: &str, content: &str) -> Result<()> {
        let full_path = self.repo_root.join(relative_path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory for {relative_path}"))?;
        }
        std::fs::write(&full_path, content)
            .with_context(|| format!("writing {relative_path}"))?;
        Ok(())
    }

    pub fn read_file(&self, relative_path: &str) -> Result<String> {
        let full_path = self.repo_root.join(relative_path);
        std::fs::read_to_string(&full_path)
            .with_context(|| format!("reading {relative_path}"))
    }

    pub fn remove_file(&self, relative_path: &str) -> Result<()> {
        let full_path = self.repo_root.join(relative_path);
        if full_path.exists() {
            std::fs::remove_file(&full_path)
                .with_context(|| format!("removing {relative_path}"))?;
        }
        Ok(())
    }

    pub fn commit(&self, paths: &[String], message: &str) -> Result<String> {
        let repo = self.repository()?;
        repo.commit(
            paths,
            &self.commit_author,
            &self.commit_author_email,
            message,
            false,
        )
    }
}

/// Acquire the lease lock on `slug`, run `body`, then release it even if
/// `body` fails.
pub async fn with_lock<T, F, Fut>(
    service: &MemoryService,
    slug: &crate::types::Slug,
    holder: &str,
    body: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    service.locker.acquire(slug, holder).await?;
    let result = body().await;
    let release = service.locker.release(slug, holder).await;
    match (result, release) {
        (Ok(value), _) => Ok(value),
        (Err(e), _) => Err(e),
    }
}

pub(crate) fn require_found<T>(value: Option<T>, what: impl Into<String>) -> Result<T> {
    value.ok_or_else(|| CairnError::not_found(what).into())
}
