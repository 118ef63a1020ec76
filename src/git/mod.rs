//! Git repository integration: a worktree wrapper used by the Memory
//! Service, Rebuilder, and Sync Engine. See `repository::Repository`.

mod repository;
pub mod types;

pub use repository::{PullOutcome, Repository, RESERVED_DIRS};
pub use types::{CommitInfo, DiffHunk, DiffResult, GrepMatch, RemoteCredential, RemoteOutcome};

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_git_module_imports() -> Result<()> {
        // Basic test to ensure module structure is correct
        let _temp = TempDir::new()?;
        Ok(())
    }
}
