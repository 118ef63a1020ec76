//! The Sync Engine: fetch -> pull -> push against the configured remote,
//! bracketed by closing the Index before git mutates the worktree and a
//! mandatory forced rebuild afterward.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::git::{PullOutcome, RemoteCredential, Repository};
use crate::index::Index;
use crate::rebuilder::{self, RebuildReport};

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub pull_outcome: PullOutcome,
    pub conflict_resolution_commit: Option<String>,
    pub pushed: bool,
    pub rebuild: RebuildReport,
}

/// Run one sync cycle against `repo_root`. Consumes the caller's `Index`
/// handle and hands back a fresh one opened after the rebuild, since the
/// old handle's connection must be closed before git touches the files it
/// mirrors.
pub async fn sync(
    repo_root: &Path,
    credential: Option<RemoteCredential>,
    index: Index,
) -> Result<(SyncReport, Index)> {
    index.close().await;

    let root = repo_root.to_path_buf();
    let (pull_outcome, conflict_resolution_commit, pushed) =
        tokio::task::spawn_blocking(move || run_git_cycle(&root, credential.as_ref())).await??;

    let index = Index::open(repo_root).await?;
    let rebuild = rebuilder::rebuild(repo_root, &index, true).await?;

    info!(
        ?pull_outcome,
        pushed,
        memories = rebuild.memories_indexed,
        "sync cycle complete"
    );

    Ok((
        SyncReport {
            pull_outcome,
            conflict_resolution_commit,
            pushed,
            rebuild,
        },
        index,
    ))
}

fn run_git_cycle(
    root: &PathBuf,
    credential: Option<&RemoteCredential>,
) -> Result<(PullOutcome, Option<String>, bool)> {
    let repo = Repository::open(root)?;

    if !repo.has_origin() {
        return Ok((PullOutcome::AlreadyUpToDate, None, false));
    }

    repo.fetch(credential)?;
    let pull_outcome = repo.pull(credential)?;

    let conflict_resolution_commit = if pull_outcome == PullOutcome::Conflict {
        repo.resolve_conflicts_last_write_wins("cairn-sync", "cairn-sync@localhost")?
    } else {
        None
    };

    repo.push(credential)?;

    Ok((pull_outcome, conflict_resolution_commit, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sync_without_origin_is_a_cheap_noop() {
        let dir = tempfile::TempDir::new().unwrap();
        #[cfg(feature = "git-integration")]
        {
            Repository::init(dir.path()).unwrap();
        }

        let index = Index::open(dir.path()).await.unwrap();
        let (report, _index) = sync(dir.path(), None, index).await.unwrap();

        assert_eq!(report.pull_outcome, PullOutcome::AlreadyUpToDate);
        assert!(!report.pushed);
        assert!(report.conflict_resolution_commit.is_none());
    }
}
