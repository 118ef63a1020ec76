//! Background sweep: periodically syncs every repository that has a
//! remote credential on file, and clears expired lease locks along the
//! way. Modeled as a ticking `tokio::spawn` loop
//! with a `Drop`-triggered abort, the same shape the job worker's
//! heartbeat uses.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::crypto::EncryptionKey;
use crate::index::{Index, SystemStore};
use crate::locker::Locker;
use crate::services::sync_service;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

pub struct Scheduler {
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the sweep loop. `system` and `encryption_key` are shared with
    /// the rest of the process (MCP server, CLI); the scheduler only
    /// reads from them.
    pub fn spawn(
        system: Arc<SystemStore>,
        encryption_key: Option<EncryptionKey>,
        config: SchedulerConfig,
    ) -> Self {
        let mut ticker = interval(config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let handle = tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if let Err(e) = sweep_once(&system, encryption_key.as_ref()).await {
                    error!("scheduled sweep failed: {e:#}");
                }
            }
        });

        Self { handle }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run one sweep over every repo with a remote on file. Each repo's
/// failure is logged and skipped rather than aborting the whole sweep.
pub async fn sweep_once(system: &SystemStore, encryption_key: Option<&EncryptionKey>) -> anyhow::Result<()> {
    let repos = system.repos_with_remote().await?;
    info!(repo_count = repos.len(), "starting scheduled sync sweep");

    for repo in repos {
        let repo_root = PathBuf::from(&repo.repo_path);
        if let Err(e) = sweep_one(system, encryption_key, &repo.user_id, &repo_root).await {
            warn!(user_id = %repo.user_id, "scheduled sync failed for repo: {e:#}");
        }
    }

    Ok(())
}

async fn sweep_one(
    system: &SystemStore,
    encryption_key: Option<&EncryptionKey>,
    user_id: &str,
    repo_root: &std::path::Path,
) -> anyhow::Result<()> {
    let index = Index::open(repo_root).await?;
    let locker = Locker::new(index.clone());
    let expired = locker.cleanup_all_expired().await?;
    if expired > 0 {
        info!(user_id, expired, "cleared expired lease locks");
    }

    let (report, index) = sync_service::sync_repository(system, encryption_key, user_id, repo_root, index).await?;
    index.close().await;

    info!(
        user_id,
        pushed = report.pushed,
        memories = report.rebuild.memories_indexed,
        "scheduled sync complete"
    );
    Ok(())
}
