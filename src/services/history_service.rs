//! `history`: the git commit log for one memory, or the whole repository
//! when no slug is given.

use anyhow::Result;
use chrono::Utc;

use crate::git::CommitInfo;
use crate::services::{require_found, MemoryService};
use crate::types::{Slug, SinceWindow};

#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    pub slug: Option<String>,
    pub since: Option<String>,
    pub message_regex: Option<String>,
    pub limit: usize,
}

pub async fn history(service: &MemoryService, options: &HistoryOptions) -> Result<Vec<CommitInfo>> {
    let path_filter = match &options.slug {
        Some(raw) => {
            let slug = Slug::new(raw)?;
            let memory = require_found(
                service.index.by_slug_unscoped(&slug).await?,
                format!("memory '{slug}'"),
            )?;
            Some(memory.file_path)
        }
        None => None,
    };

    let since = options
        .since
        .as_deref()
        .map(SinceWindow::parse)
        .transpose()?
        .map(|window| window.resolve(Utc::now()));

    let limit = if options.limit == 0 { 50 } else { options.limit };

    let repo = service.repository()?;
    repo.history(
        path_filter.as_deref(),
        options.message_regex.as_deref(),
        since,
        None,
        limit,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::services::remember_service::{remember, RememberRequest};
    use tempfile::TempDir;

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn history_filters_by_slug() {
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

        let commits = history(
            &service,
            &HistoryOptions {
                slug: Some(outcome.slug.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, format!("feat: Create memory '{}'", outcome.slug));
    }
}
