//! `recall`: the read path. Three input modes — `list_all` (everything,
//! newest first), `exact` (grep-backed substring match), and `topic` (a
//! ranked union of five independent strategies) — each of which bumps
//! the matched memories' access counters.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};

use crate::graph::{self, TraversalOptions};
use crate::index::ListOptions;
use crate::services::MemoryService;
use crate::types::{Memory, SinceWindow, Slug};

/// Which strategy (or strategies) surfaced a memory in a `topic` recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchSource {
    Title,
    Tag,
    Content,
    Semantic,
    Association,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Title => "title",
            MatchSource::Tag => "tag",
            MatchSource::Content => "content",
            MatchSource::Semantic => "semantic",
            MatchSource::Association => "association",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    pub topic: Option<String>,
    pub exact: Option<String>,
    pub list_all: bool,
    pub path_filter: Option<String>,
    pub since: Option<String>,
    pub include_archived: bool,
    /// When false (the default), memories with `superseded_by` set are
    /// dropped from direct search hits (graph expansion still follows them).
    pub include_superseded: bool,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct RecallHit {
    pub memory: Memory,
    pub score: f64,
    pub match_sources: Vec<MatchSource>,
}

#[derive(Debug, Clone, Default)]
pub struct RecallResult {
    pub hits: Vec<RecallHit>,
}

const DEFAULT_LIMIT: usize = 10;

pub async fn recall(service: &MemoryService, options: &RecallOptions) -> Result<RecallResult> {
    let ranked_by_topic = options.topic.is_some();

    let mut hits = if options.list_all {
        service
            .index
            .list(&ListOptions {
                include_archived: options.include_archived,
            })
            .await?
            .into_iter()
            .map(|memory| RecallHit {
                memory,
                score: 0.0,
                match_sources: Vec::new(),
            })
            .collect()
    } else if let Some(pattern) = &options.exact {
        exact_search(service, pattern, options.include_archived).await?
    } else if let Some(topic) = &options.topic {
        topic_search(service, topic, options.include_archived).await?
    } else {
        bail!("recall requires at least one of: topic, exact, list_all");
    };

    if !options.include_superseded {
        hits.retain(|h| h.memory.superseded_by.is_none());
    }

    if let Some(prefix) = &options.path_filter {
        hits.retain(|h| h.memory.file_path.starts_with(prefix.as_str()));
    }

    if let Some(since_raw) = &options.since {
        let cutoff = SinceWindow::parse(since_raw)?.resolve(Utc::now());
        hits.retain(|h| h.memory.updated >= cutoff);
    }

    if ranked_by_topic {
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    } else {
        hits.sort_by(|a, b| b.memory.updated.cmp(&a.memory.updated));
    }

    let limit = if options.limit == 0 { DEFAULT_LIMIT } else { options.limit };
    hits.truncate(limit);

    let now = Utc::now();
    for hit in &hits {
        service.index.bump_access(&hit.memory.slug, now).await?;
    }

    Ok(RecallResult { hits })
}

/// `exact`: grep the worktree for `pattern`, then map each matched file
/// back to the memory that owns it via the Index.
async fn exact_search(
    service: &MemoryService,
    pattern: &str,
    include_archived: bool,
) -> Result<Vec<RecallHit>> {
    let repo = service.repository()?;
    let matches = repo.grep(pattern, None)?;
    let matched_paths: HashSet<String> = matches.into_iter().map(|m| m.relative_path).collect();

    let candidates = service
        .index
        .list(&ListOptions { include_archived })
        .await?;

    Ok(candidates
        .into_iter()
        .filter(|m| matched_paths.contains(&m.file_path))
        .map(|memory| RecallHit {
            memory,
            score: 0.0,
            match_sources: vec![MatchSource::Content],
        })
        .collect())
}

/// `topic`: union of five ranked strategies (title/tag/content substring,
/// semantic similarity when an embedding provider is configured, and
/// one-hop association expansion from whatever the first four found), each
/// contributing a base score plus a recency bonus, with a smaller
/// accumulation bonus for every additional strategy that matches the same
/// memory.
async fn topic_search(
    service: &MemoryService,
    topic: &str,
    include_archived: bool,
) -> Result<Vec<RecallHit>> {
    let now = Utc::now();
    let mut scored: HashMap<Slug, (Memory, f64, Vec<MatchSource>)> = HashMap::new();

    let mut accumulate = |memory: Memory, base: f64, accumulation_bonus: f64, source: MatchSource| {
        let recency = recency_bonus(memory.updated, now);
        match scored.get_mut(&memory.slug) {
            Some((_, score, sources)) => {
                *score += accumulation_bonus + recency;
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
            None => {
                scored.insert(memory.slug.clone(), (memory, base + recency, vec![source]));
            }
        }
    };

    for memory in service.index.by_title_substring(topic, include_archived).await? {
        accumulate(memory, 10.0, 5.0, MatchSource::Title);
    }
    for memory in service.index.by_tag_substring(topic).await? {
        accumulate(memory, 8.0, 4.0, MatchSource::Tag);
    }

    if let Ok(repo) = service.repository() {
        if let Ok(matches) = repo.grep(topic, None) {
            let matched_paths: HashSet<String> =
                matches.into_iter().map(|m| m.relative_path).collect();
            if !matched_paths.is_empty() {
                let candidates = service
                    .index
                    .list(&ListOptions { include_archived })
                    .await?;
                for memory in candidates {
                    if matched_paths.contains(&memory.file_path) {
                        accumulate(memory, 6.0, 3.0, MatchSource::Content);
                    }
                }
            }
        }
    }

    if let Some(provider) = &service.embeddings {
        if let Ok(query_vector) = provider.embed(topic).await {
            let candidates = service
                .index
                .list(&ListOptions { include_archived })
                .await?;
            for memory in candidates {
                if let Some(record) = service.index.get_embedding(&memory.slug).await? {
                    let similarity = cosine_similarity(&query_vector, &record.vector);
                    if similarity >= 0.3 {
                        accumulate(
                            memory,
                            similarity as f64 * 8.0,
                            similarity as f64 * 5.0,
                            MatchSource::Semantic,
                        );
                    }
                }
            }
        }
    }

    let seeds: Vec<Slug> = scored.keys().cloned().collect();
    for seed in seeds {
        let nodes = graph::traverse(
            &service.index,
            &seed,
            &TraversalOptions {
                max_depth: 1,
                follow_incoming: true,
            },
        )
        .await?;

        for node in nodes {
            if node.slug == seed || scored.contains_key(&node.slug) {
                continue;
            }
            if let Some(memory) = service.index.by_slug(&node.slug).await? {
                accumulate(memory, 3.0, 3.0, MatchSource::Association);
            }
        }
    }

    Ok(scored
        .into_values()
        .map(|(memory, score, match_sources)| RecallHit {
            memory,
            score,
            match_sources,
        })
        .collect())
}

fn recency_bonus(updated: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = now - updated;
    if age < Duration::days(1) {
        2.0
    } else if age < Duration::days(7) {
        1.5
    } else if age < Duration::days(30) {
        1.0
    } else {
        0.5
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::services::remember_service::{remember, RememberRequest};
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
    async fn topic_recall_matches_by_title_and_bumps_access_count() {
        let (service, _dir) = service().await;
        let outcome = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Project Alpha Planning".to_string(),
                content: "Body".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let result = recall(
            &service,
            &RecallOptions {
                topic: Some("alpha".to_string()),
                limit: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.hits.len(), 1);
        assert!(result.hits[0].match_sources.contains(&MatchSource::Title));
        let refreshed = service.index.by_slug(&outcome.slug).await.unwrap().unwrap();
        assert_eq!(refreshed.access_count, 1);
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn list_all_respects_limit() {
        let (service, _dir) = service().await;
        for title in ["One", "Two", "Three"] {
            remember(
                &service,
                "tester",
                RememberRequest {
                    title: title.to_string(),
                    content: "Body".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        let result = recall(
            &service,
            &RecallOptions {
                list_all: true,
                limit: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.hits.len(), 2);
    }

    #[tokio::test]
    #[cfg(feature = "git-integration")]
    async fn exact_recall_finds_a_content_match_not_in_the_title() {
        let (service, _dir) = service().await;
        let outcome = remember(
            &service,
            "tester",
            RememberRequest {
                title: "Unrelated Title".to_string(),
                content: "the quokka hides in the burrow".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let result = recall(
            &service,
            &RecallOptions {
                exact: Some("quokka".to_string()),
                limit: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].memory.slug, outcome.slug);
    }

    #[test]
    fn recency_bonus_decreases_with_age() {
        let now = Utc::now();
        assert_eq!(recency_bonus(now, now), 2.0);
        assert_eq!(recency_bonus(now - Duration::days(3), now), 1.5);
        assert_eq!(recency_bonus(now - Duration::days(10), now), 1.0);
        assert_eq!(recency_bonus(now - Duration::days(90), now), 0.5);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
