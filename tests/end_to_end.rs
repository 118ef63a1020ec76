//! End-to-end scenarios exercising a `MemoryService` the way a real MCP
//! client would: through `remember`/`recall`/`connect`/`forget`/`restore`,
//! the Locker's optimistic concurrency, and a full sync cycle against a
//! local remote. Each test stands up its own git worktree + Index in a
//! fresh `TempDir`.

#![cfg(feature = "git-integration")]

use std::collections::BTreeMap;

use cairn::errors::CairnError;
use cairn::git::Repository;
use cairn::index::Index;
use cairn::locker::Bound;
use cairn::rebuilder;
use cairn::services::connect_service;
use cairn::services::lifecycle_service::{forget, restore};
use cairn::services::recall_service::{recall, MatchSource, RecallOptions};
use cairn::services::remember_service::{remember, RememberRequest};
use cairn::types::AssociationType;
use cairn::MemoryService;
use tempfile::TempDir;

async fn new_service() -> (MemoryService, TempDir) {
    let dir = TempDir::new().unwrap();
    Repository::init(dir.path()).unwrap();
    let index = Index::open(dir.path()).await.unwrap();
    (
        MemoryService::new(index, dir.path(), "tester", "tester@localhost"),
        dir,
    )
}

/// Scenario 1: create + recall.
#[tokio::test]
async fn create_then_recall_finds_it_by_title_substring() {
    let (service, _dir) = new_service().await;

    let outcome = remember(
        &service,
        "tester",
        RememberRequest {
            title: "Project Alpha Planning".to_string(),
            content: "# Goals\n- Q2".to_string(),
            tags: vec!["project".to_string(), "planning".to_string()],
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(outcome.slug.as_str().starts_with("project-alpha-planning-"));
    assert!(outcome.created);

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
    assert_eq!(result.hits[0].memory.slug, outcome.slug);
    assert!(result.hits[0].match_sources.contains(&MatchSource::Title));
}

/// Scenario 2: supersede.
#[tokio::test]
async fn supersede_hides_the_old_memory_from_recall_by_default() {
    let (service, _dir) = new_service().await;

    let original = remember(
        &service,
        "tester",
        RememberRequest {
            title: "Widget Plan".to_string(),
            content: "v1 of the plan".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let replacement = remember(
        &service,
        "tester",
        RememberRequest {
            title: "Widget Plan V2".to_string(),
            content: "v2 of the plan".to_string(),
            supersedes: Some(original.slug.as_str().to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(replacement.supersede_commit.is_some());

    let old = service.index.by_slug(&original.slug).await.unwrap().unwrap();
    assert_eq!(old.superseded_by.as_ref(), Some(&replacement.slug));

    let hidden = recall(
        &service,
        &RecallOptions {
            topic: Some("widget".to_string()),
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(hidden.hits.len(), 1);
    assert_eq!(hidden.hits[0].memory.slug, replacement.slug);

    let shown = recall(
        &service,
        &RecallOptions {
            topic: Some("widget".to_string()),
            include_superseded: true,
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(shown.hits.len(), 2);

    let forward = service
        .index
        .associations_by_source(&replacement.slug)
        .await
        .unwrap();
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].association_type, AssociationType::Supersedes);
    assert_eq!(forward[0].target, original.slug);

    let reverse = service.index.associations_by_source(&original.slug).await.unwrap();
    assert!(reverse.is_empty());
}

/// Scenario 3: archive + restore.
#[tokio::test]
async fn forget_then_restore_round_trips_through_recall_and_history() {
    let (service, _dir) = new_service().await;

    let outcome = remember(
        &service,
        "tester",
        RememberRequest {
            title: "Scratch Note".to_string(),
            content: "temporary".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    forget(&service, "tester", outcome.slug.as_str()).await.unwrap();

    let active = recall(
        &service,
        &RecallOptions {
            list_all: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(active.hits.iter().all(|h| h.memory.slug != outcome.slug));

    let with_archived = recall(
        &service,
        &RecallOptions {
            list_all: true,
            include_archived: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(with_archived.hits.iter().any(|h| h.memory.slug == outcome.slug));

    restore(&service, "tester", outcome.slug.as_str()).await.unwrap();

    let restored = service.index.by_slug(&outcome.slug).await.unwrap().unwrap();
    assert!(!restored.file_path.starts_with("archive/"));

    let commits = service.repository().unwrap().history(None, None, None, None, 10).unwrap();
    let messages: Vec<&str> = commits.iter().take(2).map(|c| c.message.as_str()).collect();
    assert!(messages[0].starts_with("restore:"), "{:?}", messages);
    assert!(messages[1].starts_with("archive:"), "{:?}", messages);
}

/// Scenario 4: optimistic conflict. Two callers racing `update_with_version`
/// against the same `expected_version`: exactly one wins, the other gets a
/// `VersionConflict` it can retry.
#[tokio::test]
async fn concurrent_version_updates_let_exactly_one_through() {
    let (service, _dir) = new_service().await;

    let outcome = remember(
        &service,
        "tester",
        RememberRequest {
            title: "Shared Counter".to_string(),
            content: "initial".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let mut first_update = BTreeMap::new();
    first_update.insert("content_hash", Bound::Text("writer-a-hash".to_string()));
    let mut second_update = BTreeMap::new();
    second_update.insert("content_hash", Bound::Text("writer-b-hash".to_string()));

    let winner = service
        .locker
        .update_with_version(&outcome.slug, 1, first_update)
        .await;
    let loser = service
        .locker
        .update_with_version(&outcome.slug, 1, second_update)
        .await;

    assert!(winner.is_ok());
    let err = loser.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CairnError>(),
        Some(CairnError::VersionConflict { expected: 1 })
    ));
}

/// Scenario 5: sync with a diverging remote commit resolves by keeping
/// bob's own ("ours") side of the conflict, and both sides end up with
/// the same memory afterward.
#[tokio::test]
async fn sync_resolves_a_diverging_remote_commit_with_last_write_wins() {
    let bare_dir = TempDir::new().unwrap();
    git2::Repository::init_bare(bare_dir.path()).unwrap();
    let bare_url = bare_dir.path().to_string_lossy().to_string();

    let dir_a = TempDir::new().unwrap();
    Repository::init(dir_a.path()).unwrap();
    git2::Repository::open(dir_a.path())
        .unwrap()
        .remote("origin", &bare_url)
        .unwrap();
    let index_a = Index::open(dir_a.path()).await.unwrap();
    let service_a = MemoryService::new(index_a, dir_a.path(), "alice", "alice@localhost");

    let created = remember(
        &service_a,
        "alice",
        RememberRequest {
            title: "Shared Note".to_string(),
            content: "original body".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let slug = created.slug.clone();

    Repository::open(dir_a.path()).unwrap().push(None).unwrap();

    let dir_b = TempDir::new().unwrap();
    Repository::clone_repo(&bare_url, None, dir_b.path()).unwrap();
    let index_b = Index::open(dir_b.path()).await.unwrap();
    rebuilder::rebuild(dir_b.path(), &index_b, true).await.unwrap();
    let service_b = MemoryService::new(index_b, dir_b.path(), "bob", "bob@localhost");

    remember(
        &service_a,
        "alice",
        RememberRequest {
            slug: Some(slug.as_str().to_string()),
            title: "Shared Note".to_string(),
            content: "alice's edit".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    Repository::open(dir_a.path()).unwrap().push(None).unwrap();

    remember(
        &service_b,
        "bob",
        RememberRequest {
            slug: Some(slug.as_str().to_string()),
            title: "Shared Note".to_string(),
            content: "bob's edit".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let index_b = Index::open(dir_b.path()).await.unwrap();
    let (report, index_b) =
        cairn::sync::sync(dir_b.path(), None, index_b).await.unwrap();

    assert_eq!(report.pull_outcome, cairn::git::PullOutcome::Conflict);
    assert!(report.conflict_resolution_commit.is_some());
    assert!(report.pushed);
    assert_eq!(report.rebuild.memories_indexed, 1);

    let resolved = index_b.by_slug(&slug).await.unwrap().unwrap();
    assert_eq!(resolved.content, "bob's edit");
}

/// Scenario 6: rebuild reconciliation after the Index loses a row the
/// worktree still has on disk.
#[tokio::test]
async fn rebuild_reconciles_a_missing_index_row() {
    let (service, dir) = new_service().await;

    let a = remember(
        &service,
        "tester",
        RememberRequest {
            title: "Keeper".to_string(),
            content: "stays indexed".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    remember(
        &service,
        "tester",
        RememberRequest {
            title: "Lost Row".to_string(),
            content: "file survives, index row does not".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let memory = service.index.by_slug(&a.slug).await.unwrap().unwrap();
    let _ = memory;

    let lost = service
        .index
        .by_title_substring("lost row", false)
        .await
        .unwrap()
        .remove(0);

    let db_url = format!("sqlite://{}/.cairn/index.db", dir.path().display());
    let raw_pool = sqlx::SqlitePool::connect(&db_url).await.unwrap();
    sqlx::query("DELETE FROM memories WHERE slug = ?")
        .bind(lost.slug.as_str())
        .execute(&raw_pool)
        .await
        .unwrap();
    raw_pool.close().await;

    assert!(service.index.by_slug(&lost.slug).await.unwrap().is_none());

    let refused = rebuilder::rebuild(dir.path(), &service.index, false).await;
    let err = refused.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CairnError>(),
        Some(CairnError::InvalidInput { .. })
    ));

    let report = rebuilder::rebuild(dir.path(), &service.index, true).await.unwrap();
    assert_eq!(report.memories_indexed, 2);

    let recovered = service.index.by_slug(&lost.slug).await.unwrap().unwrap();
    assert_eq!(recovered.slug, lost.slug);
    assert_eq!(recovered.title.as_str(), "Lost Row");

    let text = std::fs::read_to_string(dir.path().join(&recovered.file_path)).unwrap();
    assert_eq!(recovered.content_hash, cairn::markdown::sha256_hex(&text));
}

/// `connect` round-trip, grounded alongside the other scenarios since it is
/// one of the seven tools and the graph invariants (§8) call it out by name.
#[tokio::test]
async fn connect_is_idempotent_and_respects_directionality() {
    let (service, _dir) = new_service().await;

    let a = remember(
        &service,
        "tester",
        RememberRequest {
            title: "Node A".to_string(),
            content: "a".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let b = remember(
        &service,
        "tester",
        RememberRequest {
            title: "Node B".to_string(),
            content: "b".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    connect_service::connect(&service, "tester", a.slug.as_str(), b.slug.as_str(), "related_to", Some(0.5))
        .await
        .unwrap();
    connect_service::connect(&service, "tester", a.slug.as_str(), b.slug.as_str(), "related_to", Some(0.9))
        .await
        .unwrap();

    let forward = service.index.associations_by_source(&a.slug).await.unwrap();
    let backward = service.index.associations_by_source(&b.slug).await.unwrap();
    assert_eq!(forward.len(), 1, "related_to is non-directional but must not duplicate");
    assert_eq!(backward.len(), 1);
    assert_eq!(forward[0].strength.get(), 0.9);

    connect_service::disconnect(&service, "tester", a.slug.as_str(), b.slug.as_str(), "related_to")
        .await
        .unwrap();

    let forward = service.index.associations_by_source(&a.slug).await.unwrap();
    let backward = service.index.associations_by_source(&b.slug).await.unwrap();
    assert!(forward.is_empty());
    assert!(backward.is_empty());
}
