//! Per-user index schema and migrations. Run once on `Index::open`;
//! idempotent, following the spec's "migrations run to current version;
//! indexes created idempotently" (§4.5).

use anyhow::Result;
use sqlx::SqlitePool;

/// Current schema version. Bump and append a migration when the shape of
/// a table changes.
pub const SCHEMA_VERSION: i64 = 1;

const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS memories (
    slug TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created TEXT NOT NULL,
    updated TEXT NOT NULL,
    file_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    superseded_by TEXT,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,
    deleted_at TEXT,
    FOREIGN KEY (superseded_by) REFERENCES memories(slug)
);

CREATE INDEX IF NOT EXISTS idx_memories_updated ON memories(updated);
CREATE INDEX IF NOT EXISTS idx_memories_deleted_at ON memories(deleted_at);

CREATE TABLE IF NOT EXISTS tags (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS memory_tags (
    memory_slug TEXT NOT NULL REFERENCES memories(slug) ON DELETE CASCADE,
    tag_name TEXT NOT NULL REFERENCES tags(name) ON DELETE CASCADE,
    PRIMARY KEY (memory_slug, tag_name)
);

CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag_name);

CREATE TABLE IF NOT EXISTS associations (
    source_slug TEXT NOT NULL REFERENCES memories(slug) ON DELETE CASCADE,
    target_slug TEXT NOT NULL REFERENCES memories(slug) ON DELETE CASCADE,
    association_type TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 0.5,
    PRIMARY KEY (source_slug, target_slug, association_type)
);

CREATE INDEX IF NOT EXISTS idx_associations_source ON associations(source_slug);
CREATE INDEX IF NOT EXISTS idx_associations_target ON associations(target_slug);

CREATE TABLE IF NOT EXISTS annotations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_slug TEXT NOT NULL REFERENCES memories(slug) ON DELETE CASCADE,
    annotation_type TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_annotations_memory ON annotations(memory_slug);

CREATE TABLE IF NOT EXISTS embeddings (
    slug TEXT PRIMARY KEY REFERENCES memories(slug) ON DELETE CASCADE,
    content_hash TEXT NOT NULL,
    model_version TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lease_locks (
    slug TEXT PRIMARY KEY,
    locked_by TEXT NOT NULL,
    locked_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1
);
"#;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(MIGRATION_V1).execute(pool).await?;

    let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_meta LIMIT 1")
        .fetch_optional(pool)
        .await?;

    match current {
        None => {
            sqlx::query("INSERT INTO schema_meta (version) VALUES (?)")
                .bind(SCHEMA_VERSION)
                .execute(pool)
                .await?;
        }
        Some((version,)) if version < SCHEMA_VERSION => {
            sqlx::query("UPDATE schema_meta SET version = ?")
                .bind(SCHEMA_VERSION)
                .execute(pool)
                .await?;
        }
        _ => {}
    }

    Ok(())
}
