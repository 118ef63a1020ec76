//! Per-user Index: CRUD for memories, tags, associations, annotations,
//! and embeddings. Co-located with the git worktree under the
//! reserved internal directory (`.cairn/index.db`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::errors::CairnError;
use crate::index::schema;
use crate::types::{
    Annotation, AnnotationType, Association, AssociationType, EmbeddingRecord, Memory, Slug,
    Strength, Tag, Title,
};

#[derive(Clone)]
pub struct Index {
    pool: SqlitePool,
}

/// Fields a `remember` update is allowed to touch, used by both
/// `upsert_memory` and the Locker's version-gated updates.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub title: Option<Title>,
    pub content_hash: Option<String>,
    pub file_path: Option<String>,
    pub superseded_by: Option<Option<Slug>>,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub include_archived: bool,
}

impl Index {
    /// Open (creating if absent) the index file under `<repo_root>/.cairn/index.db`.
    pub async fn open(repo_root: impl AsRef<Path>) -> Result<Self> {
        let internal_dir = repo_root.as_ref().join(".cairn");
        std::fs::create_dir_all(&internal_dir)
            .with_context(|| format!("creating internal directory at {internal_dir:?}"))?;
        let db_path = internal_dir.join("index.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        Self::open_url(&url).await
    }

    pub async fn open_url(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("opening index database")?;
        schema::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Close the underlying connection pool. Must be called before git
    /// mutates the worktree under it.
    pub async fn close(self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_memory(&self, memory: &Memory) -> Result<()> {
        memory.validate_invariants()?;

        let existing = self.by_slug_unscoped(&memory.slug).await?;
        if existing.is_some() {
            return Err(CairnError::AlreadyExists {
                what: format!("memory '{}'", memory.slug),
            }
            .into());
        }

        self.upsert_memory(memory).await
    }

    pub async fn upsert_memory(&self, memory: &Memory) -> Result<()> {
        sqlx::query(
            "INSERT INTO memories \
             (slug, title, created, updated, file_path, content_hash, version, \
              superseded_by, access_count, last_accessed_at, deleted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(slug) DO UPDATE SET \
               title = excluded.title, \
               updated = excluded.updated, \
               file_path = excluded.file_path, \
               content_hash = excluded.content_hash, \
               version = excluded.version, \
               superseded_by = excluded.superseded_by, \
               access_count = excluded.access_count, \
               last_accessed_at = excluded.last_accessed_at, \
               deleted_at = excluded.deleted_at",
        )
        .bind(memory.slug.as_str())
        .bind(memory.title.as_str())
        .bind(memory.created.to_rfc3339())
        .bind(memory.updated.to_rfc3339())
        .bind(&memory.file_path)
        .bind(&memory.content_hash)
        .bind(memory.version)
        .bind(memory.superseded_by.as_ref().map(|s| s.as_str().to_string()))
        .bind(memory.access_count)
        .bind(memory.last_accessed_at.map(|t| t.to_rfc3339()))
        .bind(memory.deleted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        self.replace_tags(&memory.slug, &memory.tags).await?;

        Ok(())
    }

    pub async fn set_tags(&self, slug: &Slug, tags: &[Tag]) -> Result<()> {
        self.replace_tags(slug, tags).await
    }

    async fn replace_tags(&self, slug: &Slug, tags: &[Tag]) -> Result<()> {
        sqlx::query("DELETE FROM memory_tags WHERE memory_slug = ?")
            .bind(slug.as_str())
            .execute(&self.pool)
            .await?;

        for tag in tags {
            self.upsert_tag(tag).await?;
            sqlx::query(
                "INSERT OR IGNORE INTO memory_tags (memory_slug, tag_name) VALUES (?, ?)",
            )
            .bind(slug.as_str())
            .bind(tag.as_str())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    pub async fn upsert_tag(&self, tag: &Tag) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO tags (name) VALUES (?)")
            .bind(tag.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, slug: &Slug, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE memories SET deleted_at = ? WHERE slug = ?")
            .bind(at.to_rfc3339())
            .bind(slug.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CairnError::not_found(format!("memory '{slug}'")).into());
        }
        Ok(())
    }

    /// Clear `deleted_at`, update `updated`, and set `file_path` — the
    /// unscoped restore path.
    pub async fn restore_unscoped(
        &self,
        slug: &Slug,
        new_file_path: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE memories SET deleted_at = NULL, updated = ?, file_path = ? WHERE slug = ?",
        )
        .bind(now.to_rfc3339())
        .bind(new_file_path)
        .bind(slug.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CairnError::not_found(format!("memory '{slug}'")).into());
        }
        Ok(())
    }

    pub async fn list(&self, options: &ListOptions) -> Result<Vec<Memory>> {
        let rows = if options.include_archived {
            sqlx::query(MEMORY_SELECT)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(&format!("{MEMORY_SELECT} WHERE deleted_at IS NULL"))
                .fetch_all(&self.pool)
                .await?
        };

        let mut memories = Vec::with_capacity(rows.len());
        for row in rows {
            memories.push(self.hydrate(row).await?);
        }
        memories.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(memories)
    }

    pub async fn by_slug(&self, slug: &Slug) -> Result<Option<Memory>> {
        let row = sqlx::query(&format!("{MEMORY_SELECT} WHERE slug = ? AND deleted_at IS NULL"))
            .bind(slug.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn by_slug_unscoped(&self, slug: &Slug) -> Result<Option<Memory>> {
        let row = sqlx::query(&format!("{MEMORY_SELECT} WHERE slug = ?"))
            .bind(slug.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn by_title_substring(&self, needle: &str, include_archived: bool) -> Result<Vec<Memory>> {
        let pattern = format!("%{}%", needle.to_lowercase());
        let sql = if include_archived {
            format!("{MEMORY_SELECT} WHERE LOWER(title) LIKE ?")
        } else {
            format!("{MEMORY_SELECT} WHERE LOWER(title) LIKE ? AND deleted_at IS NULL")
        };
        let rows = sqlx::query(&sql).bind(pattern).fetch_all(&self.pool).await?;

        let mut memories = Vec::with_capacity(rows.len());
        for row in rows {
            memories.push(self.hydrate(row).await?);
        }
        Ok(memories)
    }

    pub async fn by_tag_substring(&self, needle: &str) -> Result<Vec<Memory>> {
        let pattern = format!("%{}%", needle.to_lowercase());
        let rows = sqlx::query(&format!(
            "{MEMORY_SELECT} WHERE deleted_at IS NULL AND slug IN \
             (SELECT memory_slug FROM memory_tags WHERE LOWER(tag_name) LIKE ?)"
        ))
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        let mut memories = Vec::with_capacity(rows.len());
        for row in rows {
            memories.push(self.hydrate(row).await?);
        }
        Ok(memories)
    }

    pub async fn memories_for_slugs(&self, slugs: &[Slug]) -> Result<Vec<Memory>> {
        let mut memories = Vec::with_capacity(slugs.len());
        for slug in slugs {
            if let Some(m) = self.by_slug(slug).await? {
                memories.push(m);
            }
        }
        Ok(memories)
    }

    pub async fn bump_access(&self, slug: &Slug, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ? WHERE slug = ?",
        )
        .bind(at.to_rfc3339())
        .bind(slug.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn hydrate(&self, row: sqlx::sqlite::SqliteRow) -> Result<Memory> {
        let slug_str: String = row.try_get("slug")?;
        let slug = Slug::new_unchecked(slug_str);

        let tags = self.tags_for_memory(&slug).await?;
        let annotations = self.annotations_for_memory(&slug).await?;

        let superseded_by: Option<String> = row.try_get("superseded_by")?;
        let last_accessed_at: Option<String> = row.try_get("last_accessed_at")?;
        let deleted_at: Option<String> = row.try_get("deleted_at")?;
        let title: String = row.try_get("title")?;

        Ok(Memory {
            slug,
            title: Title::new(title)?,
            tags,
            created: parse_rfc3339(row.try_get("created")?)?,
            updated: parse_rfc3339(row.try_get("updated")?)?,
            content: String::new(),
            file_path: row.try_get("file_path")?,
            content_hash: row.try_get("content_hash")?,
            version: row.try_get("version")?,
            superseded_by: superseded_by.map(Slug::new_unchecked),
            access_count: row.try_get("access_count")?,
            last_accessed_at: last_accessed_at.map(parse_rfc3339).transpose()?,
            deleted_at: deleted_at.map(parse_rfc3339).transpose()?,
            annotations,
        })
    }

    pub async fn tags_for_memory(&self, slug: &Slug) -> Result<Vec<Tag>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT tag_name FROM memory_tags WHERE memory_slug = ? ORDER BY tag_name",
        )
        .bind(slug.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|(name,)| Tag::new(name)).collect()
    }

    pub async fn annotations_for_memory(&self, slug: &Slug) -> Result<Vec<Annotation>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT annotation_type, content, created_at FROM annotations \
             WHERE memory_slug = ? ORDER BY id",
        )
        .bind(slug.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(annotation_type, content, created_at)| {
                Ok(Annotation {
                    annotation_type: parse_annotation_type(&annotation_type)?,
                    content,
                    created_at: parse_rfc3339(created_at)?,
                })
            })
            .collect()
    }

    pub async fn insert_annotation(&self, slug: &Slug, annotation: &Annotation) -> Result<()> {
        sqlx::query(
            "INSERT INTO annotations (memory_slug, annotation_type, content, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(slug.as_str())
        .bind(annotation.annotation_type.as_str())
        .bind(&annotation.content)
        .bind(annotation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_association(&self, assoc: &Association) -> Result<()> {
        sqlx::query(
            "INSERT INTO associations (source_slug, target_slug, association_type, strength) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(source_slug, target_slug, association_type) \
             DO UPDATE SET strength = excluded.strength",
        )
        .bind(assoc.source.as_str())
        .bind(assoc.target.as_str())
        .bind(assoc.association_type.as_str())
        .bind(assoc.strength.get())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_association(
        &self,
        source: &Slug,
        target: &Slug,
        association_type: AssociationType,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM associations WHERE source_slug = ? AND target_slug = ? AND association_type = ?",
        )
        .bind(source.as_str())
        .bind(target.as_str())
        .bind(association_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn associations_by_source(&self, slug: &Slug) -> Result<Vec<Association>> {
        let rows: Vec<(String, String, String, f64)> = sqlx::query_as(
            "SELECT source_slug, target_slug, association_type, strength FROM associations \
             WHERE source_slug = ?",
        )
        .bind(slug.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows_to_associations(rows)
    }

    pub async fn associations_by_target(&self, slug: &Slug) -> Result<Vec<Association>> {
        let rows: Vec<(String, String, String, f64)> = sqlx::query_as(
            "SELECT source_slug, target_slug, association_type, strength FROM associations \
             WHERE target_slug = ?",
        )
        .bind(slug.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows_to_associations(rows)
    }

    pub async fn upsert_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        let vector_bytes: Vec<u8> = record
            .vector
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();

        sqlx::query(
            "INSERT INTO embeddings (slug, content_hash, model_version, dimensions, vector, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(slug) DO UPDATE SET \
               content_hash = excluded.content_hash, \
               model_version = excluded.model_version, \
               dimensions = excluded.dimensions, \
               vector = excluded.vector, \
               created_at = excluded.created_at",
        )
        .bind(record.slug.as_str())
        .bind(&record.content_hash)
        .bind(&record.model_version)
        .bind(record.dimensions as i64)
        .bind(vector_bytes)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_embedding(&self, slug: &Slug) -> Result<Option<EmbeddingRecord>> {
        let row: Option<(String, String, i64, Vec<u8>, String)> = sqlx::query_as(
            "SELECT content_hash, model_version, dimensions, vector, created_at \
             FROM embeddings WHERE slug = ?",
        )
        .bind(slug.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(|(content_hash, model_version, dimensions, vector, created_at)| {
            (content_hash, model_version, dimensions, vector, created_at)
        });

        match row {
            None => Ok(None),
            Some((content_hash, model_version, dimensions, vector_bytes, created_at)) => {
                let vector = vector_bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(Some(EmbeddingRecord {
                    slug: slug.clone(),
                    content_hash,
                    model_version,
                    dimensions: dimensions as usize,
                    vector,
                    created_at: parse_rfc3339(created_at)?,
                }))
            }
        }
    }

    pub async fn delete_embedding(&self, slug: &Slug) -> Result<()> {
        sqlx::query("DELETE FROM embeddings WHERE slug = ?")
            .bind(slug.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_memories(&self, include_archived: bool) -> Result<i64> {
        let sql = if include_archived {
            "SELECT COUNT(*) FROM memories"
        } else {
            "SELECT COUNT(*) FROM memories WHERE deleted_at IS NULL"
        };
        let (count,): (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Hard-delete everything for a `force` rebuild.
    pub async fn wipe_for_rebuild(&self) -> Result<()> {
        sqlx::query("DELETE FROM memory_tags").execute(&self.pool).await?;
        sqlx::query("DELETE FROM associations").execute(&self.pool).await?;
        sqlx::query("DELETE FROM annotations").execute(&self.pool).await?;
        sqlx::query("DELETE FROM embeddings").execute(&self.pool).await?;
        sqlx::query("DELETE FROM memories").execute(&self.pool).await?;
        sqlx::query("DELETE FROM tags").execute(&self.pool).await?;
        Ok(())
    }
}

const MEMORY_SELECT: &str = "SELECT slug, title, created, updated, file_path, content_hash, \
     version, superseded_by, access_count, last_accessed_at, deleted_at FROM memories";

fn parse_rfc3339(raw: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("invalid timestamp in index: {raw}"))?
        .with_timezone(&Utc))
}

fn parse_annotation_type(raw: &str) -> Result<AnnotationType> {
    match raw {
        "context" => Ok(AnnotationType::Context),
        "correction" => Ok(AnnotationType::Correction),
        "clarification" => Ok(AnnotationType::Clarification),
        "deprecated" => Ok(AnnotationType::Deprecated),
        other => Err(anyhow::anyhow!("unknown annotation type in index: {other}")),
    }
}

fn rows_to_associations(rows: Vec<(String, String, String, f64)>) -> Result<Vec<Association>> {
    rows.into_iter()
        .map(|(source, target, association_type, strength)| {
            Ok(Association {
                source: Slug::new_unchecked(source),
                target: Slug::new_unchecked(target),
                association_type: AssociationType::parse(&association_type)?,
                strength: Strength::new(strength)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Title;

    fn sample_memory(slug: &str) -> Memory {
        let now = Utc::now();
        Memory {
            slug: Slug::new_unchecked(slug.to_string()),
            title: Title::new("Sample Memory").unwrap(),
            tags: vec![Tag::new("project").unwrap()],
            created: now,
            updated: now,
            content: "body".to_string(),
            file_path: format!("2026/07/{slug}.md"),
            content_hash: "abc123".to_string(),
            version: 1,
            superseded_by: None,
            access_count: 0,
            last_accessed_at: None,
            deleted_at: None,
            annotations: vec![],
        }
    }

    async fn memory_index() -> Index {
        Index::open_url("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_then_read_back_by_slug() {
        let index = memory_index().await;
        let memory = sample_memory("sample-memory-2026-07-27");
        index.create_memory(&memory).await.unwrap();

        let fetched = index.by_slug(&memory.slug).await.unwrap().unwrap();
        assert_eq!(fetched.title, memory.title);
        assert_eq!(fetched.tags, memory.tags);
    }

    #[tokio::test]
    async fn create_twice_is_already_exists() {
        let index = memory_index().await;
        let memory = sample_memory("dup-2026-07-27");
        index.create_memory(&memory).await.unwrap();
        let err = index.create_memory(&memory).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CairnError>(),
            Some(CairnError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn soft_delete_then_restore_round_trips() {
        let index = memory_index().await;
        let memory = sample_memory("archive-me-2026-07-27");
        index.create_memory(&memory).await.unwrap();

        index.soft_delete(&memory.slug, Utc::now()).await.unwrap();
        assert!(index.by_slug(&memory.slug).await.unwrap().is_none());
        assert!(index.by_slug_unscoped(&memory.slug).await.unwrap().is_some());

        index
            .restore_unscoped(&memory.slug, &memory.file_path, Utc::now())
            .await
            .unwrap();
        assert!(index.by_slug(&memory.slug).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tag_substring_search_matches_case_insensitively() {
        let index = memory_index().await;
        let memory = sample_memory("tagged-2026-07-27");
        index.create_memory(&memory).await.unwrap();

        let results = index.by_tag_substring("PROJ").await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn association_upsert_is_idempotent() {
        let index = memory_index().await;
        let a = sample_memory("a-2026-07-27");
        let b = sample_memory("b-2026-07-27");
        index.create_memory(&a).await.unwrap();
        index.create_memory(&b).await.unwrap();

        let assoc = Association {
            source: a.slug.clone(),
            target: b.slug.clone(),
            association_type: AssociationType::RelatedTo,
            strength: Strength::default(),
        };
        index.upsert_association(&assoc).await.unwrap();
        index.upsert_association(&assoc).await.unwrap();

        let edges = index.associations_by_source(&a.slug).await.unwrap();
        assert_eq!(edges.len(), 1);
    }
}
