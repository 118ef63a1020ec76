//! The Rebuilder: reconstructs the Index from the worktree's Markdown
//! files, used for disaster recovery, after a manual git operation, and as
//! the mandatory step following every sync.
//!
//! Two passes: the first parses every eligible file and assigns slugs, the
//! second links associations now that the full slug set is known (so a
//! file whose associations were added before its target existed still
//! resolves correctly on rebuild).

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use tracing::warn;

use crate::errors::CairnError;
use crate::git::RESERVED_DIRS;
use crate::index::Index;
use crate::markdown::{self, MemoryDoc};
use crate::types::{Association, Memory, Slug, Tag, Title};

#[derive(Debug, Clone, Default)]
pub struct RebuildReport {
    pub memories_indexed: usize,
    pub archived_indexed: usize,
    pub associations_linked: usize,
    pub annotations_attached: usize,
    pub warnings: Vec<String>,
}

struct ParsedFile {
    relative_path: String,
    memory: Memory,
    doc: MemoryDoc,
}

/// Walk `repo_root`, parse every `.md` file into a `Memory`, and replace
/// the Index's contents wholesale. Refuses to run unless `force` is set
/// when the Index is non-empty, since a rebuild is destructive to any
/// index state not backed by the worktree (e.g. in-flight lease locks).
pub async fn rebuild(repo_root: &Path, index: &Index, force: bool) -> Result<RebuildReport> {
    if !force && index.count_memories(true).await? > 0 {
        return Err(CairnError::invalid_input(
            "index already populated; pass force=true to rebuild",
        )
        .into());
    }

    let mut report = RebuildReport::default();
    let mut files = Vec::new();
    walk_markdown_files(repo_root, repo_root, &mut files)?;

    let mut parsed = Vec::with_capacity(files.len());
    let mut seen_slugs: HashSet<Slug> = HashSet::new();
    let mut seen_content_hashes: HashSet<String> = HashSet::new();
    let now = Utc::now();

    for relative_path in files {
        let absolute = repo_root.join(&relative_path);
        let text = match std::fs::read_to_string(&absolute) {
            Ok(text) => text,
            Err(e) => {
                report
                    .warnings
                    .push(format!("unreadable file {relative_path}: {e}"));
                continue;
            }
        };

        let doc = match markdown::parse(&text) {
            Ok(doc) => doc,
            Err(e) => {
                report
                    .warnings
                    .push(format!("parse error in {relative_path}: {e}"));
                continue;
            }
        };

        let slug = match resolve_slug(&doc, &relative_path) {
            Ok(slug) => slug,
            Err(e) => {
                report
                    .warnings
                    .push(format!("invalid slug for {relative_path}: {e}"));
                continue;
            }
        };

        if !seen_slugs.insert(slug.clone()) {
            report
                .warnings
                .push(format!("duplicate slug '{slug}' at {relative_path}, skipping"));
            continue;
        }

        // Internal duplicate-content detector; never compared against the
        // persisted SHA-256 hash.
        let fingerprint = markdown::fnv1a_hex(&text);
        if !seen_content_hashes.insert(fingerprint) {
            report
                .warnings
                .push(format!("byte-identical content re-encountered at {relative_path}"));
        }

        let title = match Title::new(&doc.header.title) {
            Ok(title) => title,
            Err(e) => {
                report
                    .warnings
                    .push(format!("invalid title in {relative_path}: {e}"));
                continue;
            }
        };

        let mut tags = Vec::new();
        for raw_tag in &doc.header.tags {
            match Tag::new(raw_tag) {
                Ok(tag) => tags.push(tag),
                Err(e) => report
                    .warnings
                    .push(format!("invalid tag '{raw_tag}' in {relative_path}: {e}")),
            }
        }

        let is_archived = relative_path.starts_with("archive/");
        let superseded_by = doc.header.superseded_by.as_ref().map(|s| Slug::new_unchecked(s.clone()));

        let memory = Memory {
            slug: slug.clone(),
            title,
            tags,
            created: doc.header.created,
            updated: doc.header.updated,
            content: doc.body.clone(),
            file_path: relative_path.clone(),
            content_hash: markdown::sha256_hex(&text),
            version: 1,
            superseded_by,
            access_count: 0,
            last_accessed_at: None,
            deleted_at: is_archived.then_some(now),
            annotations: doc.annotations(),
        };

        if is_archived {
            report.archived_indexed += 1;
        } else {
            report.memories_indexed += 1;
        }

        parsed.push(ParsedFile {
            relative_path,
            memory,
            doc,
        });
    }

    index.wipe_for_rebuild().await?;

    for file in &parsed {
        index.upsert_memory(&file.memory).await?;
        for annotation in &file.memory.annotations {
            index.insert_annotation(&file.memory.slug, annotation).await?;
        }
    }

    for file in &parsed {
        for header_assoc in &file.doc.header.associations {
            let target = Slug::new_unchecked(header_assoc.target.clone());
            if !seen_slugs.contains(&target) {
                report.warnings.push(format!(
                    "association in {} points at unknown slug '{}'",
                    file.relative_path, header_assoc.target
                ));
                continue;
            }

            let (association_type, strength) =
                match (header_assoc.association_type(), header_assoc.strength()) {
                    (Ok(t), Ok(s)) => (t, s),
                    _ => {
                        report.warnings.push(format!(
                            "malformed association in {}: {:?}",
                            file.relative_path, header_assoc
                        ));
                        continue;
                    }
                };

            index
                .upsert_association(&Association {
                    source: file.memory.slug.clone(),
                    target,
                    association_type,
                    strength,
                })
                .await?;
            report.associations_linked += 1;
        }

        report.annotations_attached += file.memory.annotations.len();
    }

    if !report.warnings.is_empty() {
        warn!(count = report.warnings.len(), "rebuild completed with warnings");
    }

    Ok(report)
}

/// Prefer the header's declared `id`; fall back to the filename stem. Both
/// are validated, since a hand-edited file could carry anything.
fn resolve_slug(doc: &MemoryDoc, relative_path: &str) -> Result<Slug> {
    let candidate = doc
        .header
        .id
        .clone()
        .unwrap_or_else(|| stem_of(relative_path));
    Slug::new(candidate)
}

fn stem_of(relative_path: &str) -> String {
    Path::new(relative_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn walk_markdown_files(repo_root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::result::Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() {
            if RESERVED_DIRS.contains(&name.as_ref()) || name.starts_with('.') {
                continue;
            }
            walk_markdown_files(repo_root, &path, out)?;
            continue;
        }

        if path.extension().and_then(|e| e.to_str()) == Some("md") && !name.eq_ignore_ascii_case("README.md") {
            if let Ok(rel) = path.strip_prefix(repo_root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_memory(dir: &Path, relative: &str, text: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn doc_text(id: &str, title: &str, associations: &str) -> String {
        format!(
            "---\nid: {id}\ntitle: {title}\ntags: []\ncreated: 2026-07-27T00:00:00Z\nupdated: 2026-07-27T00:00:00Z\n{associations}\n---\n\nBody text.\n"
        )
    }

    #[tokio::test]
    async fn rebuild_indexes_files_and_links_associations() {
        let dir = TempDir::new().unwrap();
        write_memory(
            dir.path(),
            "2026/07/alpha-2026-07-27.md",
            &doc_text(
                "alpha-2026-07-27",
                "Alpha",
                "associations:\n  - target: beta-2026-07-27\n    type: related_to\n    strength: 0.6",
            ),
        );
        write_memory(
            dir.path(),
            "2026/07/beta-2026-07-27.md",
            &doc_text("beta-2026-07-27", "Beta", ""),
        );

        let index = Index::open_url("sqlite::memory:").await.unwrap();
        let report = rebuild(dir.path(), &index, true).await.unwrap();

        assert_eq!(report.memories_indexed, 2);
        assert_eq!(report.associations_linked, 1);
        assert!(report.warnings.is_empty());

        let alpha = index
            .by_slug(&Slug::new_unchecked("alpha-2026-07-27".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alpha.title.as_str(), "Alpha");
    }

    #[tokio::test]
    async fn rebuild_warns_on_dangling_association() {
        let dir = TempDir::new().unwrap();
        write_memory(
            dir.path(),
            "2026/07/alpha-2026-07-27.md",
            &doc_text(
                "alpha-2026-07-27",
                "Alpha",
                "associations:\n  - target: ghost-2026-07-27\n    type: related_to\n    strength: 0.5",
            ),
        );

        let index = Index::open_url("sqlite::memory:").await.unwrap();
        let report = rebuild(dir.path(), &index, true).await.unwrap();

        assert_eq!(report.associations_linked, 0);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn rebuild_refuses_without_force_on_populated_index() {
        let dir = TempDir::new().unwrap();
        write_memory(
            dir.path(),
            "2026/07/alpha-2026-07-27.md",
            &doc_text("alpha-2026-07-27", "Alpha", ""),
        );

        let index = Index::open_url("sqlite::memory:").await.unwrap();
        rebuild(dir.path(), &index, true).await.unwrap();

        let err = rebuild(dir.path(), &index, false).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CairnError>(),
            Some(CairnError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn archived_files_are_counted_separately() {
        let dir = TempDir::new().unwrap();
        write_memory(
            dir.path(),
            "archive/old-2026-01-01.md",
            &doc_text("old-2026-01-01", "Old", ""),
        );

        let index = Index::open_url("sqlite::memory:").await.unwrap();
        let report = rebuild(dir.path(), &index, true).await.unwrap();

        assert_eq!(report.archived_indexed, 1);
        assert_eq!(report.memories_indexed, 0);
    }
}
