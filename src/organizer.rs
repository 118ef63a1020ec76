//! Organizer: derives the canonical on-disk path for a memory and its
//! archive path.

use chrono::{DateTime, Utc};

use crate::types::{Slug, Tag};
use crate::validation::kebab;

/// Inputs the Organizer needs to place a memory; these come from the
/// Memory Service's `remember` handling, not from the Memory struct
/// itself (a category override only exists at creation time).
#[derive(Debug, Clone, Default)]
pub struct PlacementInput<'a> {
    pub category: Option<&'a str>,
    pub tags: &'a [Tag],
}

/// Decide the canonical path for a new memory:
/// 1. category given -> `<year>/<month>/<category-kebab>/<slug>.md`
/// 2. else tags non-empty -> `tags/<first-tag-kebab>/<slug>.md`
/// 3. else -> `<year>/<month>/<slug>.md`
pub fn canonical_path(slug: &Slug, created: DateTime<Utc>, input: &PlacementInput<'_>) -> String {
    let year = created.format("%Y");
    let month = created.format("%m");

    if let Some(category) = input.category {
        return format!("{year}/{month}/{}/{slug}.md", kebab(category));
    }
    if let Some(first_tag) = input.tags.first() {
        return format!("tags/{}/{slug}.md", first_tag.kebab());
    }
    format!("{year}/{month}/{slug}.md")
}

/// Archive path is always `archive/<slug>.md`.
pub fn archive_path(slug: &Slug) -> String {
    format!("archive/{slug}.md")
}
