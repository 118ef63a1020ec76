// Validation Layer
// Runtime validation shared by the Codec, Organizer, and the validated
// newtypes in `types.rs`. Kept standalone (rather than folded into
// `types.rs`) because the Markdown Codec needs these as free functions
// before it has a `Slug`/`Title` to hand back.

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static SLUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("static regex"));

/// Validate a slug: 3..=200 chars, lowercase alphanumeric with
/// internal dashes, must start and end with `[a-z0-9]`.
pub fn validate_slug(slug: &str) -> Result<()> {
    let len = slug.chars().count();
    if !(3..=200).contains(&len) {
        bail!("slug length must be between 3 and 200 characters, got {len}");
    }
    if !SLUG_PATTERN.is_match(slug) {
        bail!(
            "slug '{slug}' must be lowercase alphanumeric with internal dashes only, \
             starting and ending with a letter or digit"
        );
    }
    Ok(())
}

/// Strip control characters (`\x00-\x1F`, `\x7F`) and trim whitespace.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(*c, '\x00'..='\x1F' | '\x7F'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Generate a slug from a title: lowercase, strip non-`[a-z0-9\s-]`,
/// collapse whitespace/dashes, trim, suffix `-YYYY-MM-DD`.
pub fn generate_slug(title: &str, date: chrono::NaiveDate) -> String {
    let lowered = title.to_lowercase();
    let filtered: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c.is_whitespace() || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();

    static COLLAPSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s-]+").expect("static regex"));
    let collapsed = COLLAPSE.replace_all(&filtered, "-");
    let trimmed = collapsed.trim_matches('-');

    let base = if trimmed.is_empty() {
        "memory".to_string()
    } else {
        trimmed.to_string()
    };

    format!("{base}-{}", date.format("%Y-%m-%d"))
}

/// Lowercase + whitespace-to-dash, used by the Organizer for directory
/// components (tag and category folder names).
pub fn kebab(raw: &str) -> String {
    static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
    WHITESPACE.replace_all(raw.trim(), "-").to_lowercase()
}
