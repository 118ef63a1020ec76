// Validated types and the core data model.
//
// Mirrors the strongly-typed-wrapper approach used throughout this crate's
// architectural donor: values that violate an invariant simply cannot be
// constructed, which pushes validation to the edges instead of scattering
// `if` checks through the service layer.

use anyhow::{bail, ensure, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::validation;

/// A slug: the stable, per-user-unique short identifier of a memory.
///
/// # Invariants
/// - 3..=200 chars
/// - lowercase alphanumeric with internal dashes only
/// - must start and end with `[a-z0-9]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        validation::validate_slug(&raw)?;
        Ok(Self(raw))
    }

    /// Construct without validation. Only safe for values already known to
    /// satisfy the invariant (e.g. freshly generated by `generate_slug`, or
    /// read back from the index where it was validated on write).
    pub(crate) fn new_unchecked(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A sanitized, non-empty title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Title(String);

impl Title {
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let sanitized = validation::sanitize_title(raw.as_ref());
        ensure!(!sanitized.is_empty(), "title is empty after sanitization");
        Ok(Self(sanitized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tag name: free text, but never empty and never containing newlines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        ensure!(!trimmed.is_empty(), "tag cannot be empty");
        ensure!(!trimmed.contains('\n'), "tag cannot contain a newline");
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase, whitespace-to-dash form used by the Organizer for
    /// deriving directory names.
    pub fn kebab(&self) -> String {
        validation::kebab(&self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed directed edge kind between two memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationType {
    RelatedTo,
    References,
    Follows,
    Precedes,
    Supersedes,
    PartOf,
    RelatedProject,
    Person,
}

impl AssociationType {
    pub const ALL: [AssociationType; 8] = [
        AssociationType::RelatedTo,
        AssociationType::References,
        AssociationType::Follows,
        AssociationType::Precedes,
        AssociationType::Supersedes,
        AssociationType::PartOf,
        AssociationType::RelatedProject,
        AssociationType::Person,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationType::RelatedTo => "related_to",
            AssociationType::References => "references",
            AssociationType::Follows => "follows",
            AssociationType::Precedes => "precedes",
            AssociationType::Supersedes => "supersedes",
            AssociationType::PartOf => "part_of",
            AssociationType::RelatedProject => "related_project",
            AssociationType::Person => "person",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == raw)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|t| t.as_str()).collect();
                anyhow::anyhow!(
                    "unknown relationship '{raw}'; expected one of: {}",
                    names.join(", ")
                )
            })
    }

    /// Non-directional types get a reverse edge created automatically;
    /// directional types do not (see Association).
    pub fn is_directional(&self) -> bool {
        matches!(
            self,
            AssociationType::Follows
                | AssociationType::Precedes
                | AssociationType::Supersedes
                | AssociationType::PartOf
        )
    }
}

impl fmt::Display for AssociationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Edge strength, clamped to [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Strength(f64);

impl Strength {
    pub const DEFAULT: Strength = Strength(0.5);

    pub fn new(value: f64) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&value),
            "strength must be within [0.0, 1.0], got {value}"
        );
        Ok(Self(value))
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

impl Default for Strength {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationType {
    Context,
    Correction,
    Clarification,
    Deprecated,
}

impl AnnotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationType::Context => "context",
            AnnotationType::Correction => "correction",
            AnnotationType::Clarification => "clarification",
            AnnotationType::Deprecated => "deprecated",
        }
    }

    /// Infer the annotation type from free-form note text by keyword.
    pub fn infer(note: &str) -> Self {
        let lower = note.to_lowercase();
        const CORRECTION_KEYWORDS: [&str; 4] = ["wrong", "incorrect", "error", "mistake"];
        const CORRECTION_EXTRA: &str = "fix";
        const CLARIFICATION_KEYWORDS: [&str; 4] = ["clarify", "clarification", "note", "actually"];
        const DEPRECATED_KEYWORDS: [&str; 4] = ["deprecated", "outdated", "old", "superseded"];

        if CORRECTION_KEYWORDS.iter().any(|k| lower.contains(k)) || lower.contains(CORRECTION_EXTRA)
        {
            AnnotationType::Correction
        } else if CLARIFICATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            AnnotationType::Clarification
        } else if DEPRECATED_KEYWORDS.iter().any(|k| lower.contains(k)) {
            AnnotationType::Deprecated
        } else {
            AnnotationType::Context
        }
    }
}

impl fmt::Display for AnnotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An association (typed directed edge) between two memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub source: Slug,
    pub target: Slug,
    pub association_type: AssociationType,
    pub strength: Strength,
}

/// A header-and-body annotation attached to a memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub annotation_type: AnnotationType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The primary entity: one Markdown memory, mirrored between the worktree
/// file and the Index row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub slug: Slug,
    pub title: Title,
    pub tags: Vec<Tag>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub content: String,
    pub file_path: String,
    pub content_hash: String,
    pub version: i64,
    pub superseded_by: Option<Slug>,
    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub annotations: Vec<Annotation>,
}

impl Memory {
    pub fn is_archived(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn validate_invariants(&self) -> Result<()> {
        ensure!(self.version >= 1, "version must be >= 1");
        if self.deleted_at.is_some() {
            ensure!(
                self.file_path.starts_with("archive/"),
                "archived memory must live under archive/"
            );
        }
        Ok(())
    }
}

/// An advisory per-slug lease lock row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseLock {
    pub slug: Slug,
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub version: i64,
}

/// Embedding metadata, keyed by slug. The vector payload itself is opaque
/// to this crate; the seam to an external provider is `EmbeddingProvider`
/// (see `crate::embeddings`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub slug: Slug,
    pub content_hash: String,
    pub model_version: String,
    pub dimensions: usize,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// A system-wide (not per-user) repo registration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRecord {
    pub user_id: String,
    pub repo_path: String,
    pub encrypted_remote_credential: Option<String>,
}

/// A parsed `since` window, used by `recall`/`history`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinceWindow {
    Date(DateTime<Utc>),
    RelativeDays(i64),
    RelativeWeeks(i64),
    RelativeMonths(i64),
}

impl SinceWindow {
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(days) = raw.strip_suffix('d') {
            let n: i64 = days
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid relative-days window: '{raw}'"))?;
            return Ok(SinceWindow::RelativeDays(n));
        }
        if let Some(weeks) = raw.strip_suffix('w') {
            let n: i64 = weeks
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid relative-weeks window: '{raw}'"))?;
            return Ok(SinceWindow::RelativeWeeks(n));
        }
        if let Some(months) = raw.strip_suffix('m') {
            let n: i64 = months
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid relative-months window: '{raw}'"))?;
            return Ok(SinceWindow::RelativeMonths(n));
        }
        // ISO-8601 date or date-time.
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(SinceWindow::Date(dt.with_timezone(&Utc)));
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            let dt = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| anyhow::anyhow!("invalid date: '{raw}'"))?;
            return Ok(SinceWindow::Date(DateTime::from_naive_utc_and_offset(
                dt, Utc,
            )));
        }
        bail!("cannot parse 'since' window: '{raw}'");
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            SinceWindow::Date(dt) => *dt,
            SinceWindow::RelativeDays(n) => now - chrono::Duration::days(*n),
            SinceWindow::RelativeWeeks(n) => now - chrono::Duration::weeks(*n),
            SinceWindow::RelativeMonths(n) => now - chrono::Duration::days(n * 30),
        }
    }
}
