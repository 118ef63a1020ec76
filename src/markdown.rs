//! Markdown Codec: parse/emit a memory document of the shape
//! `---\n<header>\n---\n\n<body>\n`, plus slug generation/validation and
//! title sanitization.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{Annotation, AnnotationType, AssociationType, Strength};
use crate::validation;

const DELIMITER: &str = "---";

/// A single `{target, type, strength}` entry in the header's `associations`
/// sequence. Kept separate from `crate::types::Association` because the
/// header form carries only the target slug as a string — resolution
/// against the Index happens in the Rebuilder / Memory Service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderAssociation {
    pub target: String,
    #[serde(rename = "type")]
    pub association_type: String,
    pub strength: f64,
}

impl HeaderAssociation {
    pub fn association_type(&self) -> Result<AssociationType> {
        AssociationType::parse(&self.association_type)
    }

    pub fn strength(&self) -> Result<Strength> {
        Strength::new(self.strength)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderAnnotation {
    #[serde(rename = "type")]
    pub annotation_type: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The structured header, deserialized from the YAML block between the
/// `---` delimiters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub associations: Vec<HeaderAssociation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<HeaderAnnotation>,
}

/// A parsed memory document: header plus free-form Markdown body.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDoc {
    pub header: Header,
    pub body: String,
}

impl MemoryDoc {
    pub fn annotations(&self) -> Vec<Annotation> {
        self.header
            .annotations
            .iter()
            .filter_map(|a| {
                let annotation_type = match a.annotation_type.as_str() {
                    "context" => AnnotationType::Context,
                    "correction" => AnnotationType::Correction,
                    "clarification" => AnnotationType::Clarification,
                    "deprecated" => AnnotationType::Deprecated,
                    _ => return None,
                };
                Some(Annotation {
                    annotation_type,
                    content: a.content.clone(),
                    created_at: a.created_at,
                })
            })
            .collect()
    }
}

/// Parse a Markdown document with an optional leading `---` header block.
/// If the leading `---` is absent, the body is the whole input and the
/// header is empty (default). An opened-but-unclosed header is a fatal
/// parse error.
pub fn parse(text: &str) -> Result<MemoryDoc> {
    if !text.starts_with(DELIMITER) {
        return Ok(MemoryDoc {
            header: Header::default(),
            body: text.to_string(),
        });
    }

    // The byte right after the opening "---" must be a newline for this to
    // be a header fence and not just a title beginning with dashes.
    let after_open = &text[DELIMITER.len()..];
    if !after_open.starts_with('\n') && !after_open.is_empty() {
        return Ok(MemoryDoc {
            header: Header::default(),
            body: text.to_string(),
        });
    }
    let after_open = after_open.strip_prefix('\n').unwrap_or(after_open);

    let close_marker = format!("\n{DELIMITER}");
    let close_idx = after_open.find(&close_marker).ok_or_else(|| {
        anyhow::anyhow!("header opened with '---' but never closed")
    })?;

    let header_text = &after_open[..close_idx];
    let rest = &after_open[close_idx + close_marker.len()..];
    // `rest` starts with the newline ending the closing delimiter's own
    // line, then the single blank line `emit` always inserts before the
    // body, then the body itself, then the single trailing newline `emit`
    // always appends. Strip exactly those three characters' worth of
    // structure back off rather than every leading/trailing newline, so a
    // body with its own leading or trailing blank lines round-trips intact.
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let body = rest.strip_suffix('\n').unwrap_or(rest);

    let header: Header = serde_yaml::from_str(header_text)
        .map_err(|e| anyhow::anyhow!("failed to parse header YAML: {e}"))?;

    Ok(MemoryDoc {
        header,
        body: body.to_string(),
    })
}

/// Emit a document: the exact inverse of `parse` (modulo header-key order).
pub fn emit(doc: &MemoryDoc) -> Result<String> {
    let header_yaml = serde_yaml::to_string(&doc.header)
        .map_err(|e| anyhow::anyhow!("failed to serialize header: {e}"))?;
    let header_yaml = header_yaml.trim_end();
    Ok(format!(
        "{DELIMITER}\n{header_yaml}\n{DELIMITER}\n\n{}\n",
        doc.body.trim_end_matches('\n')
    ))
}

/// Generate a slug from a title, suffixed with today's (or the given) date.
pub fn generate_slug(title: &str, date: Option<NaiveDate>) -> String {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    validation::generate_slug(title, date)
}

/// Validate a slug, returning `InvalidSlug` (as an error) on failure.
pub fn validate_slug(slug: &str) -> Result<()> {
    validation::validate_slug(slug)
}

/// Trim and drop `\x00-\x1F` / `\x7F` control characters.
pub fn sanitize_title(title: &str) -> String {
    validation::sanitize_title(title)
}

/// SHA-256 hex digest of the full Markdown text. This is the
/// `content_hash` written to the Index (see DESIGN.md for why SHA-256 was
/// chosen over the Rebuilder's FNV-1a).
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// FNV-1a 64-bit hex digest, used only by the Rebuilder to detect whether
/// a duplicate pass has already processed a file. Never compared against
/// `sha256_hex` output — the two hash spaces are independent.
pub fn fnv1a_hex(text: &str) -> String {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in text.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_doc() -> MemoryDoc {
        let now = Utc::now();
        MemoryDoc {
            header: Header {
                id: Some("project-alpha-planning-2026-07-27".to_string()),
                title: "Project Alpha Planning".to_string(),
                tags: vec!["project".to_string(), "planning".to_string()],
                created: now,
                updated: now,
                superseded_by: None,
                associations: vec![HeaderAssociation {
                    target: "project-beta-2026-07-20".to_string(),
                    association_type: "related_to".to_string(),
                    strength: 0.7,
                }],
                annotations: vec![],
            },
            body: "# Goals\n- Q2".to_string(),
        }
    }

    #[test]
    fn parse_emit_round_trips() {
        let doc = sample_doc();
        let text = emit(&doc).unwrap();
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn parse_without_header_keeps_whole_body() {
        let text = "Just a plain body, no frontmatter.";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.header, Header::default());
        assert_eq!(parsed.body, text);
    }

    #[test]
    fn unterminated_header_is_fatal() {
        let text = "---\ntitle: oops\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn fnv1a_and_sha256_are_independent_for_same_input() {
        let text = "hello world";
        assert_ne!(fnv1a_hex(text), sha256_hex(text));
    }

    proptest! {
        #[test]
        fn arbitrary_bodies_round_trip(body in "[ -~\\n]{0,200}") {
            let now = Utc::now();
            let doc = MemoryDoc {
                header: Header {
                    id: None,
                    title: "T".to_string(),
                    tags: vec![],
                    created: now,
                    updated: now,
                    superseded_by: None,
                    associations: vec![],
                    annotations: vec![],
                },
                body,
            };
            let text = emit(&doc).unwrap();
            let parsed = parse(&text).unwrap();
            prop_assert_eq!(parsed.body.trim_end_matches('\n'), doc.body.trim_end_matches('\n'));
        }
    }
}
