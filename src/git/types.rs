//! Git-specific types and data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote credential, in whatever form `git2`'s credentials callback
/// needs (username/password, or a personal access token used as the
/// password half of a basic-auth challenge). Decrypted just-in-time from
/// the system Index by the caller; never logged.
#[derive(Clone)]
pub struct RemoteCredential {
    pub username: String,
    pub secret: String,
}

/// A single entry in `Repository::history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub files_changed: Vec<String>,
}

/// A single matched line from `Repository::grep`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepMatch {
    pub relative_path: String,
    pub line_number: usize,
    pub line: String,
    pub match_start: usize,
    pub match_end: usize,
}

/// A line-level diff between two refs for one path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiffResult {
    pub additions: Vec<String>,
    pub deletions: Vec<String>,
    pub hunks: Vec<DiffHunk>,
}

/// A unified-diff-style hunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffHunk {
    pub from_start: usize,
    pub from_lines: usize,
    pub to_start: usize,
    pub to_lines: usize,
    pub lines: Vec<String>,
}

/// Recognized text extensions for `Repository::grep`.
pub const GREP_EXTENSIONS: &[&str] = &[
    "md", "txt", "json", "yaml", "yml", "xml", "html", "css", "js", "ts", "go", "py", "rb", "java",
    "c", "h", "cpp", "rs", "sh", "bash", "zsh", "toml", "ini", "cfg", "conf", "markdown",
];

/// Outcome of a sync-related remote operation, distinguishing
/// already-up-to-date (not an error) from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    Updated,
    AlreadyUpToDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grep_extensions_cover_markdown_and_code() {
        assert!(GREP_EXTENSIONS.contains(&"md"));
        assert!(GREP_EXTENSIONS.contains(&"rs"));
        assert!(!GREP_EXTENSIONS.contains(&"bin"));
    }
}
