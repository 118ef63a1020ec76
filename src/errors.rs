// Error taxonomy for Cairn.
//
// Internal code paths thread `anyhow::Result` with `.context(...)` for
// diagnostics; the dispatch layer downcasts to `CairnError` so the tool
// surface can report a single structured error string (see §7 of the spec).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CairnError {
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("archived: {what}")]
    Archived { what: String },

    #[error("already exists: {what}")]
    AlreadyExists { what: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("version conflict: expected version {expected}, row has moved on")]
    VersionConflict { expected: i64 },

    #[error("lock not held for '{slug}'")]
    LockNotHeld { slug: String },

    #[error("merge conflict: {detail}")]
    MergeConflict { detail: String },

    #[error("nothing to commit")]
    NothingToCommit,

    #[error("remote credential missing or undecryptable")]
    RemoteAuthMissing,

    #[error("remote operation failed: {detail}")]
    RemoteFailure { detail: String },

    #[error("markdown parse error: {detail}")]
    ParseError { detail: String },

    #[error("cryptographic operation failed: {detail}")]
    CryptoFailure { detail: String },

    #[error("fatal: {detail}")]
    Fatal { detail: String },
}

impl CairnError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn archived(what: impl Into<String>) -> Self {
        Self::Archived { what: what.into() }
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Downcast an `anyhow::Error` to a `CairnError` where possible, else
    /// classify it as `Fatal`. Used by the tool dispatcher to shape the
    /// single structured error the protocol returns.
    pub fn classify(err: &anyhow::Error) -> String {
        if let Some(cairn_err) = err.downcast_ref::<CairnError>() {
            cairn_err.to_string()
        } else {
            format!("fatal: {err:#}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_preserves_structured_errors() {
        let err = anyhow::Error::new(CairnError::VersionConflict { expected: 3 });
        assert_eq!(
            CairnError::classify(&err),
            "version conflict: expected version 3, row has moved on"
        );
    }

    #[test]
    fn classify_falls_back_to_fatal() {
        let err = anyhow::anyhow!("disk on fire");
        assert!(CairnError::classify(&err).starts_with("fatal:"));
    }
}
