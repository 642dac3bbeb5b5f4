use thiserror::Error;

/// Errors from loading a module document.
///
/// `Clone` so that one deduplicated fetch can hand the same failure to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The transport failed, or answered with a non-success status.
    #[error("failed to load '{key}': {reason}")]
    LoadFailed {
        key: String,
        status: Option<u16>,
        reason: String,
    },

    /// The content is not a module document (missing or unknown format
    /// marker).
    #[error("'{key}' is not a module document: {reason}")]
    InvalidDocument { key: String, reason: String },

    /// The content is malformed.
    #[error("failed to parse '{key}': {reason}")]
    ParseError { key: String, reason: String },

    #[error("module '{key}' has no component '{name}'")]
    ComponentNotFound { key: String, name: String },
}

impl LoadError {
    /// The canonical key the failure relates to.
    pub fn key(&self) -> &str {
        match self {
            LoadError::LoadFailed { key, .. }
            | LoadError::InvalidDocument { key, .. }
            | LoadError::ParseError { key, .. }
            | LoadError::ComponentNotFound { key, .. } => key,
        }
    }

    /// Transport failures may succeed on retry; content failures will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoadError::LoadFailed { .. })
    }
}
