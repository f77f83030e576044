use thiserror::Error;

/// Errors raised by document reads and merges.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    #[error("path '{0}' not found")]
    NotFound(String),

    #[error("conflicting values at '{path}': {left} and {right}")]
    Conflict {
        path: String,
        left: String,
        right: String,
    },

    #[error("reference cycle through '{0}'")]
    ReferenceCycle(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl DocumentError {
    /// True for unification conflicts (as opposed to lookup failures).
    pub fn is_conflict(&self) -> bool {
        matches!(self, DocumentError::Conflict { .. })
    }
}
