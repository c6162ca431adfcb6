//! Error types for query state operations.
//!
//! Two failure classes matter to consumers: decode failures, which are
//! soft and degrade to "value unset", and navigation failures, which
//! indicate a bad URL upstream and are propagated.

use thiserror::Error;

/// Errors that can occur while reading or writing query state.
#[derive(Debug, Error)]
pub enum QueryStateError {
    /// Query key is empty or too long.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A location or absolute base URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A query value is present but is not valid JSON for the bound type.
    #[error("cannot decode value for '{key}': {message}")]
    Decode { key: String, message: String },

    /// A value could not be serialized to JSON.
    #[error("encode error: {0}")]
    Encode(String),

    /// The navigator refused to navigate.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The reconciler task has exited and no longer flushes writes.
    #[error("reconciler stopped")]
    ReconcilerStopped,
}

/// Result type alias for query state operations.
pub type Result<T> = std::result::Result<T, QueryStateError>;

impl QueryStateError {
    /// Returns true for errors that readers should treat as "value unset".
    pub fn is_soft(&self) -> bool {
        matches!(self, QueryStateError::Decode { .. })
    }
}

impl From<serde_json::Error> for QueryStateError {
    fn from(err: serde_json::Error) -> Self {
        QueryStateError::Encode(err.to_string())
    }
}

impl From<url::ParseError> for QueryStateError {
    fn from(err: url::ParseError) -> Self {
        QueryStateError::InvalidUrl(err.to_string())
    }
}
