//! Error types for the orchestration backend.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for orchestration operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors that can occur while reading or writing ReplicaSets.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The object changed since it was read (stale resourceVersion).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A create raced with another writer that created the same name.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid resource name: {0:?}")]
    InvalidName(String),
}

impl OrchestratorError {
    /// Whether the write lost an optimistic-concurrency race and is worth
    /// retrying from a fresh read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::AlreadyExists(_))
    }

    /// Whether the object simply doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
