//! Error types for the queue backend.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while talking to the queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tube not found: {0}")]
    TubeNotFound(String),

    #[error("invalid tube name: {0:?}")]
    InvalidTubeName(String),

    #[error("decode error: {0}")]
    Decode(String),
}
