//! Error types for the outbox relay.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for repository/engine operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors surfaced by the repository contract and the relay itself.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Storage backend failed; wraps whatever the adapter raised.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// A mark/release operation targeted a row that no longer exists.
    #[error("outbox message not found: {0}")]
    NotFound(Uuid),

    /// Payload/metadata could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The two-way classification a publisher (or the engine itself) uses to
/// decide whether a failure consumes the retry budget or skips straight to
/// `PermanentlyFailed`.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    /// Worth retrying with backoff.
    #[error("{0}")]
    Transient(String),

    /// Retries would never succeed (bad payload, unroutable message, ...).
    #[error("{0}")]
    Permanent(String),
}

impl PublishError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, PublishError::Permanent(_))
    }

    pub fn message(&self) -> &str {
        match self {
            PublishError::Transient(m) | PublishError::Permanent(m) => m,
        }
    }
}
