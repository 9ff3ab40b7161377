//! Error types for the inbox service.

use thiserror::Error;
use uuid::Uuid;

pub type InboxResult<T> = Result<T, InboxError>;

/// Errors surfaced by the repository contract and the service itself.
#[derive(Error, Debug)]
pub enum InboxError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("inbox message not found: {0}")]
    NotFound(Uuid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transient/Permanent classification a handler uses to decide whether a
/// failure consumes the retry budget.
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Transient(m) | HandlerError::Permanent(m) => m,
        }
    }
}

/// Raised when a row with the same `(message_id, source)` already exists.
#[derive(Error, Debug, Clone)]
#[error("duplicate message: message_id={message_id} source={source}")]
pub struct DuplicateMessageError {
    pub message_id: String,
    pub source: String,
}

/// Error returned from `InboxService::receive`.
#[derive(Error, Debug)]
pub enum ReceiveError {
    /// A row with the same `(message_id, source)` already exists. Callers
    /// (brokers) SHOULD treat this as success and ack the delivery.
    #[error(transparent)]
    Duplicate(#[from] DuplicateMessageError),

    /// At least one handler rejected the message.
    #[error("processing failed for message {message_id}: {source}")]
    ProcessingFailed {
        message_id: uuid::Uuid,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Storage(#[from] InboxError),
}
