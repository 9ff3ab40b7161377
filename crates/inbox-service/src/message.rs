//! Inbox record shape and the status lifecycle it moves through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Received,
    Processing,
    Processed,
    Failed,
    PermanentlyFailed,
}

/// A received event, deduplicated on `(message_id, source)` before a
/// handler ever sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: Uuid,

    /// External identifier assigned by the origin service.
    pub message_id: String,
    /// Origin identifier; together with `message_id` forms the
    /// deduplication key.
    pub source: String,

    pub event_type: String,
    pub payload: serde_json::Value,

    pub status: InboxStatus,

    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_at: Option<DateTime<Utc>>,

    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Input to `InboxRepository::record`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveMessage {
    pub message_id: String,
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub max_retries: Option<i32>,
}

impl ReceiveMessage {
    pub fn new(
        message_id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            source: source.into(),
            event_type: event_type.into(),
            payload,
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Outcome of `InboxRepository::record`.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub message: InboxMessage,
    pub is_duplicate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_persisted_vocabulary() {
        let pairs = [
            (InboxStatus::Received, "\"received\""),
            (InboxStatus::Processing, "\"processing\""),
            (InboxStatus::Processed, "\"processed\""),
            (InboxStatus::Failed, "\"failed\""),
            (InboxStatus::PermanentlyFailed, "\"permanently_failed\""),
        ];
        for (status, expected) in pairs {
            assert_eq!(serde_json::to_string(&status).unwrap(), expected);
        }
    }
}
