//! Outbox record shape and the status lifecycle it moves through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an outbox row. The string form is the persisted
/// vocabulary and MUST round-trip through any storage adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
    PermanentlyFailed,
}

/// An event stored in the outbox table, created in the same transaction as
/// the business state it describes and later handed to a publisher by the
/// relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,

    /// Origin entity reference; opaque to the core.
    pub aggregate_type: String,
    pub aggregate_id: String,

    /// Logical event name, used for routing.
    pub event_type: String,

    /// Opaque event body.
    pub payload: serde_json::Value,

    /// Opaque attributes. Recognized keys: `delay`, `routing_key`, `exchange`.
    pub metadata: serde_json::Value,

    pub status: OutboxStatus,

    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,

    /// Earliest time this row is eligible for claim.
    pub scheduled_at: DateTime<Utc>,

    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// `m.metadata.delay` if it is a non-negative integer; `None` for
    /// negative, NaN, or non-integer values.
    pub fn delay_ms(&self) -> Option<u64> {
        self.metadata.get("delay").and_then(|v| {
            let f = v.as_f64()?;
            if f.is_nan() || f < 0.0 || f.fract() != 0.0 {
                return None;
            }
            Some(f as u64)
        })
    }

    pub fn routing_key_override(&self) -> Option<&str> {
        self.metadata.get("routing_key").and_then(|v| v.as_str())
    }

    pub fn exchange_override(&self) -> Option<&str> {
        self.metadata.get("exchange").and_then(|v| v.as_str())
    }
}

/// Input to `OutboxRepository::create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOutboxMessage {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub max_retries: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl CreateOutboxMessage {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            metadata: None,
            max_retries: None,
            scheduled_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_with_metadata(metadata: serde_json::Value) -> OutboxMessage {
        let now = Utc::now();
        OutboxMessage {
            id: Uuid::new_v4(),
            aggregate_type: "User".to_string(),
            aggregate_id: "u-1".to_string(),
            event_type: "user.created".to_string(),
            payload: json!({}),
            metadata,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            scheduled_at: now,
            locked_by: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn delay_zero_is_some_zero() {
        let m = message_with_metadata(json!({"delay": 0}));
        assert_eq!(m.delay_ms(), Some(0));
    }

    #[test]
    fn delay_negative_is_none() {
        let m = message_with_metadata(json!({"delay": -5}));
        assert_eq!(m.delay_ms(), None);
    }

    #[test]
    fn delay_non_integer_is_none() {
        let m = message_with_metadata(json!({"delay": 1.5}));
        assert_eq!(m.delay_ms(), None);
    }

    #[test]
    fn delay_absent_is_none() {
        let m = message_with_metadata(json!({}));
        assert_eq!(m.delay_ms(), None);
    }

    #[test]
    fn status_round_trips_persisted_vocabulary() {
        let pairs = [
            (OutboxStatus::Pending, "\"pending\""),
            (OutboxStatus::Processing, "\"processing\""),
            (OutboxStatus::Published, "\"published\""),
            (OutboxStatus::Failed, "\"failed\""),
            (OutboxStatus::PermanentlyFailed, "\"permanently_failed\""),
        ];
        for (status, expected) in pairs {
            assert_eq!(serde_json::to_string(&status).unwrap(), expected);
        }
    }
}
