//! Publisher contract and the routing rules the core imposes on top of
//! whatever broker a concrete publisher talks to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PublishError;
use crate::message::OutboxMessage;

/// Broker-agnostic attributes the core computes for every message before
/// handing it to a publisher. A concrete publisher is free to ignore fields
/// its transport has no equivalent for.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub routing_key: String,
    pub exchange: String,
    pub delay_ms: Option<u64>,
    pub content_type: &'static str,
    pub persistent: bool,
    pub message_id: uuid::Uuid,
    pub timestamp_ms: i64,
    pub headers: HashMap<String, String>,
}

/// Names of the default exchanges used when a message's metadata doesn't
/// override one.
#[derive(Debug, Clone)]
pub struct ExchangeNames {
    pub direct: String,
    pub delayed: String,
}

impl Default for ExchangeNames {
    fn default() -> Self {
        Self {
            direct: "outbox.direct".to_string(),
            delayed: "outbox.delayed".to_string(),
        }
    }
}

/// Computes the `PublishOptions` for a message per the routing rules.
pub fn compute_publish_options(message: &OutboxMessage, exchanges: &ExchangeNames) -> PublishOptions {
    let routing_key = message
        .routing_key_override()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}.{}", message.aggregate_type, message.event_type));

    let delay_ms = message.delay_ms();

    let exchange = match (message.exchange_override(), delay_ms) {
        (Some(e), None) => e.to_string(),
        (_, Some(_)) => exchanges.delayed.clone(),
        (None, None) => exchanges.direct.clone(),
    };

    let mut headers = HashMap::new();
    headers.insert("aggregate_type".to_string(), message.aggregate_type.clone());
    headers.insert("aggregate_id".to_string(), message.aggregate_id.clone());
    headers.insert("event_type".to_string(), message.event_type.clone());
    if let Some(delay) = delay_ms {
        if delay > 0 {
            headers.insert("x-delay".to_string(), delay.to_string());
        }
    }

    PublishOptions {
        routing_key,
        exchange,
        delay_ms,
        content_type: "application/json",
        persistent: true,
        message_id: message.id,
        timestamp_ms: message.created_at.timestamp_millis(),
        headers,
    }
}

/// Publishes outbox messages to a message broker. Implementations SHOULD be
/// idempotent: at-least-once delivery means the relay may call `publish`
/// more than once for the same message if a worker crashes between a
/// successful publish and `mark_published`.
#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, message: &OutboxMessage, options: &PublishOptions) -> Result<(), PublishError>;

    async fn connect(&self) -> Result<(), PublishError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PublishError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Test/reference publisher. Records every call so assertions can inspect
/// exact routing-key/exchange/header computation, and can be programmed to
/// fail a fixed number of times before succeeding — the shape a transient
/// retry scenario needs.
#[derive(Clone)]
pub struct InMemoryPublisher {
    calls: Arc<Mutex<Vec<(OutboxMessage, PublishOptions)>>>,
    script: Arc<Mutex<Vec<Result<(), PublishError>>>>,
}

impl InMemoryPublisher {
    /// Always succeeds.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replays `outcomes` in order, one per call; once exhausted, further
    /// calls succeed.
    pub fn scripted(outcomes: Vec<Result<(), PublishError>>) -> Self {
        let mut script = outcomes;
        script.reverse();
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(script)),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn calls(&self) -> Vec<(OutboxMessage, PublishOptions)> {
        self.calls.lock().await.clone()
    }
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxPublisher for InMemoryPublisher {
    async fn publish(&self, message: &OutboxMessage, options: &PublishOptions) -> Result<(), PublishError> {
        self.calls
            .lock()
            .await
            .push((message.clone(), options.clone()));

        let mut script = self.script.lock().await;
        match script.pop() {
            Some(outcome) => outcome,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OutboxStatus;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn message(metadata: serde_json::Value) -> OutboxMessage {
        let now = Utc::now();
        OutboxMessage {
            id: Uuid::new_v4(),
            aggregate_type: "User".to_string(),
            aggregate_id: "u-1".to_string(),
            event_type: "user.created".to_string(),
            payload: json!({"n": 1}),
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
    fn default_routing_key_and_exchange() {
        let m = message(json!({}));
        let opts = compute_publish_options(&m, &ExchangeNames::default());
        assert_eq!(opts.routing_key, "User.user.created");
        assert_eq!(opts.exchange, "outbox.direct");
        assert!(opts.delay_ms.is_none());
        assert!(!opts.headers.contains_key("x-delay"));
        assert_eq!(opts.headers.get("aggregate_type").unwrap(), "User");
    }

    #[test]
    fn routing_key_override_wins() {
        let m = message(json!({"routing_key": "custom.key"}));
        let opts = compute_publish_options(&m, &ExchangeNames::default());
        assert_eq!(opts.routing_key, "custom.key");
    }

    #[test]
    fn exchange_override_ignored_when_delayed() {
        let m = message(json!({"exchange": "custom.exchange", "delay": 500}));
        let opts = compute_publish_options(&m, &ExchangeNames::default());
        assert_eq!(opts.exchange, "outbox.delayed");
        assert_eq!(opts.headers.get("x-delay").unwrap(), "500");
    }

    #[test]
    fn exchange_override_applies_without_delay() {
        let m = message(json!({"exchange": "custom.exchange"}));
        let opts = compute_publish_options(&m, &ExchangeNames::default());
        assert_eq!(opts.exchange, "custom.exchange");
    }

    #[test]
    fn zero_delay_is_immediate_no_header() {
        let m = message(json!({"delay": 0}));
        let opts = compute_publish_options(&m, &ExchangeNames::default());
        assert_eq!(opts.delay_ms, Some(0));
        assert!(!opts.headers.contains_key("x-delay"));
        // delay present (even zero) still routes through the delayed exchange
        assert_eq!(opts.exchange, "outbox.delayed");
    }

    #[tokio::test]
    async fn scripted_publisher_replays_outcomes_in_order() {
        let publisher = InMemoryPublisher::scripted(vec![
            Err(PublishError::Transient("boom".to_string())),
            Err(PublishError::Transient("boom again".to_string())),
            Ok(()),
        ]);
        let m = message(json!({}));
        let opts = compute_publish_options(&m, &ExchangeNames::default());

        assert!(publisher.publish(&m, &opts).await.is_err());
        assert!(publisher.publish(&m, &opts).await.is_err());
        assert!(publisher.publish(&m, &opts).await.is_ok());
        assert!(publisher.publish(&m, &opts).await.is_ok());
        assert_eq!(publisher.call_count().await, 4);
    }
}
