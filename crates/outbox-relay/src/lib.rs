//! Outbox relay: moves events from application transactions to a message
//! broker with at-least-once delivery, retry/backoff, and stale-lock
//! recovery across concurrent workers.

pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod observer;
pub mod publisher;
pub mod relay;
pub mod repository;

pub use config::OutboxConfig;
pub use error::{OutboxError, OutboxResult, PublishError};
pub use message::{CreateOutboxMessage, OutboxMessage, OutboxStatus};
pub use metrics::OutboxMetrics;
pub use observer::OutboxObserver;
pub use publisher::{compute_publish_options, ExchangeNames, InMemoryPublisher, OutboxPublisher, PublishOptions};
pub use relay::OutboxRelay;
pub use repository::{InMemoryOutboxRepository, OutboxRepository};
