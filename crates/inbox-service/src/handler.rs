//! Handler registry: maps an event type to the handlers that process it.
//! Registration is rare, dispatch is frequent, so reads never block on a
//! writer that isn't there.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::HandlerError;
use crate::message::InboxMessage;

/// Business logic invoked for a received message. Implementations classify
/// their own failures: a `HandlerError::Permanent` bypasses the retry
/// budget, `Transient` consumes it.
#[async_trait]
pub trait InboxHandler: Send + Sync {
    async fn handle(&self, message: &InboxMessage) -> Result<(), HandlerError>;
}

/// Opaque identity returned by `register` so the caller can later
/// `unregister` the exact same registration.
pub type HandlerId = Uuid;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<(HandlerId, Arc<dyn InboxHandler>)>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, event_type: impl Into<String>, handler: Arc<dyn InboxHandler>) -> HandlerId {
        let id = Uuid::new_v4();
        self.handlers
            .write()
            .await
            .entry(event_type.into())
            .or_default()
            .push((id, handler));
        id
    }

    pub async fn unregister(&self, event_type: &str, handler_id: HandlerId) {
        let mut handlers = self.handlers.write().await;
        if let Some(list) = handlers.get_mut(event_type) {
            list.retain(|(id, _)| *id != handler_id);
            if list.is_empty() {
                handlers.remove(event_type);
            }
        }
    }

    pub async fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn InboxHandler>> {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }
}
