//! Observer hooks, mirroring the outbox side's explicit-struct approach.

use std::sync::Arc;

use crate::error::InboxError;
use crate::message::InboxMessage;

type Hook<T> = Arc<dyn Fn(T) + Send + Sync>;

#[derive(Clone, Default)]
pub struct InboxObserver {
    pub on_message_received: Option<Hook<InboxMessage>>,
    pub on_message_duplicate: Option<Hook<(String, String)>>,
    pub on_message_processed: Option<Hook<InboxMessage>>,
    pub on_message_failed: Option<Hook<(InboxMessage, String, bool)>>,
    pub on_retry_polling_started: Option<Hook<()>>,
    pub on_retry_polling_stopped: Option<Hook<()>>,
    pub on_cleanup: Option<Hook<(u64, chrono::DateTime<chrono::Utc>)>>,
    pub on_error: Option<Hook<Arc<InboxError>>>,
}

impl InboxObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message_received(mut self, f: impl Fn(InboxMessage) + Send + Sync + 'static) -> Self {
        self.on_message_received = Some(Arc::new(f));
        self
    }

    pub fn on_message_duplicate(mut self, f: impl Fn(String, String) + Send + Sync + 'static) -> Self {
        self.on_message_duplicate = Some(Arc::new(move |(message_id, source)| f(message_id, source)));
        self
    }

    pub fn on_message_processed(mut self, f: impl Fn(InboxMessage) + Send + Sync + 'static) -> Self {
        self.on_message_processed = Some(Arc::new(f));
        self
    }

    pub fn on_message_failed(
        mut self,
        f: impl Fn(InboxMessage, String, bool) + Send + Sync + 'static,
    ) -> Self {
        self.on_message_failed = Some(Arc::new(move |(m, e, p)| f(m, e, p)));
        self
    }

    pub fn on_cleanup(
        mut self,
        f: impl Fn(u64, chrono::DateTime<chrono::Utc>) + Send + Sync + 'static,
    ) -> Self {
        self.on_cleanup = Some(Arc::new(move |(deleted, cutoff)| f(deleted, cutoff)));
        self
    }

    pub fn on_error(mut self, f: impl Fn(Arc<InboxError>) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_received(&self, message: InboxMessage) {
        if let Some(hook) = &self.on_message_received {
            hook(message);
        }
    }

    pub(crate) fn emit_duplicate(&self, message_id: String, source: String) {
        if let Some(hook) = &self.on_message_duplicate {
            hook((message_id, source));
        }
    }

    pub(crate) fn emit_processed(&self, message: InboxMessage) {
        if let Some(hook) = &self.on_message_processed {
            hook(message);
        }
    }

    pub(crate) fn emit_failed(&self, message: InboxMessage, error: String, permanent: bool) {
        if let Some(hook) = &self.on_message_failed {
            hook((message, error, permanent));
        }
    }

    pub(crate) fn emit_retry_polling_started(&self) {
        if let Some(hook) = &self.on_retry_polling_started {
            hook(());
        }
    }

    pub(crate) fn emit_retry_polling_stopped(&self) {
        if let Some(hook) = &self.on_retry_polling_stopped {
            hook(());
        }
    }

    pub(crate) fn emit_cleanup(&self, deleted: u64, cutoff: chrono::DateTime<chrono::Utc>) {
        if let Some(hook) = &self.on_cleanup {
            hook((deleted, cutoff));
        }
    }

    pub(crate) fn emit_error(&self, error: InboxError) {
        if let Some(hook) = &self.on_error {
            hook(Arc::new(error));
        }
    }
}

impl std::fmt::Debug for InboxObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboxObserver").finish_non_exhaustive()
    }
}
