//! Observer hooks. An explicit struct of optional callbacks in place of a
//! language-level event emitter, wired up once at construction.

use std::sync::Arc;

use crate::error::OutboxError;
use crate::message::OutboxMessage;

type Hook<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Every hook is optional; a relay built with `OutboxObserver::default()`
/// runs silently besides its `tracing` output.
#[derive(Clone, Default)]
pub struct OutboxObserver {
    pub on_message_created: Option<Hook<uuid::Uuid>>,
    pub on_message_published: Option<Hook<OutboxMessage>>,
    pub on_message_failed: Option<Hook<(OutboxMessage, String, bool)>>,
    pub on_polling_started: Option<Hook<()>>,
    pub on_polling_stopped: Option<Hook<()>>,
    pub on_cleanup: Option<Hook<(u64, chrono::DateTime<chrono::Utc>)>>,
    pub on_error: Option<Hook<Arc<OutboxError>>>,
}

impl OutboxObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message_created(mut self, f: impl Fn(uuid::Uuid) + Send + Sync + 'static) -> Self {
        self.on_message_created = Some(Arc::new(f));
        self
    }

    pub fn on_message_published(mut self, f: impl Fn(OutboxMessage) + Send + Sync + 'static) -> Self {
        self.on_message_published = Some(Arc::new(f));
        self
    }

    pub fn on_message_failed(
        mut self,
        f: impl Fn(OutboxMessage, String, bool) + Send + Sync + 'static,
    ) -> Self {
        self.on_message_failed = Some(Arc::new(move |(m, e, p)| f(m, e, p)));
        self
    }

    pub fn on_polling_started(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_polling_started = Some(Arc::new(move |_| f()));
        self
    }

    pub fn on_polling_stopped(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_polling_stopped = Some(Arc::new(move |_| f()));
        self
    }

    pub fn on_cleanup(
        mut self,
        f: impl Fn(u64, chrono::DateTime<chrono::Utc>) + Send + Sync + 'static,
    ) -> Self {
        self.on_cleanup = Some(Arc::new(move |(deleted, cutoff)| f(deleted, cutoff)));
        self
    }

    pub fn on_error(mut self, f: impl Fn(Arc<OutboxError>) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_created(&self, id: uuid::Uuid) {
        if let Some(hook) = &self.on_message_created {
            hook(id);
        }
    }

    pub(crate) fn emit_published(&self, message: OutboxMessage) {
        if let Some(hook) = &self.on_message_published {
            hook(message);
        }
    }

    pub(crate) fn emit_failed(&self, message: OutboxMessage, error: String, permanent: bool) {
        if let Some(hook) = &self.on_message_failed {
            hook((message, error, permanent));
        }
    }

    pub(crate) fn emit_polling_started(&self) {
        if let Some(hook) = &self.on_polling_started {
            hook(());
        }
    }

    pub(crate) fn emit_polling_stopped(&self) {
        if let Some(hook) = &self.on_polling_stopped {
            hook(());
        }
    }

    pub(crate) fn emit_cleanup(&self, deleted: u64, cutoff: chrono::DateTime<chrono::Utc>) {
        if let Some(hook) = &self.on_cleanup {
            hook((deleted, cutoff));
        }
    }

    pub(crate) fn emit_error(&self, error: OutboxError) {
        if let Some(hook) = &self.on_error {
            hook(Arc::new(error));
        }
    }
}

impl std::fmt::Debug for OutboxObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxObserver").finish_non_exhaustive()
    }
}
