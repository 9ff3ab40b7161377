//! The inbox service: deduplicated intake, handler dispatch, and an
//! optional retry loop for transient handler failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::InboxConfig;
use crate::error::{DuplicateMessageError, HandlerError, ReceiveError};
use crate::handler::{HandlerId, HandlerRegistry, InboxHandler};
use crate::message::{InboxMessage, InboxStatus, ReceiveMessage};
use crate::metrics::InboxMetrics;
use crate::observer::InboxObserver;
use crate::repository::InboxRepository;

struct ServiceTasks {
    retry: Option<JoinHandle<()>>,
    cleanup: JoinHandle<()>,
}

/// Ties a repository implementation to a handler registry and drives the
/// receive/process/retry/cleanup state machine. Cheap to clone.
#[derive(Clone)]
pub struct InboxService<R>
where
    R: InboxRepository + 'static,
{
    repository: Arc<R>,
    registry: Arc<HandlerRegistry>,
    config: Arc<InboxConfig>,
    observer: Arc<InboxObserver>,
    metrics: Option<Arc<InboxMetrics>>,
    running: Arc<AtomicBool>,
    polling: Arc<AtomicBool>,
    tasks: Arc<Mutex<Option<ServiceTasks>>>,
}

impl<R> InboxService<R>
where
    R: InboxRepository + 'static,
{
    pub fn new(repository: R, config: InboxConfig) -> Self {
        Self {
            repository: Arc::new(repository),
            registry: Arc::new(HandlerRegistry::new()),
            config: Arc::new(config),
            observer: Arc::new(InboxObserver::default()),
            metrics: None,
            running: Arc::new(AtomicBool::new(false)),
            polling: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_observer(mut self, observer: InboxObserver) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn with_metrics(mut self, metrics: InboxMetrics) -> Self {
        self.metrics = Some(Arc::new(metrics));
        self
    }

    pub async fn register_handler(&self, event_type: impl Into<String>, handler: Arc<dyn InboxHandler>) -> HandlerId {
        self.registry.register(event_type, handler).await
    }

    pub async fn unregister_handler(&self, event_type: &str, handler_id: HandlerId) {
        self.registry.unregister(event_type, handler_id).await
    }

    /// Records the message (deduplicating on `(message_id, source)`), then
    /// dispatches it to handlers. Returns `ReceiveError::Duplicate` without
    /// re-invoking handlers if this `(message_id, source)` was seen before.
    pub async fn receive(&self, dto: ReceiveMessage) -> Result<InboxMessage, ReceiveError> {
        let message_id = dto.message_id.clone();
        let source = dto.source.clone();

        let outcome = self.repository.record(dto, self.config.max_retries).await?;
        if outcome.is_duplicate {
            tracing::debug!(%message_id, %source, "duplicate inbox message rejected");
            if let Some(metrics) = &self.metrics {
                metrics.duplicate_total.inc();
            }
            self.observer.emit_duplicate(message_id.clone(), source.clone());
            return Err(ReceiveError::Duplicate(DuplicateMessageError { message_id, source }));
        }

        if let Some(metrics) = &self.metrics {
            metrics.received_total.inc();
        }
        tracing::debug!(message_id = %outcome.message.message_id, "inbox message received");
        self.observer.emit_received(outcome.message.clone());

        self.process(outcome.message).await
    }

    /// Dispatches `message` to every registered handler for its event type,
    /// awaiting all outcomes before deciding success/failure.
    pub async fn process(&self, mut message: InboxMessage) -> Result<InboxMessage, ReceiveError> {
        let handlers = self.registry.handlers_for(&message.event_type).await;

        if handlers.is_empty() {
            self.repository.mark_processed(message.id).await?;
            message.status = InboxStatus::Processed;
            message.processed_at = Some(Utc::now());
            if let Some(metrics) = &self.metrics {
                metrics.processed_total.inc();
            }
            self.observer.emit_processed(message.clone());
            return Ok(message);
        }

        self.repository.mark_processing(message.id).await?;
        message.status = InboxStatus::Processing;

        let outcomes = futures::future::join_all(handlers.iter().map(|h| h.handle(&message))).await;
        let first_failure = outcomes.into_iter().find_map(|r| r.err());

        match first_failure {
            None => {
                self.repository.mark_processed(message.id).await?;
                message.status = InboxStatus::Processed;
                message.processed_at = Some(Utc::now());
                if let Some(metrics) = &self.metrics {
                    metrics.processed_total.inc();
                }
                tracing::debug!(message_id = %message.message_id, "inbox message processed");
                self.observer.emit_processed(message.clone());
                Ok(message)
            }
            Some(err) => Err(self.handle_failure(message, err).await),
        }
    }

    async fn handle_failure(&self, mut message: InboxMessage, err: HandlerError) -> ReceiveError {
        let permanent = err.is_permanent() || message.retry_count >= message.max_retries;
        let error_text = err.message().to_string();

        let scheduled_at = if permanent || !self.config.enable_retry {
            None
        } else {
            let delay = messaging_backoff::backoff(&self.config.backoff_config(), message.retry_count as u32);
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
        };

        let mark_result = self
            .repository
            .mark_failed(message.id, &error_text, permanent, scheduled_at)
            .await;

        if let Err(storage_err) = mark_result {
            self.observer.emit_error(storage_err);
        } else {
            message.retry_count += 1;
            message.error_message = Some(error_text.clone());
            message.scheduled_at = scheduled_at;
            message.status = if permanent {
                InboxStatus::PermanentlyFailed
            } else {
                InboxStatus::Failed
            };

            if let Some(metrics) = &self.metrics {
                if permanent {
                    metrics.permanently_failed_total.inc();
                } else {
                    metrics.failed_total.inc();
                }
            }

            if permanent {
                tracing::warn!(message_id = %message.message_id, error = %error_text, "inbox message permanently failed");
            } else {
                tracing::debug!(message_id = %message.message_id, error = %error_text, "inbox message failed, scheduled for retry");
            }
            self.observer.emit_failed(message.clone(), error_text.clone(), permanent);
        }

        let classified = if permanent {
            HandlerError::Permanent(error_text)
        } else {
            HandlerError::Transient(error_text)
        };
        ReceiveError::ProcessingFailed {
            message_id: message.id,
            source: classified,
        }
    }

    /// Starts the cleanup timer, plus the retry loop when
    /// `config.enable_retry` is set. No-op if already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("inbox service starting");

        let cleanup = tokio::spawn(Self::cleanup_loop(self.clone()));
        let retry = if self.config.enable_retry {
            self.observer.emit_retry_polling_started();
            Some(tokio::spawn(Self::retry_loop(self.clone())))
        } else {
            None
        };
        *self.tasks.lock().await = Some(ServiceTasks { retry, cleanup });
    }

    /// Stops both timers and waits for any in-flight pass to finish. A
    /// no-op if not running.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tasks) = self.tasks.lock().await.take() {
            if let Some(retry) = tasks.retry {
                let _ = retry.await;
            }
            let _ = tasks.cleanup.await;
        }
        tracing::info!("inbox service stopped");
        if self.config.enable_retry {
            self.observer.emit_retry_polling_stopped();
        }
    }

    async fn retry_loop(service: Self) {
        let mut interval = tokio::time::interval(Duration::from_millis(service.config.retry_polling_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !service.running.load(Ordering::SeqCst) {
                break;
            }
            if service.polling.swap(true, Ordering::SeqCst) {
                continue;
            }
            if let Err(err) = service.retry_once().await {
                tracing::error!(error = %err, "inbox retry pass failed");
                service.observer.emit_error(err);
            }
            service.polling.store(false, Ordering::SeqCst);
        }
    }

    async fn cleanup_loop(service: Self) {
        let mut interval = tokio::time::interval(Duration::from_millis(service.config.cleanup_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !service.running.load(Ordering::SeqCst) {
                break;
            }
            if let Err(err) = service.cleanup_once().await {
                tracing::error!(error = %err, "inbox cleanup pass failed");
                service.observer.emit_error(err);
            }
        }
    }

    /// Runs exactly one retry pass: fetch retryable rows, re-dispatch each
    /// through `process`. Public so hosts/tests can drive a pass without the
    /// built-in timer.
    pub async fn retry_once(&self) -> Result<(), crate::error::InboxError> {
        let retryable = self.repository.find_retryable(self.config.retry_batch_size).await?;
        if let Some(metrics) = &self.metrics {
            metrics.pending_retry_count.set(retryable.len() as i64);
        }
        for message in retryable {
            let _ = self.process(message).await;
        }
        Ok(())
    }

    async fn cleanup_once(&self) -> Result<(), crate::error::InboxError> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        let deleted = self.repository.delete_older_than(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, "inbox cleanup removed processed rows");
            self.observer.emit_cleanup(deleted, cutoff);
        }
        Ok(())
    }
}
