//! The outbox relay engine: polls the repository, hands claimed rows to a
//! publisher, and drives the retry/backoff state machine.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::OutboxConfig;
use crate::error::OutboxResult;
use crate::message::{CreateOutboxMessage, OutboxMessage};
use crate::metrics::OutboxMetrics;
use crate::observer::OutboxObserver;
use crate::publisher::{compute_publish_options, ExchangeNames, OutboxPublisher};
use crate::repository::OutboxRepository;

struct RelayTasks {
    poll: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

/// Polling dispatcher bound to one repository and one publisher
/// implementation. Cheap to clone: internals live behind `Arc`s, so a clone
/// shares lifecycle state with its source.
#[derive(Clone)]
pub struct OutboxRelay<R, P>
where
    R: OutboxRepository + 'static,
    P: OutboxPublisher + 'static,
{
    repository: Arc<R>,
    publisher: Arc<P>,
    config: Arc<OutboxConfig>,
    observer: Arc<OutboxObserver>,
    exchanges: Arc<ExchangeNames>,
    metrics: Option<Arc<OutboxMetrics>>,
    running: Arc<AtomicBool>,
    polling: Arc<AtomicBool>,
    tasks: Arc<Mutex<Option<RelayTasks>>>,
}

impl<R, P> OutboxRelay<R, P>
where
    R: OutboxRepository + 'static,
    P: OutboxPublisher + 'static,
{
    pub fn new(repository: R, publisher: P, config: OutboxConfig) -> Self {
        Self {
            repository: Arc::new(repository),
            publisher: Arc::new(publisher),
            config: Arc::new(config),
            observer: Arc::new(OutboxObserver::default()),
            exchanges: Arc::new(ExchangeNames::default()),
            metrics: None,
            running: Arc::new(AtomicBool::new(false)),
            polling: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_observer(mut self, observer: OutboxObserver) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn with_exchanges(mut self, exchanges: ExchangeNames) -> Self {
        self.exchanges = Arc::new(exchanges);
        self
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(Arc::new(metrics));
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Persists a new Pending row. Does not touch the broker.
    pub async fn create_message(&self, dto: CreateOutboxMessage) -> OutboxResult<OutboxMessage> {
        let message = self
            .repository
            .create(dto, None, self.config.max_retries)
            .await?;
        if self.config.immediate_processing {
            self.observer.emit_created(message.id);
        }
        Ok(message)
    }

    /// Persists a new Pending row as part of a caller-supplied transaction,
    /// so the outbox insert commits atomically with whatever business state
    /// the caller writes through the same handle.
    pub async fn create_message_in_tx(
        &self,
        dto: CreateOutboxMessage,
        tx: &mut R::Tx,
    ) -> OutboxResult<OutboxMessage> {
        let message = self
            .repository
            .create(dto, Some(tx), self.config.max_retries)
            .await?;
        if self.config.immediate_processing {
            self.observer.emit_created(message.id);
        }
        Ok(message)
    }

    /// Opens a storage transaction and hands it to `f`, committing on
    /// success and aborting on error. Lets a caller write business state and
    /// an outbox row atomically without reaching into the repository.
    pub async fn with_transaction<F, Fut, T>(&self, f: F) -> OutboxResult<T>
    where
        F: FnOnce(&mut R::Tx) -> Fut + Send,
        Fut: Future<Output = OutboxResult<T>> + Send,
        T: Send,
    {
        self.repository.with_transaction(f).await
    }

    /// Starts the poll and cleanup timers. A no-op if already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(worker_id = %self.config.worker_id, "outbox relay starting");
        self.observer.emit_polling_started();

        let poll = tokio::spawn(Self::poll_loop(self.clone()));
        let cleanup = tokio::spawn(Self::cleanup_loop(self.clone()));
        *self.tasks.lock().await = Some(RelayTasks { poll, cleanup });
    }

    /// Stops both timers and waits for any in-flight pass to finish. A
    /// no-op if not running.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tasks) = self.tasks.lock().await.take() {
            let _ = tasks.poll.await;
            let _ = tasks.cleanup.await;
        }
        tracing::info!(worker_id = %self.config.worker_id, "outbox relay stopped");
        self.observer.emit_polling_stopped();
    }

    async fn poll_loop(relay: Self) {
        let mut interval = tokio::time::interval(Duration::from_millis(relay.config.polling_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !relay.running.load(Ordering::SeqCst) {
                break;
            }
            if relay.polling.swap(true, Ordering::SeqCst) {
                continue;
            }
            if let Err(err) = relay.poll_once().await {
                tracing::error!(error = %err, "outbox poll pass failed");
                relay.observer.emit_error(err);
            }
            relay.polling.store(false, Ordering::SeqCst);
        }
    }

    async fn cleanup_loop(relay: Self) {
        let mut interval = tokio::time::interval(Duration::from_millis(relay.config.cleanup_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !relay.running.load(Ordering::SeqCst) {
                break;
            }
            if let Err(err) = relay.cleanup_once().await {
                tracing::error!(error = %err, "outbox cleanup pass failed");
                relay.observer.emit_error(err);
            }
        }
    }

    /// Runs exactly one poll pass: release stale locks, claim a batch,
    /// publish each claimed row concurrently. Public so callers can drive
    /// a pass synchronously (tests, or a host that prefers manual ticking
    /// over the built-in timer).
    pub async fn poll_once(&self) -> OutboxResult<()> {
        let now = Utc::now();
        let lock_cutoff = now - chrono::Duration::seconds(self.config.lock_timeout_seconds);
        let reclaimed = self.repository.release_stale_locks(lock_cutoff).await?;
        if reclaimed > 0 {
            tracing::warn!(count = reclaimed, "reclaimed stale outbox locks");
        }

        if self.config.batch_size <= 0 {
            return Ok(());
        }

        let claimed = self
            .repository
            .fetch_and_lock_pending(self.config.batch_size, &self.config.worker_id)
            .await?;

        let publishes = claimed
            .into_iter()
            .map(|message| self.publish_claimed(message));
        futures::future::join_all(publishes).await;

        Ok(())
    }

    async fn publish_claimed(&self, message: OutboxMessage) {
        let options = compute_publish_options(&message, &self.exchanges);
        match self.publisher.publish(&message, &options).await {
            Ok(()) => {
                if let Err(err) = self.repository.mark_published(message.id).await {
                    tracing::error!(error = %err, message_id = %message.id, "failed to mark outbox message published");
                    self.observer.emit_error(err);
                    return;
                }
                if let Some(metrics) = &self.metrics {
                    metrics.published_total.inc();
                }
                tracing::debug!(message_id = %message.id, "outbox message published");
                self.observer.emit_published(message);
            }
            Err(publish_err) => self.handle_publish_failure(message, publish_err).await,
        }
    }

    async fn handle_publish_failure(
        &self,
        message: OutboxMessage,
        publish_err: crate::error::PublishError,
    ) {
        let permanent_classification = publish_err.is_permanent();
        let exhausted = message.retry_count >= message.max_retries;
        let permanent = permanent_classification || exhausted;
        let error_text = publish_err.message().to_string();

        let scheduled_at = if permanent {
            None
        } else {
            let delay = messaging_backoff::backoff(&self.config.backoff_config(), message.retry_count as u32);
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
        };

        let mark_result = self
            .repository
            .mark_failed(message.id, &error_text, permanent, scheduled_at)
            .await;

        if let Err(err) = mark_result {
            tracing::error!(error = %err, message_id = %message.id, "failed to mark outbox message failed");
            self.observer.emit_error(err);
            return;
        }

        if let Some(metrics) = &self.metrics {
            if permanent {
                metrics.permanently_failed_total.inc();
            } else {
                metrics.failed_total.inc();
            }
        }

        if permanent {
            tracing::warn!(message_id = %message.id, error = %error_text, "outbox message permanently failed");
        } else {
            tracing::debug!(message_id = %message.id, error = %error_text, "outbox message publish failed, scheduled for retry");
        }
        self.observer.emit_failed(message, error_text, permanent);
    }

    async fn cleanup_once(&self) -> OutboxResult<()> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        let deleted = self.repository.delete_older_than(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, "outbox cleanup removed published rows");
            self.observer.emit_cleanup(deleted, cutoff);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OutboxStatus;
    use crate::publisher::InMemoryPublisher;
    use crate::repository::{InMemoryOutboxRepository, OutboxRepository};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> OutboxConfig {
        OutboxConfig::new()
            .with_polling_interval_ms(10)
            .with_batch_size(10)
            .with_max_retries(3)
    }

    #[tokio::test]
    async fn happy_path_publishes_and_marks_published() {
        let repo = InMemoryOutboxRepository::new();
        let publisher = InMemoryPublisher::new();
        let relay = OutboxRelay::new(repo.clone(), publisher.clone(), fast_config());

        relay
            .create_message(CreateOutboxMessage::new("User", "u-1", "user.created", json!({"n": 1})))
            .await
            .unwrap();

        relay.poll_once().await.unwrap();

        assert_eq!(publisher.call_count().await, 1);
        let snapshot = repo.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, OutboxStatus::Published);
        assert!(snapshot[0].locked_by.is_none());
    }

    #[tokio::test]
    async fn transient_failures_schedule_retry_until_cap() {
        let repo = InMemoryOutboxRepository::new();
        let publisher = InMemoryPublisher::scripted(vec![
            Err(crate::error::PublishError::Transient("boom".to_string())),
            Err(crate::error::PublishError::Transient("boom again".to_string())),
            Ok(()),
        ]);
        let relay = OutboxRelay::new(repo.clone(), publisher.clone(), fast_config());

        let created = relay
            .create_message(CreateOutboxMessage::new("User", "u-1", "user.created", json!({})))
            .await
            .unwrap();

        relay.poll_once().await.unwrap();
        let after_first = repo.snapshot().await;
        assert_eq!(after_first[0].status, OutboxStatus::Failed);
        assert_eq!(after_first[0].retry_count, 1);
        assert!(after_first[0].scheduled_at > created.created_at);

        // force eligibility regardless of scheduled_at to simulate elapsed time
        {
            let mut rows = repo.rows_for_test().await;
            rows.get_mut(&created.id).unwrap().scheduled_at = Utc::now() - chrono::Duration::seconds(1);
        }
        relay.poll_once().await.unwrap();
        let after_second = repo.snapshot().await;
        assert_eq!(after_second[0].status, OutboxStatus::Failed);
        assert_eq!(after_second[0].retry_count, 2);

        {
            let mut rows = repo.rows_for_test().await;
            rows.get_mut(&created.id).unwrap().scheduled_at = Utc::now() - chrono::Duration::seconds(1);
        }
        relay.poll_once().await.unwrap();
        let after_third = repo.snapshot().await;
        assert_eq!(after_third[0].status, OutboxStatus::Published);
    }

    #[tokio::test]
    async fn permanent_error_skips_retry_budget() {
        let repo = InMemoryOutboxRepository::new();
        let publisher = InMemoryPublisher::scripted(vec![Err(crate::error::PublishError::Permanent(
            "unroutable".to_string(),
        ))]);
        let relay = OutboxRelay::new(repo.clone(), publisher, fast_config());

        relay
            .create_message(CreateOutboxMessage::new("User", "u-1", "user.created", json!({})))
            .await
            .unwrap();
        relay.poll_once().await.unwrap();

        let snapshot = repo.snapshot().await;
        assert_eq!(snapshot[0].status, OutboxStatus::PermanentlyFailed);
        assert_eq!(snapshot[0].retry_count, 1);
    }

    #[tokio::test]
    async fn max_retries_zero_makes_first_failure_permanent() {
        let repo = InMemoryOutboxRepository::new();
        let publisher = InMemoryPublisher::scripted(vec![Err(crate::error::PublishError::Transient(
            "boom".to_string(),
        ))]);
        let config = fast_config().with_max_retries(0);
        let relay = OutboxRelay::new(repo.clone(), publisher, config);

        relay
            .create_message(CreateOutboxMessage::new("User", "u-1", "user.created", json!({})))
            .await
            .unwrap();
        relay.poll_once().await.unwrap();

        let snapshot = repo.snapshot().await;
        assert_eq!(snapshot[0].status, OutboxStatus::PermanentlyFailed);
    }

    #[tokio::test]
    async fn concurrent_workers_never_double_publish() {
        let repo = InMemoryOutboxRepository::new();
        for i in 0..10 {
            repo.create(
                CreateOutboxMessage::new("User", format!("u-{i}"), "user.created", json!({"n": i})),
                None,
                3,
            )
            .await
            .unwrap();
        }

        let total_publishes = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for worker in 0..3 {
            let repo = repo.clone();
            let total_publishes = total_publishes.clone();
            handles.push(tokio::spawn(async move {
                let publisher = InMemoryPublisher::new();
                let config = fast_config().with_batch_size(5).with_worker_id(format!("w{worker}"));
                let relay = OutboxRelay::new(repo, publisher.clone(), config);
                relay.poll_once().await.unwrap();
                total_publishes.fetch_add(publisher.call_count().await, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(total_publishes.load(Ordering::SeqCst), 10);
        let snapshot = repo.snapshot().await;
        assert!(snapshot.iter().all(|m| m.status == OutboxStatus::Published));
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed_on_next_pass() {
        let repo = InMemoryOutboxRepository::new();
        let message = repo
            .create(
                CreateOutboxMessage::new("User", "u-1", "user.created", json!({})),
                None,
                3,
            )
            .await
            .unwrap();
        {
            let mut rows = repo.rows_for_test().await;
            let row = rows.get_mut(&message.id).unwrap();
            row.status = OutboxStatus::Processing;
            row.locked_by = Some("dead-worker".to_string());
            row.locked_at = Some(Utc::now() - chrono::Duration::minutes(10));
        }

        let publisher = InMemoryPublisher::new();
        let relay = OutboxRelay::new(repo.clone(), publisher.clone(), fast_config());

        relay.poll_once().await.unwrap();

        let snapshot = repo.snapshot().await;
        assert_eq!(snapshot[0].status, OutboxStatus::Published);
        assert_eq!(publisher.call_count().await, 1);
    }

    #[tokio::test]
    async fn empty_batch_size_is_a_no_op() {
        let repo = InMemoryOutboxRepository::new();
        repo.create(
            CreateOutboxMessage::new("User", "u-1", "user.created", json!({})),
            None,
            3,
        )
        .await
        .unwrap();
        let publisher = InMemoryPublisher::new();
        let relay = OutboxRelay::new(repo.clone(), publisher.clone(), fast_config().with_batch_size(0));

        relay.poll_once().await.unwrap();

        assert_eq!(publisher.call_count().await, 0);
        let snapshot = repo.snapshot().await;
        assert_eq!(snapshot[0].status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent_and_drive_a_real_publish() {
        let repo = InMemoryOutboxRepository::new();
        let publisher = InMemoryPublisher::new();
        let relay = OutboxRelay::new(repo.clone(), publisher.clone(), fast_config());

        relay
            .create_message(CreateOutboxMessage::new("User", "u-1", "user.created", json!({})))
            .await
            .unwrap();

        relay.start().await;
        relay.start().await; // second call is a no-op
        tokio::time::sleep(Duration::from_millis(50)).await;
        relay.stop().await;
        relay.stop().await; // second call is a no-op

        assert!(publisher.call_count().await >= 1);
    }

    #[tokio::test]
    async fn create_message_in_tx_commits_through_with_transaction() {
        let repo = InMemoryOutboxRepository::new();
        let publisher = InMemoryPublisher::new();
        let relay = OutboxRelay::new(repo.clone(), publisher, fast_config());

        let message = relay
            .with_transaction(|tx| {
                let relay = &relay;
                let dto = CreateOutboxMessage::new("User", "u-1", "user.created", json!({}));
                Box::pin(async move { relay.create_message_in_tx(dto, tx).await })
            })
            .await
            .unwrap();

        let snapshot = repo.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, message.id);
    }

    #[tokio::test]
    async fn full_lifecycle_then_cleanup_removes_only_the_published_row_past_cutoff() {
        let repo = InMemoryOutboxRepository::new();
        let publisher = InMemoryPublisher::new();
        let relay = OutboxRelay::new(repo.clone(), publisher.clone(), fast_config());

        let old = relay
            .create_message(CreateOutboxMessage::new("User", "u-old", "user.created", json!({})))
            .await
            .unwrap();
        let recent = relay
            .create_message(CreateOutboxMessage::new("User", "u-recent", "user.created", json!({})))
            .await
            .unwrap();

        relay.poll_once().await.unwrap();
        let snapshot = repo.snapshot().await;
        assert!(snapshot.iter().all(|m| m.status == OutboxStatus::Published));

        {
            let mut rows = repo.rows_for_test().await;
            rows.get_mut(&old.id).unwrap().created_at = Utc::now() - chrono::Duration::days(30);
        }

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let deleted = repo.delete_older_than(cutoff).await.unwrap();

        assert_eq!(deleted, 1);
        let remaining = repo.snapshot().await;
        assert!(remaining.iter().any(|m| m.id == recent.id));
        assert!(!remaining.iter().any(|m| m.id == old.id));
    }
}
