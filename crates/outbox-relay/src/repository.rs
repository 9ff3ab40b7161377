//! Repository contract the relay depends on, plus an in-memory reference
//! adapter used by the test suite and by callers wiring up a quick
//! prototype before a real storage adapter exists.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{OutboxError, OutboxResult};
use crate::message::{CreateOutboxMessage, OutboxMessage, OutboxStatus};

/// Abstracts database operations so the relay can be tested without a real
/// database and so alternative backends (relational, document) can be
/// plugged in without touching the engine.
///
/// `Tx` is an opaque transaction handle: the core never inspects it, it only
/// threads it through `create`/`with_transaction` so business writes and the
/// outbox insert land in the same commit.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    type Tx: Send;

    /// Insert a new Pending row. When `tx` is `Some`, the insert
    /// participates in the caller's transaction.
    async fn create(
        &self,
        dto: CreateOutboxMessage,
        tx: Option<&mut Self::Tx>,
        default_max_retries: i32,
    ) -> OutboxResult<OutboxMessage>;

    /// Open a storage transaction, invoke `f` with the handle, commit on
    /// return and abort on error.
    async fn with_transaction<F, Fut, T>(&self, f: F) -> OutboxResult<T>
    where
        F: FnOnce(&mut Self::Tx) -> Fut + Send,
        Fut: Future<Output = OutboxResult<T>> + Send,
        T: Send;

    /// Atomically claim up to `limit` eligible rows for `worker_id` and
    /// transition them to Processing. Two concurrent callers MUST never be
    /// handed the same row.
    ///
    /// Relies on the caller having run `release_stale_locks` earlier in the
    /// same pass: a row whose lock merely went stale is surfaced here as
    /// `locked_at IS NULL`, not re-derived from `lock_timeout` a second time.
    async fn fetch_and_lock_pending(
        &self,
        limit: i64,
        worker_id: &str,
    ) -> OutboxResult<Vec<OutboxMessage>>;

    async fn mark_published(&self, id: Uuid) -> OutboxResult<()>;

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        permanent: bool,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> OutboxResult<()>;

    async fn release_lock(&self, id: Uuid) -> OutboxResult<()>;

    /// Transition every Processing row whose `locked_at < before` back to
    /// Pending. Returns the number of rows reclaimed.
    async fn release_stale_locks(&self, before: DateTime<Utc>) -> OutboxResult<u64>;

    /// Remove Published rows created before `cutoff`. Returns the number of
    /// rows deleted.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64>;
}

/// In-memory reference adapter. A single mutex around a map stands
/// in for row-level `FOR UPDATE SKIP LOCKED`: the whole claim operation runs
/// while the lock is held, so the atomic-claim contract holds for any number
/// of concurrent callers sharing one instance.
#[derive(Default, Clone)]
pub struct InMemoryOutboxRepository {
    rows: Arc<Mutex<HashMap<Uuid, OutboxMessage>>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, for assertions in tests.
    pub async fn snapshot(&self) -> Vec<OutboxMessage> {
        self.rows.lock().await.values().cloned().collect()
    }

    /// Seed a row directly, bypassing `create`/transactions. Used to set up
    /// scenarios like a pre-existing stale lock.
    pub async fn seed(&self, message: OutboxMessage) {
        self.rows.lock().await.insert(message.id, message);
    }

    /// Direct mutable access to the underlying map, for tests that need to
    /// fast-forward `scheduled_at` or fake a pre-existing lock.
    #[cfg(test)]
    pub async fn rows_for_test(&self) -> tokio::sync::MutexGuard<'_, HashMap<Uuid, OutboxMessage>> {
        self.rows.lock().await
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    type Tx = ();

    async fn create(
        &self,
        dto: CreateOutboxMessage,
        _tx: Option<&mut Self::Tx>,
        default_max_retries: i32,
    ) -> OutboxResult<OutboxMessage> {
        let now = Utc::now();
        let message = OutboxMessage {
            id: Uuid::new_v4(),
            aggregate_type: dto.aggregate_type,
            aggregate_id: dto.aggregate_id,
            event_type: dto.event_type,
            payload: dto.payload,
            metadata: dto.metadata.unwrap_or(serde_json::Value::Null),
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: dto.max_retries.unwrap_or(default_max_retries),
            error_message: None,
            scheduled_at: dto.scheduled_at.unwrap_or(now),
            locked_by: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().await.insert(message.id, message.clone());
        Ok(message)
    }

    async fn with_transaction<F, Fut, T>(&self, f: F) -> OutboxResult<T>
    where
        F: FnOnce(&mut Self::Tx) -> Fut + Send,
        Fut: Future<Output = OutboxResult<T>> + Send,
        T: Send,
    {
        let mut tx = ();
        f(&mut tx).await
    }

    async fn fetch_and_lock_pending(
        &self,
        limit: i64,
        worker_id: &str,
    ) -> OutboxResult<Vec<OutboxMessage>> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();

        let mut eligible: Vec<&mut OutboxMessage> = rows
            .values_mut()
            .filter(|m| {
                matches!(m.status, OutboxStatus::Pending | OutboxStatus::Failed)
                    && m.scheduled_at <= now
                    && m.locked_at.is_none()
            })
            .collect();
        eligible.sort_by_key(|m| m.created_at);

        let claimed: Vec<OutboxMessage> = eligible
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|m| {
                m.status = OutboxStatus::Processing;
                m.locked_by = Some(worker_id.to_string());
                m.locked_at = Some(now);
                m.updated_at = now;
                m.clone()
            })
            .collect();

        Ok(claimed)
    }

    async fn mark_published(&self, id: Uuid) -> OutboxResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        row.status = OutboxStatus::Published;
        row.locked_by = None;
        row.locked_at = None;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        permanent: bool,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> OutboxResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        row.retry_count += 1;
        row.error_message = Some(error.to_string());
        row.status = if permanent {
            OutboxStatus::PermanentlyFailed
        } else {
            OutboxStatus::Failed
        };
        row.locked_by = None;
        row.locked_at = None;
        if let Some(scheduled_at) = scheduled_at {
            row.scheduled_at = scheduled_at;
        }
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn release_lock(&self, id: Uuid) -> OutboxResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        row.locked_by = None;
        row.locked_at = None;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn release_stale_locks(&self, before: DateTime<Utc>) -> OutboxResult<u64> {
        let mut rows = self.rows.lock().await;
        let mut count = 0u64;
        for row in rows.values_mut() {
            if row.status == OutboxStatus::Processing {
                if let Some(locked_at) = row.locked_at {
                    if locked_at < before {
                        row.status = OutboxStatus::Pending;
                        row.locked_by = None;
                        row.locked_at = None;
                        row.updated_at = Utc::now();
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, row| {
            !(row.status == OutboxStatus::Published && row.created_at < cutoff)
        });
        Ok((before - rows.len()) as u64)
    }
}
