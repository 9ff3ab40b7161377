//! Repository contract the inbox service depends on, plus an in-memory
//! reference adapter used by the test suite.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{InboxError, InboxResult};
use crate::message::{InboxMessage, InboxStatus, RecordOutcome, ReceiveMessage};

/// Abstracts storage for the inbox side. `record` is the single operation
/// that must be safe under concurrent insert attempts for the same
/// `(message_id, source)` pair: implementations MUST either win the insert
/// race or observe the winner's row, never neither.
#[async_trait]
pub trait InboxRepository: Send + Sync {
    async fn record(&self, dto: ReceiveMessage, default_max_retries: i32) -> InboxResult<RecordOutcome>;

    async fn exists(&self, message_id: &str, source: &str) -> InboxResult<bool>;

    async fn mark_processing(&self, id: Uuid) -> InboxResult<()>;

    async fn mark_processed(&self, id: Uuid) -> InboxResult<()>;

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        permanent: bool,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> InboxResult<()>;

    /// Rows eligible for the retry loop: `status = Failed`,
    /// `retry_count < max_retries`, `scheduled_at <= now OR scheduled_at IS
    /// NULL`, in `created_at` order. Only required when inbox retry is
    /// enabled.
    async fn find_retryable(&self, limit: i64) -> InboxResult<Vec<InboxMessage>>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> InboxResult<u64>;
}

/// In-memory reference adapter. The dedup key `(message_id, source)` is
/// enforced by a secondary index checked under the same lock as the insert,
/// so two concurrent `record` calls for the same key never both win.
#[derive(Default, Clone)]
pub struct InMemoryInboxRepository {
    rows: Arc<Mutex<HashMap<Uuid, InboxMessage>>>,
}

impl InMemoryInboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<InboxMessage> {
        self.rows.lock().await.values().cloned().collect()
    }

    #[cfg(test)]
    pub async fn rows_for_test(&self) -> tokio::sync::MutexGuard<'_, HashMap<Uuid, InboxMessage>> {
        self.rows.lock().await
    }
}

#[async_trait]
impl InboxRepository for InMemoryInboxRepository {
    async fn record(&self, dto: ReceiveMessage, default_max_retries: i32) -> InboxResult<RecordOutcome> {
        let mut rows = self.rows.lock().await;

        if let Some(existing) = rows
            .values()
            .find(|m| m.message_id == dto.message_id && m.source == dto.source)
        {
            return Ok(RecordOutcome {
                message: existing.clone(),
                is_duplicate: true,
            });
        }

        let now = Utc::now();
        let message = InboxMessage {
            id: Uuid::new_v4(),
            message_id: dto.message_id,
            source: dto.source,
            event_type: dto.event_type,
            payload: dto.payload,
            status: InboxStatus::Received,
            retry_count: 0,
            max_retries: dto.max_retries.unwrap_or(default_max_retries),
            scheduled_at: None,
            processed_at: None,
            error_message: None,
            created_at: now,
        };
        rows.insert(message.id, message.clone());
        Ok(RecordOutcome {
            message,
            is_duplicate: false,
        })
    }

    async fn exists(&self, message_id: &str, source: &str) -> InboxResult<bool> {
        let rows = self.rows.lock().await;
        Ok(rows.values().any(|m| m.message_id == message_id && m.source == source))
    }

    async fn mark_processing(&self, id: Uuid) -> InboxResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or(InboxError::NotFound(id))?;
        row.status = InboxStatus::Processing;
        Ok(())
    }

    async fn mark_processed(&self, id: Uuid) -> InboxResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or(InboxError::NotFound(id))?;
        row.status = InboxStatus::Processed;
        row.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        permanent: bool,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> InboxResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or(InboxError::NotFound(id))?;
        row.retry_count += 1;
        row.error_message = Some(error.to_string());
        row.status = if permanent {
            InboxStatus::PermanentlyFailed
        } else {
            InboxStatus::Failed
        };
        row.scheduled_at = scheduled_at;
        Ok(())
    }

    async fn find_retryable(&self, limit: i64) -> InboxResult<Vec<InboxMessage>> {
        let rows = self.rows.lock().await;
        let now = Utc::now();
        let mut retryable: Vec<InboxMessage> = rows
            .values()
            .filter(|m| {
                m.status == InboxStatus::Failed
                    && m.retry_count < m.max_retries
                    && m.scheduled_at.map(|s| s <= now).unwrap_or(true)
            })
            .cloned()
            .collect();
        retryable.sort_by_key(|m| m.created_at);
        retryable.truncate(limit.max(0) as usize);
        Ok(retryable)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> InboxResult<u64> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, row| !(row.status == InboxStatus::Processed && row.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_older_than_removes_only_the_old_processed_row() {
        let repo = InMemoryInboxRepository::new();

        let old = repo
            .record(ReceiveMessage::new("old", "svc-a", "order.created", serde_json::json!({})), 3)
            .await
            .unwrap()
            .message;
        let recent = repo
            .record(ReceiveMessage::new("recent", "svc-a", "order.created", serde_json::json!({})), 3)
            .await
            .unwrap()
            .message;
        let never_processed = repo
            .record(ReceiveMessage::new("pending", "svc-a", "order.created", serde_json::json!({})), 3)
            .await
            .unwrap()
            .message;

        repo.mark_processed(old.id).await.unwrap();
        repo.mark_processed(recent.id).await.unwrap();

        {
            let mut rows = repo.rows_for_test().await;
            rows.get_mut(&old.id).unwrap().created_at = Utc::now() - chrono::Duration::days(30);
            rows.get_mut(&recent.id).unwrap().created_at = Utc::now();
            rows.get_mut(&never_processed.id).unwrap().created_at = Utc::now() - chrono::Duration::days(30);
        }

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let deleted = repo.delete_older_than(cutoff).await.unwrap();

        assert_eq!(deleted, 1);
        let remaining = repo.snapshot().await;
        assert!(remaining.iter().any(|m| m.id == recent.id));
        assert!(remaining.iter().any(|m| m.id == never_processed.id));
        assert!(!remaining.iter().any(|m| m.id == old.id));
    }
}
