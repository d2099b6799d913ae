use crate::domain::entities::{NewQueueEntry, QueueEntry};
use crate::domain::value_objects::{EntityType, LocalId, QueueEntryId, TenantId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable log of local mutations not yet acknowledged by the remote service.
#[async_trait]
pub trait OperationQueue: Send + Sync {
    async fn enqueue(&self, entry: NewQueueEntry) -> Result<QueueEntry, AppError>;

    /// Up to `max_n` pending entries that are due at `now`, higher priority
    /// first and oldest first within a priority. An entry is only returned
    /// when every earlier entry of the same entity is returned too, so a
    /// failed or backed-off head holds back the rest of its chain.
    async fn peek_batch(
        &self,
        tenant_id: &TenantId,
        max_n: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, AppError>;

    /// Up to `max_n` due UPLOAD entries of `entity_type` whose record has no
    /// earlier queued operation left, i.e. the remote already knows it.
    async fn peek_uploads(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        max_n: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, AppError>;

    async fn get(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, AppError>;

    /// Claims a pending entry for the running cycle and returns its current
    /// contents. `None` if it is gone or no longer pending.
    async fn mark_in_flight(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, AppError>;

    /// Acknowledged by the remote service: the entry is deleted.
    async fn mark_succeeded(&self, id: QueueEntryId) -> Result<(), AppError>;

    /// Increments `retry_count` and stores the error. Retryable failures go
    /// back to pending with a backoff; non-retryable ones, and retryable ones
    /// past the retry limit, become terminally failed.
    async fn mark_failed(
        &self,
        id: QueueEntryId,
        error: &str,
        retryable: bool,
    ) -> Result<QueueEntry, AppError>;

    /// Returns an entry to pending without counting a retry.
    async fn defer(&self, id: QueueEntryId, reason: &str) -> Result<(), AppError>;

    /// Every entry of one entity, in creation order.
    async fn entries_for(
        &self,
        entity_type: EntityType,
        entity_id: LocalId,
    ) -> Result<Vec<QueueEntry>, AppError>;

    /// Not-yet-acknowledged entries, terminal failures included.
    async fn count(&self, tenant_id: &TenantId) -> Result<u64, AppError>;

    async fn count_failed(&self, tenant_id: &TenantId) -> Result<u64, AppError>;

    async fn list_failed(&self, tenant_id: &TenantId) -> Result<Vec<QueueEntry>, AppError>;

    /// Puts a terminally failed entry back in line with a fresh retry budget.
    async fn retry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, AppError>;

    /// Deletes a terminally failed entry and returns it.
    async fn discard(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, AppError>;

    /// Returns entries left `in_flight` by an interrupted cycle to pending.
    async fn recover_in_flight(&self) -> Result<u64, AppError>;

    async fn clear(&self) -> Result<(), AppError>;
}
