use super::ConnectionPool;
use super::mappers::{map_queue_row, payload_json};
use super::queries::{
    COUNT_FAILED_ENTRIES, COUNT_QUEUE_ENTRIES, DEFER_ENTRY, DELETE_ALL_QUEUE_ENTRIES,
    DELETE_ENTRIES_FOR_ENTITY, DELETE_QUEUE_ENTRY, INSERT_QUEUE_ENTRY, MARK_IN_FLIGHT,
    RECOVER_IN_FLIGHT, RETRY_FAILED_ENTRY, SELECT_DRAINABLE_BATCH, SELECT_ENTRIES_FOR_ENTITY,
    SELECT_FAILED_ENTRIES, SELECT_QUEUE_ENTRY, SELECT_UPLOAD_BATCH, SQUASH_INTO_ENTRY,
    UPDATE_AFTER_FAILURE,
};
use super::rows::QueueEntryRow;
use crate::application::ports::operation_queue::OperationQueue;
use crate::application::services::retry_policy::RetryPolicy;
use crate::domain::entities::{NewQueueEntry, Operation, QueueEntry, QueueEntryStatus};
use crate::domain::value_objects::{EntityType, FieldPatch, LocalId, QueueEntryId, TenantId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

pub struct SqliteOperationQueue {
    pool: ConnectionPool,
    policy: RetryPolicy,
}

impl SqliteOperationQueue {
    pub fn new(pool: ConnectionPool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

// Helpers shared with the record store, which enqueues inside its own
// transaction.

pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &NewQueueEntry,
    now: DateTime<Utc>,
) -> Result<QueueEntry, AppError> {
    let now_ms = now.timestamp_millis();
    let row = sqlx::query_as::<_, QueueEntryRow>(INSERT_QUEUE_ENTRY)
        .bind(entry.tenant_id.as_str())
        .bind(entry.entity_type.as_str())
        .bind(entry.entity_id.to_string())
        .bind(entry.operation.as_str())
        .bind(payload_json(entry.payload.as_ref())?)
        .bind(i64::from(entry.effective_priority()))
        .bind(now_ms)
        .bind(now_ms)
        .fetch_one(&mut *conn)
        .await?;
    map_queue_row(row)
}

pub(crate) async fn select_entries_for(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: LocalId,
) -> Result<Vec<QueueEntry>, AppError> {
    let rows = sqlx::query_as::<_, QueueEntryRow>(SELECT_ENTRIES_FOR_ENTITY)
        .bind(entity_type.as_str())
        .bind(entity_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(map_queue_row).collect()
}

pub(crate) async fn delete_entries_for(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: LocalId,
) -> Result<u64, AppError> {
    let result = sqlx::query(DELETE_ENTRIES_FOR_ENTITY)
        .bind(entity_type.as_str())
        .bind(entity_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Folds `patch` into the newest entry of the entity when that entry is a
/// pending CREATE or UPDATE. Returns `false` when nothing could be merged.
pub(crate) async fn squash_into_tail(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: LocalId,
    patch: &FieldPatch,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let entries = select_entries_for(conn, entity_type, entity_id).await?;
    let Some(tail) = entries.last() else {
        return Ok(false);
    };
    if tail.status != QueueEntryStatus::Pending
        || !matches!(tail.operation, Operation::Create | Operation::Update)
    {
        return Ok(false);
    }

    let mut merged = tail.payload.clone().unwrap_or_default();
    merged.merge(patch);
    let result = sqlx::query(SQUASH_INTO_ENTRY)
        .bind(payload_json(Some(&merged))?)
        .bind(now.timestamp_millis())
        .bind(tail.id.value())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 1 {
        tracing::debug!(
            target: "store",
            entity_type = %entity_type,
            entity_id = %entity_id,
            queue_id = %tail.id,
            "squashed update into pending entry"
        );
    }
    Ok(result.rows_affected() == 1)
}

async fn select_entry(
    conn: &mut SqliteConnection,
    id: QueueEntryId,
) -> Result<Option<QueueEntry>, AppError> {
    let row = sqlx::query_as::<_, QueueEntryRow>(SELECT_QUEUE_ENTRY)
        .bind(id.value())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(map_queue_row).transpose()
}

#[async_trait]
impl OperationQueue for SqliteOperationQueue {
    async fn enqueue(&self, entry: NewQueueEntry) -> Result<QueueEntry, AppError> {
        let _gate = self.pool.write_lock().await;
        let mut conn = self.pool.get_pool().acquire().await?;
        insert_entry(&mut conn, &entry, Utc::now()).await
    }

    async fn peek_batch(
        &self,
        tenant_id: &TenantId,
        max_n: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, AppError> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(SELECT_DRAINABLE_BATCH)
            .bind(tenant_id.as_str())
            .bind(now.timestamp_millis())
            .bind(i64::from(max_n))
            .fetch_all(self.pool.get_pool())
            .await?;
        rows.into_iter().map(map_queue_row).collect()
    }

    async fn peek_uploads(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        max_n: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, AppError> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(SELECT_UPLOAD_BATCH)
            .bind(tenant_id.as_str())
            .bind(entity_type.as_str())
            .bind(now.timestamp_millis())
            .bind(i64::from(max_n))
            .fetch_all(self.pool.get_pool())
            .await?;
        rows.into_iter().map(map_queue_row).collect()
    }

    async fn get(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, AppError> {
        let mut conn = self.pool.get_pool().acquire().await?;
        select_entry(&mut conn, id).await
    }

    async fn mark_in_flight(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, AppError> {
        let _gate = self.pool.write_lock().await;
        let mut conn = self.pool.get_pool().acquire().await?;
        let result = sqlx::query(MARK_IN_FLIGHT)
            .bind(Utc::now().timestamp_millis())
            .bind(id.value())
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        select_entry(&mut conn, id).await
    }

    async fn mark_succeeded(&self, id: QueueEntryId) -> Result<(), AppError> {
        let _gate = self.pool.write_lock().await;
        sqlx::query(DELETE_QUEUE_ENTRY)
            .bind(id.value())
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: QueueEntryId,
        error: &str,
        retryable: bool,
    ) -> Result<QueueEntry, AppError> {
        let _gate = self.pool.write_lock().await;
        let mut tx = self.pool.get_pool().begin().await?;
        let mut entry = select_entry(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("queue entry {id}")))?;

        let now = Utc::now();
        entry.retry_count = entry.retry_count.saturating_add(1);
        entry.last_error = Some(error.to_string());
        entry.updated_at = now;
        if !retryable || self.policy.is_exhausted(entry.retry_count) {
            entry.status = QueueEntryStatus::Failed;
            entry.next_attempt_at = None;
        } else {
            entry.status = QueueEntryStatus::Pending;
            entry.next_attempt_at = Some(self.policy.next_attempt_at(now, entry.retry_count));
        }

        sqlx::query(UPDATE_AFTER_FAILURE)
            .bind(entry.status.as_str())
            .bind(i64::from(entry.retry_count))
            .bind(error)
            .bind(entry.next_attempt_at.map(|at| at.timestamp_millis()))
            .bind(now.timestamp_millis())
            .bind(id.value())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if entry.is_terminal() {
            tracing::warn!(
                target: "sync::push",
                queue_id = %id,
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                retry_count = entry.retry_count,
                error,
                "queue entry failed terminally"
            );
        }
        Ok(entry)
    }

    async fn defer(&self, id: QueueEntryId, reason: &str) -> Result<(), AppError> {
        let _gate = self.pool.write_lock().await;
        sqlx::query(DEFER_ENTRY)
            .bind(reason)
            .bind(Utc::now().timestamp_millis())
            .bind(id.value())
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    async fn entries_for(
        &self,
        entity_type: EntityType,
        entity_id: LocalId,
    ) -> Result<Vec<QueueEntry>, AppError> {
        let mut conn = self.pool.get_pool().acquire().await?;
        select_entries_for(&mut conn, entity_type, entity_id).await
    }

    async fn count(&self, tenant_id: &TenantId) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar(COUNT_QUEUE_ENTRIES)
            .bind(tenant_id.as_str())
            .fetch_one(self.pool.get_pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_failed(&self, tenant_id: &TenantId) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar(COUNT_FAILED_ENTRIES)
            .bind(tenant_id.as_str())
            .fetch_one(self.pool.get_pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_failed(&self, tenant_id: &TenantId) -> Result<Vec<QueueEntry>, AppError> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(SELECT_FAILED_ENTRIES)
            .bind(tenant_id.as_str())
            .fetch_all(self.pool.get_pool())
            .await?;
        rows.into_iter().map(map_queue_row).collect()
    }

    async fn retry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, AppError> {
        let _gate = self.pool.write_lock().await;
        let mut conn = self.pool.get_pool().acquire().await?;
        let result = sqlx::query(RETRY_FAILED_ENTRY)
            .bind(Utc::now().timestamp_millis())
            .bind(id.value())
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        select_entry(&mut conn, id).await
    }

    async fn discard(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, AppError> {
        let _gate = self.pool.write_lock().await;
        let mut tx = self.pool.get_pool().begin().await?;
        let Some(entry) = select_entry(&mut tx, id).await? else {
            return Ok(None);
        };
        if !entry.is_terminal() {
            return Err(AppError::InvalidInput(format!(
                "queue entry {id} is {} and cannot be discarded",
                entry.status
            )));
        }
        sqlx::query(DELETE_QUEUE_ENTRY)
            .bind(id.value())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(entry))
    }

    async fn recover_in_flight(&self) -> Result<u64, AppError> {
        let _gate = self.pool.write_lock().await;
        let result = sqlx::query(RECOVER_IN_FLIGHT)
            .bind(Utc::now().timestamp_millis())
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> Result<(), AppError> {
        let _gate = self.pool.write_lock().await;
        sqlx::query(DELETE_ALL_QUEUE_ENTRIES)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }
}
