use super::ConnectionPool;
use super::mappers::{map_record_row, record_data_json};
use super::queries;
use super::rows::RecordRow;
use super::sqlite_queue::{delete_entries_for, insert_entry, select_entries_for, squash_into_tail};
use crate::application::ports::local_store::{LocalStore, RecordQuery};
use crate::domain::entities::record::truncate_to_millis;
use crate::domain::entities::{LocalMutation, NewQueueEntry, Operation, QueueEntryStatus, Record};
use crate::domain::value_objects::{EntityType, LocalId, ServerId, TenantId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

pub struct SqliteLocalStore {
    pool: ConnectionPool,
    squash_updates: bool,
}

impl SqliteLocalStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            squash_updates: false,
        }
    }

    /// Merge repeated UPDATEs into the pending tail entry instead of
    /// appending one entry per write.
    pub fn with_squash_updates(mut self, enabled: bool) -> Self {
        self.squash_updates = enabled;
        self
    }

    async fn apply_mutation(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &TenantId,
        entity_type: EntityType,
        mutation: LocalMutation,
    ) -> Result<Record, AppError> {
        let now = Utc::now();
        match mutation {
            LocalMutation::Create {
                data,
                parent_local_id,
            } => {
                if data.entity_type() != entity_type {
                    return Err(AppError::InvalidInput(format!(
                        "{} fields cannot be stored as {entity_type}",
                        data.entity_type()
                    )));
                }
                let parent_server_id = match parent_local_id {
                    Some(parent_id) => {
                        let parent_type = entity_type.parent_type().ok_or_else(|| {
                            AppError::InvalidInput(format!("{entity_type} records have no parent"))
                        })?;
                        let parent = fetch_record(conn, parent_type, parent_id, false)
                            .await?
                            .ok_or_else(|| {
                                AppError::NotFound(format!("{parent_type} {parent_id}"))
                            })?;
                        ensure_tenant(&parent, tenant_id)?;
                        parent.server_id
                    }
                    None => None,
                };

                let record = Record::new_local(
                    tenant_id.clone(),
                    data,
                    parent_local_id,
                    parent_server_id,
                    now,
                );
                insert_record(conn, &record).await?;
                let snapshot = record.data.to_snapshot()?;
                insert_entry(
                    conn,
                    &NewQueueEntry::new(
                        tenant_id.clone(),
                        entity_type,
                        record.local_id,
                        Operation::Create,
                        Some(snapshot),
                    ),
                    now,
                )
                .await?;
                if record.data.pending_upload().is_some() {
                    enqueue_upload(conn, &record, now).await?;
                }
                Ok(record)
            }
            LocalMutation::Update { local_id, patch } => {
                if patch.is_empty() {
                    return Err(AppError::InvalidInput("update without fields".to_string()));
                }
                let mut record = fetch_record(conn, entity_type, local_id, false)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{entity_type} {local_id}")))?;
                ensure_tenant(&record, tenant_id)?;

                record
                    .data
                    .apply_patch(&patch)
                    .map_err(AppError::ValidationError)?;
                record.updated_at = truncate_to_millis(now);
                record.revision += 1;
                update_record(conn, &record, None).await?;

                let squashed = self.squash_updates
                    && squash_into_tail(conn, entity_type, local_id, &patch, now).await?;
                if !squashed {
                    insert_entry(
                        conn,
                        &NewQueueEntry::new(
                            tenant_id.clone(),
                            entity_type,
                            local_id,
                            Operation::Update,
                            Some(patch.clone()),
                        ),
                        now,
                    )
                    .await?;
                }
                if patch.get("local_path").is_some() && record.data.pending_upload().is_some() {
                    let queued = select_entries_for(conn, entity_type, local_id).await?;
                    let waiting = queued.iter().any(|entry| {
                        entry.operation == Operation::Upload
                            && entry.status == QueueEntryStatus::Pending
                    });
                    if !waiting {
                        enqueue_upload(conn, &record, now).await?;
                    }
                }
                Ok(record)
            }
            LocalMutation::Delete { local_id } => {
                let mut record = fetch_record(conn, entity_type, local_id, false)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{entity_type} {local_id}")))?;
                ensure_tenant(&record, tenant_id)?;
                record.deleted = true;
                record.updated_at = truncate_to_millis(now);
                record.revision += 1;

                if self.squash_updates && record.server_id.is_none() {
                    let entries = select_entries_for(conn, entity_type, local_id).await?;
                    if entries
                        .iter()
                        .all(|entry| entry.status == QueueEntryStatus::Pending)
                    {
                        // never reached the remote: nothing to tell it
                        delete_entries_for(conn, entity_type, local_id).await?;
                        delete_row(conn, entity_type, local_id, None).await?;
                        return Ok(record);
                    }
                }

                update_record(conn, &record, None).await?;
                insert_entry(
                    conn,
                    &NewQueueEntry::new(
                        tenant_id.clone(),
                        entity_type,
                        local_id,
                        Operation::Delete,
                        None,
                    ),
                    now,
                )
                .await?;
                Ok(record)
            }
        }
    }
}

async fn enqueue_upload(
    conn: &mut SqliteConnection,
    record: &Record,
    now: chrono::DateTime<Utc>,
) -> Result<(), AppError> {
    insert_entry(
        conn,
        &NewQueueEntry::new(
            record.tenant_id.clone(),
            record.entity_type(),
            record.local_id,
            Operation::Upload,
            None,
        ),
        now,
    )
    .await?;
    Ok(())
}

fn ensure_tenant(record: &Record, tenant_id: &TenantId) -> Result<(), AppError> {
    if &record.tenant_id != tenant_id {
        return Err(AppError::TenantMismatch(format!(
            "{} {} belongs to another tenant",
            record.entity_type(),
            record.local_id
        )));
    }
    Ok(())
}

async fn fetch_record(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    local_id: LocalId,
    include_deleted: bool,
) -> Result<Option<Record>, AppError> {
    let sql = queries::select_record_by_local_id(entity_type, include_deleted);
    let row = sqlx::query_as::<_, RecordRow>(&sql)
        .bind(local_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|row| map_record_row(entity_type, row)).transpose()
}

async fn insert_record(conn: &mut SqliteConnection, record: &Record) -> Result<(), AppError> {
    let sql = queries::insert_record(record.entity_type());
    sqlx::query(&sql)
        .bind(record.local_id.to_string())
        .bind(record.server_id.as_ref().map(ServerId::as_str))
        .bind(record.tenant_id.as_str())
        .bind(record.parent_local_id.map(|id| id.to_string()))
        .bind(record.parent_server_id.as_ref().map(ServerId::as_str))
        .bind(record_data_json(&record.data)?)
        .bind(record.updated_at.timestamp_millis())
        .bind(record.revision)
        .bind(record.deleted)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn update_record(
    conn: &mut SqliteConnection,
    record: &Record,
    expected_revision: Option<i64>,
) -> Result<bool, AppError> {
    let sql = queries::update_record(record.entity_type(), expected_revision.is_some());
    let mut query = sqlx::query(&sql)
        .bind(record.server_id.as_ref().map(ServerId::as_str))
        .bind(record.tenant_id.as_str())
        .bind(record.parent_local_id.map(|id| id.to_string()))
        .bind(record.parent_server_id.as_ref().map(ServerId::as_str))
        .bind(record_data_json(&record.data)?)
        .bind(record.updated_at.timestamp_millis())
        .bind(record.revision)
        .bind(record.deleted)
        .bind(record.local_id.to_string());
    if let Some(expected) = expected_revision {
        query = query.bind(expected);
    }
    let result = query.execute(&mut *conn).await?;
    Ok(result.rows_affected() == 1)
}

async fn delete_row(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    local_id: LocalId,
    expected_revision: Option<i64>,
) -> Result<bool, AppError> {
    let sql = queries::delete_record(entity_type, expected_revision.is_some());
    let mut query = sqlx::query(&sql).bind(local_id.to_string());
    if let Some(expected) = expected_revision {
        query = query.bind(expected);
    }
    let result = query.execute(&mut *conn).await?;
    Ok(result.rows_affected() == 1)
}

fn child_types(entity_type: EntityType) -> impl Iterator<Item = EntityType> {
    EntityType::ALL
        .into_iter()
        .filter(move |child| child.parent_type() == Some(entity_type))
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
    ) -> Result<Option<Record>, AppError> {
        let mut conn = self.pool.get_pool().acquire().await?;
        fetch_record(&mut conn, entity_type, local_id, false).await
    }

    async fn get_any(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
    ) -> Result<Option<Record>, AppError> {
        let mut conn = self.pool.get_pool().acquire().await?;
        fetch_record(&mut conn, entity_type, local_id, true).await
    }

    async fn find_by_server_id(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
    ) -> Result<Option<Record>, AppError> {
        let sql = queries::select_record_by_server_id(entity_type);
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant_id.as_str())
            .bind(server_id.as_str())
            .fetch_optional(self.pool.get_pool())
            .await?;
        row.map(|row| map_record_row(entity_type, row)).transpose()
    }

    async fn query(
        &self,
        entity_type: EntityType,
        query: &RecordQuery,
    ) -> Result<Vec<Record>, AppError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(queries::select_records(entity_type));
        builder.push_bind(query.tenant_id.as_str());
        if let Some(parent) = query.parent_local_id {
            builder.push(" AND parent_local_id = ");
            builder.push_bind(parent.to_string());
        }
        match query.has_server_id {
            Some(true) => {
                builder.push(" AND server_id IS NOT NULL");
            }
            Some(false) => {
                builder.push(" AND server_id IS NULL");
            }
            None => {}
        }
        if !query.include_deleted {
            builder.push(" AND is_deleted = 0");
        }
        builder.push(" ORDER BY updated_at DESC, local_id ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
        }

        let rows = builder
            .build_query_as::<RecordRow>()
            .fetch_all(self.pool.get_pool())
            .await?;
        rows.into_iter()
            .map(|row| map_record_row(entity_type, row))
            .collect()
    }

    async fn write_local(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        mutation: LocalMutation,
    ) -> Result<Record, AppError> {
        let _gate = self.pool.write_lock().await;
        let mut tx = self.pool.get_pool().begin().await?;
        let record = self
            .apply_mutation(&mut tx, tenant_id, entity_type, mutation)
            .await?;
        tx.commit().await?;

        tracing::debug!(
            target: "store",
            entity_type = %entity_type,
            local_id = %record.local_id,
            revision = record.revision,
            deleted = record.deleted,
            "local write committed"
        );
        Ok(record)
    }

    async fn upsert_from_remote(
        &self,
        record: &Record,
        expected_revision: Option<i64>,
    ) -> Result<Option<Record>, AppError> {
        let _gate = self.pool.write_lock().await;
        let mut conn = self.pool.get_pool().acquire().await?;
        let mut written = record.clone();
        match expected_revision {
            None => {
                written.revision = 1;
                insert_record(&mut conn, &written).await?;
            }
            Some(expected) => {
                written.revision = expected + 1;
                if !update_record(&mut conn, &written, Some(expected)).await? {
                    return Ok(None);
                }
            }
        }
        Ok(Some(written))
    }

    async fn remove(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
        expected_revision: Option<i64>,
    ) -> Result<bool, AppError> {
        let _gate = self.pool.write_lock().await;
        let mut conn = self.pool.get_pool().acquire().await?;
        delete_row(&mut conn, entity_type, local_id, expected_revision).await
    }

    async fn stamp_server_id(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
        server_id: &ServerId,
    ) -> Result<(), AppError> {
        let _gate = self.pool.write_lock().await;
        let mut tx = self.pool.get_pool().begin().await?;
        let record = fetch_record(&mut tx, entity_type, local_id, true)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{entity_type} {local_id}")))?;

        // A pull may already have stored the remote copy under a fresh local
        // id before this acknowledgement arrived. Fold it into this row.
        let sql = queries::select_conflicting_server_id(entity_type);
        let duplicates: Vec<(String,)> = sqlx::query_as(&sql)
            .bind(record.tenant_id.as_str())
            .bind(server_id.as_str())
            .bind(local_id.to_string())
            .fetch_all(&mut *tx)
            .await?;
        for (duplicate_id,) in duplicates {
            sqlx::query(&queries::delete_record(entity_type, false))
                .bind(&duplicate_id)
                .execute(&mut *tx)
                .await?;
            for child in child_types(entity_type) {
                sqlx::query(&queries::relink_children(child))
                    .bind(local_id.to_string())
                    .bind(&duplicate_id)
                    .execute(&mut *tx)
                    .await?;
            }
            tracing::debug!(
                target: "store",
                entity_type = %entity_type,
                local_id = %local_id,
                duplicate_id = %duplicate_id,
                "merged pulled duplicate into acknowledged record"
            );
        }

        sqlx::query(&queries::stamp_server_id(entity_type))
            .bind(server_id.as_str())
            .bind(local_id.to_string())
            .execute(&mut *tx)
            .await?;
        for child in child_types(entity_type) {
            sqlx::query(&queries::link_children(child))
                .bind(server_id.as_str())
                .bind(local_id.to_string())
                .bind(server_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn stamp_attachment(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
        uploaded_path: &str,
        remote_url: &str,
    ) -> Result<Option<Record>, AppError> {
        let _gate = self.pool.write_lock().await;
        let mut tx = self.pool.get_pool().begin().await?;
        let Some(mut record) = fetch_record(&mut tx, entity_type, local_id, true).await? else {
            return Ok(None);
        };
        let current = record.data.pending_upload();
        if current.as_ref().map(|p| p.local_path.as_str()) != Some(uploaded_path) {
            return Ok(None);
        }
        record.data.mark_uploaded(remote_url.to_string());
        record.revision += 1;
        update_record(&mut tx, &record, None).await?;
        tx.commit().await?;
        Ok(Some(record))
    }

    async fn restore_deleted(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
    ) -> Result<(), AppError> {
        let _gate = self.pool.write_lock().await;
        sqlx::query(&queries::restore_record(entity_type))
            .bind(local_id.to_string())
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), AppError> {
        let _gate = self.pool.write_lock().await;
        let mut tx = self.pool.get_pool().begin().await?;
        for entity_type in EntityType::ALL {
            sqlx::query(&queries::delete_all_records(entity_type))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
