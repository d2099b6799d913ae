use super::rows::{QueueEntryRow, RecordRow};
use crate::domain::entities::{Operation, QueueEntry, QueueEntryStatus, Record, RecordData};
use crate::domain::value_objects::{
    EntityType, FieldPatch, LocalId, QueueEntryId, ServerId, TenantId,
};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};

pub(crate) fn timestamp(ms: i64, column: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::DeserializationError(format!("Invalid {column} timestamp: {ms}")))
}

fn decode<T>(result: Result<T, String>) -> Result<T, AppError> {
    result.map_err(AppError::DeserializationError)
}

pub(crate) fn map_record_row(entity_type: EntityType, row: RecordRow) -> Result<Record, AppError> {
    let fields: serde_json::Value = serde_json::from_str(&row.data)
        .map_err(|e| AppError::DeserializationError(format!("Invalid record data: {e}")))?;
    let data = RecordData::from_fields(entity_type, fields).map_err(|e| {
        AppError::DeserializationError(format!("Invalid {entity_type} fields: {e}"))
    })?;

    Ok(Record {
        local_id: decode(LocalId::from_str(&row.local_id))?,
        server_id: row
            .server_id
            .map(ServerId::new)
            .transpose()
            .map_err(AppError::DeserializationError)?,
        tenant_id: decode(TenantId::new(row.tenant_id))?,
        parent_local_id: row
            .parent_local_id
            .as_deref()
            .map(LocalId::from_str)
            .transpose()
            .map_err(AppError::DeserializationError)?,
        parent_server_id: row
            .parent_server_id
            .map(ServerId::new)
            .transpose()
            .map_err(AppError::DeserializationError)?,
        data,
        updated_at: timestamp(row.updated_at, "updated_at")?,
        revision: row.revision,
        deleted: row.is_deleted,
    })
}

pub(crate) fn record_data_json(data: &RecordData) -> Result<String, AppError> {
    let fields = data.to_fields()?;
    Ok(serde_json::to_string(&fields)?)
}

pub(crate) fn map_queue_row(row: QueueEntryRow) -> Result<QueueEntry, AppError> {
    let payload = match row.payload.as_deref() {
        Some(json) => Some(decode(FieldPatch::from_json_str(json))?),
        None => None,
    };
    let next_attempt_at = row
        .next_attempt_at
        .map(|ms| timestamp(ms, "next_attempt_at"))
        .transpose()?;

    Ok(QueueEntry {
        id: decode(QueueEntryId::new(row.id))?,
        tenant_id: decode(TenantId::new(row.tenant_id))?,
        entity_type: decode(EntityType::parse(&row.entity_type))?,
        entity_id: decode(LocalId::from_str(&row.entity_id))?,
        operation: decode(Operation::parse(&row.operation))?,
        payload,
        priority: u8::try_from(row.priority).unwrap_or(u8::MAX),
        status: decode(QueueEntryStatus::parse(&row.status))?,
        retry_count: u32::try_from(row.retry_count).unwrap_or(0),
        last_error: row.last_error,
        next_attempt_at,
        created_at: timestamp(row.created_at, "created_at")?,
        updated_at: timestamp(row.updated_at, "updated_at")?,
    })
}

pub(crate) fn payload_json(payload: Option<&FieldPatch>) -> Result<Option<String>, AppError> {
    payload
        .map(|patch| serde_json::to_string(patch.as_map()))
        .transpose()
        .map_err(AppError::from)
}
