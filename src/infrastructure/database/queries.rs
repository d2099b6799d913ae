use crate::domain::value_objects::EntityType;

// sync_queue

pub const INSERT_QUEUE_ENTRY: &str = r#"
    INSERT INTO sync_queue
        (tenant_id, entity_type, entity_id, operation, payload, priority, status,
         retry_count, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)
    RETURNING id, tenant_id, entity_type, entity_id, operation, payload, priority, status,
              retry_count, last_error, next_attempt_at, created_at, updated_at
"#;

/// Pending, due entries whose whole same-entity prefix is pending and due.
pub const SELECT_DRAINABLE_BATCH: &str = r#"
    SELECT q.id, q.tenant_id, q.entity_type, q.entity_id, q.operation, q.payload, q.priority,
           q.status, q.retry_count, q.last_error, q.next_attempt_at, q.created_at, q.updated_at
    FROM sync_queue q
    WHERE q.tenant_id = ?1
      AND q.status = 'pending'
      AND (q.next_attempt_at IS NULL OR q.next_attempt_at <= ?2)
      AND NOT EXISTS (
          SELECT 1 FROM sync_queue p
          WHERE p.entity_type = q.entity_type
            AND p.entity_id = q.entity_id
            AND p.id < q.id
            AND (p.status != 'pending'
                 OR (p.next_attempt_at IS NOT NULL AND p.next_attempt_at > ?2))
      )
    ORDER BY q.priority DESC, q.created_at ASC, q.id ASC
    LIMIT ?3
"#;

/// Due UPLOAD entries of one entity type with nothing queued before them.
pub const SELECT_UPLOAD_BATCH: &str = r#"
    SELECT q.id, q.tenant_id, q.entity_type, q.entity_id, q.operation, q.payload, q.priority,
           q.status, q.retry_count, q.last_error, q.next_attempt_at, q.created_at, q.updated_at
    FROM sync_queue q
    WHERE q.tenant_id = ?1
      AND q.entity_type = ?2
      AND q.operation = 'UPLOAD'
      AND q.status = 'pending'
      AND (q.next_attempt_at IS NULL OR q.next_attempt_at <= ?3)
      AND NOT EXISTS (
          SELECT 1 FROM sync_queue p
          WHERE p.entity_type = q.entity_type
            AND p.entity_id = q.entity_id
            AND p.id < q.id
      )
    ORDER BY q.priority DESC, q.created_at ASC, q.id ASC
    LIMIT ?4
"#;

pub const SELECT_QUEUE_ENTRY: &str = r#"
    SELECT id, tenant_id, entity_type, entity_id, operation, payload, priority, status,
           retry_count, last_error, next_attempt_at, created_at, updated_at
    FROM sync_queue WHERE id = ?
"#;

pub const SELECT_ENTRIES_FOR_ENTITY: &str = r#"
    SELECT id, tenant_id, entity_type, entity_id, operation, payload, priority, status,
           retry_count, last_error, next_attempt_at, created_at, updated_at
    FROM sync_queue WHERE entity_type = ? AND entity_id = ?
    ORDER BY id ASC
"#;

pub const SELECT_FAILED_ENTRIES: &str = r#"
    SELECT id, tenant_id, entity_type, entity_id, operation, payload, priority, status,
           retry_count, last_error, next_attempt_at, created_at, updated_at
    FROM sync_queue WHERE tenant_id = ? AND status = 'failed'
    ORDER BY id ASC
"#;

pub const MARK_IN_FLIGHT: &str = r#"
    UPDATE sync_queue SET status = 'in_flight', updated_at = ?
    WHERE id = ? AND status = 'pending'
"#;

pub const UPDATE_AFTER_FAILURE: &str = r#"
    UPDATE sync_queue
    SET status = ?, retry_count = ?, last_error = ?, next_attempt_at = ?, updated_at = ?
    WHERE id = ?
"#;

pub const DEFER_ENTRY: &str = r#"
    UPDATE sync_queue SET status = 'pending', last_error = ?, updated_at = ?
    WHERE id = ? AND status = 'in_flight'
"#;

pub const RETRY_FAILED_ENTRY: &str = r#"
    UPDATE sync_queue
    SET status = 'pending', retry_count = 0, next_attempt_at = NULL, updated_at = ?
    WHERE id = ? AND status = 'failed'
"#;

pub const SQUASH_INTO_ENTRY: &str = r#"
    UPDATE sync_queue SET payload = ?, updated_at = ?
    WHERE id = ? AND status = 'pending'
"#;

pub const RECOVER_IN_FLIGHT: &str =
    "UPDATE sync_queue SET status = 'pending', updated_at = ? WHERE status = 'in_flight'";

pub const DELETE_QUEUE_ENTRY: &str = "DELETE FROM sync_queue WHERE id = ?";
pub const DELETE_ENTRIES_FOR_ENTITY: &str =
    "DELETE FROM sync_queue WHERE entity_type = ? AND entity_id = ?";
pub const DELETE_ALL_QUEUE_ENTRIES: &str = "DELETE FROM sync_queue";
pub const COUNT_QUEUE_ENTRIES: &str = "SELECT COUNT(*) FROM sync_queue WHERE tenant_id = ?";
pub const COUNT_FAILED_ENTRIES: &str =
    "SELECT COUNT(*) FROM sync_queue WHERE tenant_id = ? AND status = 'failed'";

// record tables; table names come from the closed `EntityType` set

pub const RECORD_COLUMNS: &str = "local_id, server_id, tenant_id, parent_local_id, \
     parent_server_id, data, updated_at, revision, is_deleted";

pub fn select_record_by_local_id(entity_type: EntityType, include_deleted: bool) -> String {
    let deleted_filter = if include_deleted { "" } else { " AND is_deleted = 0" };
    format!(
        "SELECT {RECORD_COLUMNS} FROM {} WHERE local_id = ?{deleted_filter}",
        entity_type.table_name()
    )
}

pub fn select_record_by_server_id(entity_type: EntityType) -> String {
    format!(
        "SELECT {RECORD_COLUMNS} FROM {} WHERE tenant_id = ? AND server_id = ?",
        entity_type.table_name()
    )
}

pub fn select_records(entity_type: EntityType) -> String {
    format!(
        "SELECT {RECORD_COLUMNS} FROM {} WHERE tenant_id = ",
        entity_type.table_name()
    )
}

pub fn insert_record(entity_type: EntityType) -> String {
    format!(
        "INSERT INTO {} ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        entity_type.table_name()
    )
}

/// Full row replace; `guarded` adds a compare-and-swap on the revision.
pub fn update_record(entity_type: EntityType, guarded: bool) -> String {
    let guard = if guarded { " AND revision = ?" } else { "" };
    format!(
        "UPDATE {} SET server_id = ?, tenant_id = ?, parent_local_id = ?, parent_server_id = ?, \
         data = ?, updated_at = ?, revision = ?, is_deleted = ? WHERE local_id = ?{guard}",
        entity_type.table_name()
    )
}

pub fn delete_record(entity_type: EntityType, guarded: bool) -> String {
    let guard = if guarded { " AND revision = ?" } else { "" };
    format!(
        "DELETE FROM {} WHERE local_id = ?{guard}",
        entity_type.table_name()
    )
}

pub fn stamp_server_id(entity_type: EntityType) -> String {
    format!(
        "UPDATE {} SET server_id = ?, revision = revision + 1 WHERE local_id = ?",
        entity_type.table_name()
    )
}

pub fn select_conflicting_server_id(entity_type: EntityType) -> String {
    format!(
        "SELECT local_id FROM {} WHERE tenant_id = ? AND server_id = ? AND local_id != ?",
        entity_type.table_name()
    )
}

pub fn link_children(child_type: EntityType) -> String {
    format!(
        "UPDATE {} SET parent_server_id = ?, revision = revision + 1 \
         WHERE parent_local_id = ? AND (parent_server_id IS NULL OR parent_server_id != ?)",
        child_type.table_name()
    )
}

pub fn relink_children(child_type: EntityType) -> String {
    format!(
        "UPDATE {} SET parent_local_id = ?, revision = revision + 1 WHERE parent_local_id = ?",
        child_type.table_name()
    )
}

pub fn restore_record(entity_type: EntityType) -> String {
    format!(
        "UPDATE {} SET is_deleted = 0, revision = revision + 1 \
         WHERE local_id = ? AND is_deleted = 1",
        entity_type.table_name()
    )
}

pub fn delete_all_records(entity_type: EntityType) -> String {
    format!("DELETE FROM {}", entity_type.table_name())
}
