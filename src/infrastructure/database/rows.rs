use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    pub local_id: String,
    pub server_id: Option<String>,
    pub tenant_id: String,
    pub parent_local_id: Option<String>,
    pub parent_server_id: Option<String>,
    pub data: String,
    pub updated_at: i64,
    pub revision: i64,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct QueueEntryRow {
    pub id: i64,
    pub tenant_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub payload: Option<String>,
    pub priority: i64,
    pub status: String,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}
