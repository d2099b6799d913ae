use crate::domain::value_objects::{EntityType, LocalId, ServerId, TenantId};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server error (status {status})")]
    Server { status: u16 },
    #[error("rejected by remote (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("remote resource not found")]
    NotFound,
    #[error("not authorized")]
    Unauthorized,
    #[error("malformed remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Transient failures stay queued and are retried with backoff.
    /// Everything else is a terminal rejection that needs the user.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_)
                | RemoteError::Timeout
                | RemoteError::Server { .. }
                | RemoteError::Unauthorized
        )
    }
}

/// A record as the remote service reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub server_id: ServerId,
    pub entity_type: EntityType,
    pub tenant_id: TenantId,
    /// Local id sent with the CREATE that produced this record, if any.
    #[serde(default)]
    pub client_id: Option<LocalId>,
    #[serde(default)]
    pub parent_server_id: Option<ServerId>,
    pub fields: Value,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

/// Pull filter. `modified_since = None` asks for the whole window, and the
/// answer is then authoritative: anything missing from it is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullQuery {
    pub modified_since: Option<DateTime<Utc>>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl PullQuery {
    pub fn is_full_window(&self) -> bool {
        self.modified_since.is_none()
    }
}

/// One page of a listing. `next_cursor = None` ends it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemotePage {
    pub records: Vec<RemoteRecord>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateRequest {
    pub client_id: LocalId,
    pub parent_server_id: Option<ServerId>,
    pub fields: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateRequest {
    pub parent_server_id: Option<ServerId>,
    pub fields: Value,
}

/// Resource API of the multi-tenant backend, one resource per entity type.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Fetches one page of records matching `query`, starting at `cursor`.
    async fn list_page(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        query: &PullQuery,
        cursor: Option<&str>,
    ) -> Result<RemotePage, RemoteError>;

    async fn get(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
    ) -> Result<RemoteRecord, RemoteError>;

    async fn create(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        request: &CreateRequest,
    ) -> Result<RemoteRecord, RemoteError>;

    async fn update(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
        request: &UpdateRequest,
    ) -> Result<RemoteRecord, RemoteError>;

    async fn delete(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
    ) -> Result<(), RemoteError>;

    /// Uploads the binary payload of an attachment record; returns its URL.
    async fn upload_attachment(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
        content_type: &str,
        payload: Bytes,
    ) -> Result<String, RemoteError>;
}
