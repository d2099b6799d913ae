use crate::domain::entities::{LocalMutation, Record};
use crate::domain::value_objects::{EntityType, LocalId, ServerId, TenantId};
use crate::shared::error::AppError;
use async_trait::async_trait;

/// Row filter for [`LocalStore::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub tenant_id: TenantId,
    pub parent_local_id: Option<LocalId>,
    /// `Some(true)`: only records the remote knows. `Some(false)`: only
    /// records created offline and not pushed yet.
    pub has_server_id: Option<bool>,
    pub include_deleted: bool,
    pub limit: Option<u32>,
}

impl RecordQuery {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            parent_local_id: None,
            has_server_id: None,
            include_deleted: false,
            limit: None,
        }
    }

    pub fn children_of(mut self, parent_local_id: LocalId) -> Self {
        self.parent_local_id = Some(parent_local_id);
        self
    }

    pub fn synced_only(mut self) -> Self {
        self.has_server_id = Some(true);
        self
    }

    pub fn unsynced_only(mut self) -> Self {
        self.has_server_id = Some(false);
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// On-device working copy of every record.
///
/// Reads never wait for a running sync. Writes are serialized with the
/// operation queue so that a record change and its queue entry commit together.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Visible record (soft-deleted rows are hidden).
    async fn get(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
    ) -> Result<Option<Record>, AppError>;

    /// Like [`LocalStore::get`] but also returns rows hidden by a pending DELETE.
    async fn get_any(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
    ) -> Result<Option<Record>, AppError>;

    async fn find_by_server_id(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
    ) -> Result<Option<Record>, AppError>;

    async fn query(
        &self,
        entity_type: EntityType,
        query: &RecordQuery,
    ) -> Result<Vec<Record>, AppError>;

    /// Applies a UI mutation and enqueues its operation in one transaction.
    async fn write_local(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        mutation: LocalMutation,
    ) -> Result<Record, AppError>;

    /// Inserts or replaces a record coming from the remote service. With
    /// `expected_revision`, the write only happens if the row is still at that
    /// revision; `Ok(None)` means a concurrent write won.
    async fn upsert_from_remote(
        &self,
        record: &Record,
        expected_revision: Option<i64>,
    ) -> Result<Option<Record>, AppError>;

    /// Physically removes a row. Returns `false` when it was not there or the
    /// revision did not match.
    async fn remove(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
        expected_revision: Option<i64>,
    ) -> Result<bool, AppError>;

    /// Records the server id assigned by a CREATE and propagates it to the
    /// `parent_server_id` of every dependent row.
    async fn stamp_server_id(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
        server_id: &ServerId,
    ) -> Result<(), AppError>;

    /// Stores the URL of an uploaded attachment and marks it uploaded, as
    /// long as the record still points at `uploaded_path`. `None` when the
    /// record is gone or its file was replaced in the meantime.
    async fn stamp_attachment(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
        uploaded_path: &str,
        remote_url: &str,
    ) -> Result<Option<Record>, AppError>;

    /// Makes a soft-deleted row visible again (its DELETE was discarded).
    async fn restore_deleted(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
    ) -> Result<(), AppError>;

    /// Drops every record of every tenant.
    async fn clear(&self) -> Result<(), AppError>;
}
