use crate::application::ports::local_store::{LocalStore, RecordQuery};
use crate::application::ports::operation_queue::OperationQueue;
use crate::application::ports::remote_service::{RemoteError, RemoteRecord, RemoteService};
use crate::domain::entities::record::truncate_to_millis;
use crate::domain::entities::{DirtyFields, Operation, QueueEntry, Record, RecordData};
use crate::domain::value_objects::{EntityType, LocalId, ServerId, TenantId};
use crate::shared::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Optimistic write attempts before a record is left for the next pull.
const MAX_WRITE_ATTEMPTS: usize = 5;
/// Ancestors fetched on demand for one pulled record (line item → job → customer).
const MAX_PARENT_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Created(Record),
    Updated(Record),
    /// Local copy already matches; nothing was written.
    Unchanged,
    Removed(Record),
    /// Local operations for this record are still queued; they finish first.
    KeptPending,
    ForeignTenant,
}

impl ReconcileOutcome {
    pub fn record(&self) -> Option<&Record> {
        match self {
            ReconcileOutcome::Created(record)
            | ReconcileOutcome::Updated(record)
            | ReconcileOutcome::Removed(record) => Some(record),
            _ => None,
        }
    }

    pub fn changed_store(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Created(_)
                | ReconcileOutcome::Updated(_)
                | ReconcileOutcome::Removed(_)
        )
    }
}

/// Field names covered by queued CREATE/UPDATE payloads.
pub fn dirty_fields(entries: &[QueueEntry]) -> DirtyFields {
    let mut dirty = DirtyFields::new();
    for entry in entries {
        if entry.operation == Operation::Delete {
            continue;
        }
        if let Some(payload) = &entry.payload {
            dirty.insert_patch(payload);
        }
    }
    dirty
}

/// Merges remote records into the local store.
///
/// Remote wins for every field that no queued local operation covers. Each
/// write is a compare-and-swap on the row revision, so a UI write that lands
/// between the read and the write is never overwritten.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn LocalStore>,
    queue: Arc<dyn OperationQueue>,
    remote: Arc<dyn RemoteService>,
    request_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LocalStore>,
        queue: Arc<dyn OperationQueue>,
        remote: Arc<dyn RemoteService>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            request_timeout,
        }
    }

    /// Reconciles one remote record, fetching unknown ancestors first.
    pub async fn apply(
        &self,
        tenant_id: &TenantId,
        remote: RemoteRecord,
    ) -> Result<ReconcileOutcome, AppError> {
        if &remote.tenant_id != tenant_id {
            tracing::warn!(
                target: "sync::reconcile",
                entity_type = %remote.entity_type,
                server_id = %remote.server_id,
                "ignoring record from another tenant"
            );
            return Ok(ReconcileOutcome::ForeignTenant);
        }

        if !remote.deleted {
            for parent in self.missing_ancestors(tenant_id, &remote).await? {
                self.apply_one(tenant_id, &parent).await?;
            }
        }
        self.apply_one(tenant_id, &remote).await
    }

    /// Removes synced records that an authoritative listing no longer contains.
    /// Records that still have local children are kept; callers remove
    /// dependents first.
    pub async fn remove_absent(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        seen: &HashSet<ServerId>,
    ) -> Result<u64, AppError> {
        let query = RecordQuery::for_tenant(tenant_id.clone())
            .synced_only()
            .including_deleted();
        let mut removed = 0;
        for record in self.store.query(entity_type, &query).await? {
            let Some(server_id) = &record.server_id else {
                continue;
            };
            if seen.contains(server_id) {
                continue;
            }
            if !self
                .queue
                .entries_for(entity_type, record.local_id)
                .await?
                .is_empty()
            {
                continue;
            }
            if self.has_children(tenant_id, entity_type, record.local_id).await? {
                continue;
            }
            if self
                .store
                .remove(entity_type, record.local_id, Some(record.revision))
                .await?
            {
                removed += 1;
                tracing::debug!(
                    target: "sync::reconcile",
                    entity_type = %entity_type,
                    local_id = %record.local_id,
                    server_id = %server_id,
                    "removed record missing from authoritative pull"
                );
            }
        }
        Ok(removed)
    }

    async fn has_children(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        local_id: LocalId,
    ) -> Result<bool, AppError> {
        let query = RecordQuery::for_tenant(tenant_id.clone())
            .children_of(local_id)
            .including_deleted()
            .limit(1);
        for child_type in EntityType::ALL {
            if child_type.parent_type() != Some(entity_type) {
                continue;
            }
            if !self.store.query(child_type, &query).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Ancestors referenced by `remote` that are not stored locally, root first.
    async fn missing_ancestors(
        &self,
        tenant_id: &TenantId,
        remote: &RemoteRecord,
    ) -> Result<Vec<RemoteRecord>, AppError> {
        let mut missing = Vec::new();
        let mut next = remote
            .entity_type
            .parent_type()
            .zip(remote.parent_server_id.clone());

        while let Some((parent_type, parent_sid)) = next.take() {
            if missing.len() >= MAX_PARENT_DEPTH {
                break;
            }
            if self
                .store
                .find_by_server_id(tenant_id, parent_type, &parent_sid)
                .await?
                .is_some()
            {
                break;
            }
            let fetched = tokio::time::timeout(
                self.request_timeout,
                self.remote.get(tenant_id, parent_type, &parent_sid),
            )
            .await
            .unwrap_or(Err(RemoteError::Timeout));
            match fetched {
                Ok(parent) if !parent.deleted && &parent.tenant_id == tenant_id => {
                    next = parent_type.parent_type().zip(parent.parent_server_id.clone());
                    missing.push(parent);
                }
                Ok(_) => break,
                Err(err) => {
                    tracing::warn!(
                        target: "sync::reconcile",
                        entity_type = %parent_type,
                        server_id = %parent_sid,
                        error = %err,
                        "could not fetch missing parent; storing child unlinked"
                    );
                    break;
                }
            }
        }

        missing.reverse();
        Ok(missing)
    }

    async fn find_local(
        &self,
        tenant_id: &TenantId,
        remote: &RemoteRecord,
    ) -> Result<Option<Record>, AppError> {
        let entity_type = remote.entity_type;
        if let Some(record) = self
            .store
            .find_by_server_id(tenant_id, entity_type, &remote.server_id)
            .await?
        {
            return Ok(Some(record));
        }
        // not round-tripped yet: the remote echoes our local id back
        if let Some(client_id) = remote.client_id {
            if let Some(record) = self.store.get_any(entity_type, client_id).await? {
                let same_identity = record
                    .server_id
                    .as_ref()
                    .is_none_or(|sid| sid == &remote.server_id);
                if &record.tenant_id == tenant_id && same_identity {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    async fn parent_local_id(
        &self,
        tenant_id: &TenantId,
        remote: &RemoteRecord,
    ) -> Result<Option<LocalId>, AppError> {
        let (Some(parent_type), Some(parent_sid)) =
            (remote.entity_type.parent_type(), remote.parent_server_id.as_ref())
        else {
            return Ok(None);
        };
        Ok(self
            .store
            .find_by_server_id(tenant_id, parent_type, parent_sid)
            .await?
            .map(|parent| parent.local_id))
    }

    async fn apply_one(
        &self,
        tenant_id: &TenantId,
        remote: &RemoteRecord,
    ) -> Result<ReconcileOutcome, AppError> {
        let entity_type = remote.entity_type;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let local = self.find_local(tenant_id, remote).await?;

            if remote.deleted {
                let Some(local) = local else {
                    return Ok(ReconcileOutcome::Unchanged);
                };
                let entries = self.queue.entries_for(entity_type, local.local_id).await?;
                if !entries.is_empty() {
                    tracing::debug!(
                        target: "sync::reconcile",
                        entity_type = %entity_type,
                        local_id = %local.local_id,
                        pending = entries.len(),
                        "tombstone deferred until local operations finish"
                    );
                    return Ok(ReconcileOutcome::KeptPending);
                }
                if self
                    .store
                    .remove(entity_type, local.local_id, Some(local.revision))
                    .await?
                {
                    tracing::info!(
                        target: "sync::reconcile",
                        entity_type = %entity_type,
                        local_id = %local.local_id,
                        server_id = %remote.server_id,
                        "removed record deleted remotely"
                    );
                    return Ok(ReconcileOutcome::Removed(local));
                }
                continue;
            }

            let remote_data =
                RecordData::from_fields(entity_type, remote.fields.clone()).map_err(|e| {
                    AppError::DeserializationError(format!(
                        "{entity_type} {} from remote: {e}",
                        remote.server_id
                    ))
                })?;
            let parent_local_id = self.parent_local_id(tenant_id, remote).await?;
            let remote_updated_at = truncate_to_millis(remote.updated_at);

            let Some(local) = local else {
                let record = Record {
                    local_id: LocalId::generate(),
                    server_id: Some(remote.server_id.clone()),
                    tenant_id: tenant_id.clone(),
                    parent_local_id,
                    parent_server_id: remote.parent_server_id.clone(),
                    data: remote_data,
                    updated_at: remote_updated_at,
                    revision: 1,
                    deleted: false,
                };
                if let Some(created) = self.store.upsert_from_remote(&record, None).await? {
                    return Ok(ReconcileOutcome::Created(created));
                }
                continue;
            };

            let entries = self.queue.entries_for(entity_type, local.local_id).await?;
            if entries.iter().any(|e| e.operation == Operation::Delete) {
                return Ok(ReconcileOutcome::KeptPending);
            }
            let dirty = dirty_fields(&entries);

            let mut merged = local.clone();
            merged
                .data
                .merge_remote(remote_data, &dirty)
                .map_err(AppError::Internal)?;
            merged.server_id = Some(remote.server_id.clone());
            if remote.parent_server_id.is_some() {
                if parent_local_id.is_some() || local.parent_server_id != remote.parent_server_id {
                    merged.parent_local_id = parent_local_id;
                }
                merged.parent_server_id = remote.parent_server_id.clone();
            }
            merged.updated_at = if dirty.is_empty() {
                remote_updated_at
            } else {
                local.updated_at.max(remote_updated_at)
            };

            if merged.same_content(&local) {
                return Ok(ReconcileOutcome::Unchanged);
            }
            match self
                .store
                .upsert_from_remote(&merged, Some(local.revision))
                .await?
            {
                Some(updated) => {
                    if !dirty.is_empty() {
                        tracing::debug!(
                            target: "sync::reconcile",
                            entity_type = %entity_type,
                            local_id = %local.local_id,
                            kept_fields = dirty.len(),
                            "merged remote record around pending local fields"
                        );
                    }
                    return Ok(ReconcileOutcome::Updated(updated));
                }
                None => {
                    tracing::debug!(
                        target: "sync::reconcile",
                        entity_type = %entity_type,
                        local_id = %local.local_id,
                        "local write won the race; re-reading"
                    );
                }
            }
        }

        Err(AppError::Internal(format!(
            "{entity_type} {} kept changing locally during reconcile",
            remote.server_id
        )))
    }
}
