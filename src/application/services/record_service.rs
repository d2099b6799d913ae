use crate::application::ports::local_store::{LocalStore, RecordQuery};
use crate::application::services::sync_service::SyncOrchestrator;
use crate::domain::entities::{LocalMutation, Record, RecordData};
use crate::domain::value_objects::{EntityType, FieldPatch, LocalId, TenantId};
use crate::shared::error::AppError;
use std::sync::Arc;

/// UI-facing entry point for record reads and writes.
///
/// Writes go straight to the local store (never waiting on a sync) and then
/// refresh the pending counter observers see.
#[derive(Clone)]
pub struct RecordService {
    tenant_id: TenantId,
    store: Arc<dyn LocalStore>,
    orchestrator: SyncOrchestrator,
}

impl RecordService {
    pub fn new(store: Arc<dyn LocalStore>, orchestrator: SyncOrchestrator) -> Self {
        Self {
            tenant_id: orchestrator.tenant_id().clone(),
            store,
            orchestrator,
        }
    }

    pub async fn create(
        &self,
        data: RecordData,
        parent_local_id: Option<LocalId>,
    ) -> Result<Record, AppError> {
        let entity_type = data.entity_type();
        let record = self
            .store
            .write_local(
                &self.tenant_id,
                entity_type,
                LocalMutation::Create {
                    data,
                    parent_local_id,
                },
            )
            .await?;
        tracing::debug!(
            target: "store",
            entity_type = %entity_type,
            local_id = %record.local_id,
            "record created locally"
        );
        self.after_write().await;
        Ok(record)
    }

    pub async fn update(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
        patch: FieldPatch,
    ) -> Result<Record, AppError> {
        let record = self
            .store
            .write_local(
                &self.tenant_id,
                entity_type,
                LocalMutation::Update { local_id, patch },
            )
            .await?;
        self.after_write().await;
        Ok(record)
    }

    pub async fn delete(&self, entity_type: EntityType, local_id: LocalId) -> Result<(), AppError> {
        self.store
            .write_local(
                &self.tenant_id,
                entity_type,
                LocalMutation::Delete { local_id },
            )
            .await?;
        self.after_write().await;
        Ok(())
    }

    pub async fn get(
        &self,
        entity_type: EntityType,
        local_id: LocalId,
    ) -> Result<Option<Record>, AppError> {
        Ok(self
            .store
            .get(entity_type, local_id)
            .await?
            .filter(|record| record.tenant_id == self.tenant_id))
    }

    pub async fn list(&self, entity_type: EntityType) -> Result<Vec<Record>, AppError> {
        self.store
            .query(entity_type, &RecordQuery::for_tenant(self.tenant_id.clone()))
            .await
    }

    pub async fn children(
        &self,
        entity_type: EntityType,
        parent_local_id: LocalId,
    ) -> Result<Vec<Record>, AppError> {
        let query = RecordQuery::for_tenant(self.tenant_id.clone()).children_of(parent_local_id);
        self.store.query(entity_type, &query).await
    }

    async fn after_write(&self) {
        if let Err(err) = self.orchestrator.refresh_counts().await {
            tracing::warn!(target: "store", error = %err, "failed to refresh pending count");
        }
    }
}
