use super::core::SyncOrchestrator;
use crate::application::ports::remote_service::{CreateRequest, RemoteError, UpdateRequest};
use crate::domain::entities::record::outbound_fields;
use crate::domain::entities::{Operation, QueueEntry, Record};
use crate::domain::value_objects::{EntityType, FieldPatch, LocalId, QueueEntryId};
use crate::shared::error::AppError;
use chrono::Utc;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub(super) struct PushReport {
    pub pushed: u32,
    pub failed: u32,
    pub deferred: u32,
    pub uploaded: u32,
    pub errors: Vec<String>,
}

enum EntryOutcome {
    Acknowledged,
    /// Parent not known remotely yet; retried later without a retry increment.
    Deferred,
    Failed(String),
    /// Deferred behind a parent that cannot sync without the user.
    Blocked(String),
    /// Claimed by nobody: the entry vanished or changed state meanwhile.
    Skipped,
}

impl SyncOrchestrator {
    /// Drains the queue chain by chain, then uploads ready attachments.
    ///
    /// Entries of one entity are sent strictly in creation order and the
    /// first failure or deferral stops that entity for the rest of the
    /// cycle. Other entities keep going. An UPLOAD entry ends its chain for
    /// the metadata rounds; the attachment uploader takes it afterwards.
    pub(super) async fn push(&self) -> Result<PushReport, AppError> {
        let mut report = PushReport::default();
        let mut attempted: HashSet<QueueEntryId> = HashSet::new();
        let mut blocked: HashSet<(EntityType, LocalId)> = HashSet::new();
        let mut skipped_last_round: u32 = 0;

        for round in 0..self.settings.max_push_rounds {
            let limit = self.settings.batch_size.saturating_add(skipped_last_round);
            let batch = self
                .queue
                .peek_batch(&self.tenant_id, limit, Utc::now())
                .await?;

            let mut skipped = 0u32;
            let mut chains: Vec<Vec<QueueEntry>> = Vec::new();
            let mut chain_index: HashMap<(EntityType, LocalId), usize> = HashMap::new();
            for entry in batch {
                let key = entry.entity_key();
                if attempted.contains(&entry.id) || blocked.contains(&key) {
                    skipped += 1;
                    continue;
                }
                let index = *chain_index.entry(key).or_insert_with(|| {
                    chains.push(Vec::new());
                    chains.len() - 1
                });
                chains[index].push(entry);
            }
            if chains.is_empty() {
                break;
            }
            tracing::debug!(
                target: "sync::push",
                round,
                chains = chains.len(),
                skipped,
                "push round"
            );

            for mut chain in chains {
                chain.sort_by_key(|entry| entry.id);
                for entry in chain {
                    let key = entry.entity_key();
                    if !entry.operation.is_metadata() {
                        blocked.insert(key);
                        break;
                    }
                    attempted.insert(entry.id);
                    match self.push_entry(entry).await? {
                        EntryOutcome::Acknowledged => report.pushed += 1,
                        EntryOutcome::Skipped => {}
                        EntryOutcome::Deferred => {
                            report.deferred += 1;
                            blocked.insert(key);
                            break;
                        }
                        EntryOutcome::Blocked(message) => {
                            report.deferred += 1;
                            report.errors.push(message);
                            blocked.insert(key);
                            break;
                        }
                        EntryOutcome::Failed(message) => {
                            report.failed += 1;
                            report.errors.push(message);
                            blocked.insert(key);
                            break;
                        }
                    }
                }
            }
            skipped_last_round = skipped;
        }

        for entity_type in [EntityType::Photo, EntityType::Signature] {
            let uploads = self
                .uploader
                .drain_pending_uploads(&self.tenant_id, entity_type)
                .await?;
            report.uploaded += uploads.uploaded;
            report.failed += uploads.failed;
            report.errors.extend(uploads.failures);
        }

        Ok(report)
    }

    async fn push_entry(&self, entry: QueueEntry) -> Result<EntryOutcome, AppError> {
        let Some(entry) = self.queue.mark_in_flight(entry.id).await? else {
            return Ok(EntryOutcome::Skipped);
        };
        let entity_type = entry.entity_type;

        let Some(record) = self.store.get_any(entity_type, entry.entity_id).await? else {
            if entry.operation != Operation::Delete {
                tracing::warn!(
                    target: "sync::push",
                    queue_id = %entry.id,
                    entity_type = %entity_type,
                    entity_id = %entry.entity_id,
                    operation = %entry.operation,
                    "record no longer exists; dropping operation"
                );
            }
            self.queue.mark_succeeded(entry.id).await?;
            return Ok(EntryOutcome::Acknowledged);
        };

        let sent = match (entry.operation, record.server_id.clone()) {
            (Operation::Upload, _) => {
                return Err(AppError::Internal(format!(
                    "queue entry {} is an upload and belongs to the attachment uploader",
                    entry.id
                )));
            }
            (Operation::Delete, None) => {
                // never reached the remote: nothing to delete there
                self.store.remove(entity_type, record.local_id, None).await?;
                Ok(())
            }
            (Operation::Delete, Some(server_id)) => {
                match self
                    .call(self.remote.delete(&self.tenant_id, entity_type, &server_id))
                    .await
                {
                    Ok(()) | Err(RemoteError::NotFound) => {
                        self.store.remove(entity_type, record.local_id, None).await?;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            (Operation::Create | Operation::Update, Some(server_id)) => {
                let request = UpdateRequest {
                    parent_server_id: record.parent_server_id.clone(),
                    fields: outbound_fields(&payload_of(&entry, &record)?).into_value(),
                };
                self.call(
                    self.remote
                        .update(&self.tenant_id, entity_type, &server_id, &request),
                )
                .await
                .map(|_| ())
            }
            (Operation::Create | Operation::Update, None) => {
                if record.parent_local_id.is_some() && record.parent_server_id.is_none() {
                    self.queue
                        .defer(entry.id, "parent not synced yet")
                        .await?;
                    if let Some(reason) = self.parent_blocker(&record).await? {
                        tracing::warn!(
                            target: "sync::push",
                            queue_id = %entry.id,
                            entity_type = %entity_type,
                            entity_id = %entry.entity_id,
                            reason = %reason,
                            "change is stuck behind its parent"
                        );
                        return Ok(EntryOutcome::Blocked(format!(
                            "{} {entity_type} {}: {reason}",
                            entry.operation, entry.entity_id
                        )));
                    }
                    tracing::debug!(
                        target: "sync::push",
                        queue_id = %entry.id,
                        entity_type = %entity_type,
                        entity_id = %entry.entity_id,
                        "deferred until parent has a server id"
                    );
                    return Ok(EntryOutcome::Deferred);
                }
                let fields = match entry.operation {
                    Operation::Create => payload_of(&entry, &record)?,
                    _ => snapshot(&record)?,
                };
                let request = CreateRequest {
                    client_id: record.local_id,
                    parent_server_id: record.parent_server_id.clone(),
                    fields: outbound_fields(&fields).into_value(),
                };
                match self
                    .call(self.remote.create(&self.tenant_id, entity_type, &request))
                    .await
                {
                    Ok(created) => {
                        self.store
                            .stamp_server_id(entity_type, record.local_id, &created.server_id)
                            .await?;
                        tracing::debug!(
                            target: "sync::push",
                            entity_type = %entity_type,
                            entity_id = %record.local_id,
                            server_id = %created.server_id,
                            "server id assigned"
                        );
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };

        match sent {
            Ok(()) => {
                self.queue.mark_succeeded(entry.id).await?;
                tracing::info!(
                    target: "sync::push",
                    queue_id = %entry.id,
                    entity_type = %entity_type,
                    entity_id = %entry.entity_id,
                    operation = %entry.operation,
                    "operation acknowledged"
                );
                Ok(EntryOutcome::Acknowledged)
            }
            Err(err) => {
                let updated = self
                    .queue
                    .mark_failed(entry.id, &err.to_string(), err.is_retryable())
                    .await?;
                tracing::warn!(
                    target: "sync::push",
                    queue_id = %entry.id,
                    entity_type = %entity_type,
                    entity_id = %entry.entity_id,
                    operation = %entry.operation,
                    retry_count = updated.retry_count,
                    terminal = updated.is_terminal(),
                    error = %err,
                    "operation failed"
                );
                Ok(EntryOutcome::Failed(format!(
                    "{} {entity_type} {}: {err}",
                    entry.operation, entry.entity_id
                )))
            }
        }
    }
}

impl SyncOrchestrator {
    /// Why the parent of `record` will not get a server id without the
    /// user stepping in, if that is the case.
    async fn parent_blocker(&self, record: &Record) -> Result<Option<String>, AppError> {
        let (Some(parent_type), Some(parent_id)) =
            (record.entity_type().parent_type(), record.parent_local_id)
        else {
            return Ok(None);
        };
        let entries = self.queue.entries_for(parent_type, parent_id).await?;
        if let Some(failed) = entries.iter().find(|entry| entry.is_terminal()) {
            return Ok(Some(format!(
                "parent {parent_type} {parent_id} has a failed {} (queue entry {})",
                failed.operation, failed.id
            )));
        }
        if entries.is_empty() {
            return Ok(Some(format!(
                "parent {parent_type} {parent_id} has no server id and nothing queued"
            )));
        }
        Ok(None)
    }
}

fn payload_of(entry: &QueueEntry, record: &Record) -> Result<FieldPatch, AppError> {
    match &entry.payload {
        Some(payload) => Ok(payload.clone()),
        None => snapshot(record),
    }
}

fn snapshot(record: &Record) -> Result<FieldPatch, AppError> {
    record
        .data
        .to_snapshot()
        .map_err(|e| AppError::SerializationError(e.to_string()))
}
