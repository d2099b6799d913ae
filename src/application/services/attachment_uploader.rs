use crate::application::ports::local_store::LocalStore;
use crate::application::ports::operation_queue::OperationQueue;
use crate::application::ports::remote_service::{RemoteError, RemoteService};
use crate::domain::entities::QueueEntry;
use crate::domain::value_objects::{EntityType, TenantId};
use crate::shared::error::AppError;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: u32,
    pub failed: u32,
    pub failures: Vec<String>,
}

enum Attempt {
    Uploaded,
    /// Nothing left to send: record gone, deleted or already uploaded.
    Nothing,
    Failed { message: String, retryable: bool },
}

/// Pushes binary payloads of photo and signature records.
///
/// Work comes from UPLOAD queue entries. One is handed out only after every
/// earlier operation of its record is acknowledged, so the remote already
/// knows the record the file belongs to. Failures go through the queue's
/// retry policy like any other entry.
#[derive(Clone)]
pub struct AttachmentUploader {
    store: Arc<dyn LocalStore>,
    queue: Arc<dyn OperationQueue>,
    remote: Arc<dyn RemoteService>,
    request_timeout: Duration,
    batch_size: u32,
}

impl AttachmentUploader {
    pub fn new(
        store: Arc<dyn LocalStore>,
        queue: Arc<dyn OperationQueue>,
        remote: Arc<dyn RemoteService>,
        request_timeout: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            request_timeout,
            batch_size: batch_size.max(1),
        }
    }

    /// Works through the due uploads of `entity_type`.
    pub async fn drain_pending_uploads(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
    ) -> Result<UploadReport, AppError> {
        let mut report = UploadReport::default();
        if !entity_type.is_attachment() {
            return Ok(report);
        }

        let batch = self
            .queue
            .peek_uploads(tenant_id, entity_type, self.batch_size, Utc::now())
            .await?;
        for entry in batch {
            let Some(entry) = self.queue.mark_in_flight(entry.id).await? else {
                continue;
            };
            match self.attempt(&entry).await? {
                Attempt::Uploaded => {
                    self.queue.mark_succeeded(entry.id).await?;
                    report.uploaded += 1;
                }
                Attempt::Nothing => {
                    self.queue.mark_succeeded(entry.id).await?;
                }
                Attempt::Failed { message, retryable } => {
                    let updated = self.queue.mark_failed(entry.id, &message, retryable).await?;
                    tracing::warn!(
                        target: "sync::attachments",
                        queue_id = %entry.id,
                        entity_type = %entity_type,
                        local_id = %entry.entity_id,
                        retry_count = updated.retry_count,
                        terminal = updated.is_terminal(),
                        error = %message,
                        "attachment upload failed"
                    );
                    report.failed += 1;
                    report.failures.push(format!(
                        "{} {entity_type} {}: {message}",
                        entry.operation, entry.entity_id
                    ));
                }
            }
        }

        Ok(report)
    }

    async fn attempt(&self, entry: &QueueEntry) -> Result<Attempt, AppError> {
        let entity_type = entry.entity_type;
        let Some(record) = self.store.get_any(entity_type, entry.entity_id).await? else {
            return Ok(Attempt::Nothing);
        };
        if record.deleted {
            return Ok(Attempt::Nothing);
        }
        let Some(pending) = record.data.pending_upload() else {
            return Ok(Attempt::Nothing);
        };
        let Some(server_id) = record.server_id.as_ref() else {
            // its CREATE was discarded
            return Ok(Attempt::Failed {
                message: "record does not exist remotely".to_string(),
                retryable: false,
            });
        };

        let payload = match tokio::fs::read(&pending.local_path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Attempt::Failed {
                    message: format!("attachment file {} is missing", pending.local_path),
                    retryable: false,
                });
            }
            Err(err) => {
                return Ok(Attempt::Failed {
                    message: format!("cannot read {}: {err}", pending.local_path),
                    retryable: true,
                });
            }
        };
        let size = payload.len();

        let uploaded = tokio::time::timeout(
            self.request_timeout,
            self.remote.upload_attachment(
                &record.tenant_id,
                entity_type,
                server_id,
                &pending.content_type,
                payload,
            ),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout));
        let url = match uploaded {
            Ok(url) => url,
            Err(err) => {
                return Ok(Attempt::Failed {
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                });
            }
        };

        let stamped = self
            .store
            .stamp_attachment(entity_type, record.local_id, &pending.local_path, &url)
            .await?;
        if stamped.is_none() {
            tracing::debug!(
                target: "sync::attachments",
                entity_type = %entity_type,
                local_id = %record.local_id,
                "file replaced during upload; keeping the newer one queued"
            );
        }
        tracing::info!(
            target: "sync::attachments",
            entity_type = %entity_type,
            local_id = %record.local_id,
            bytes = size,
            "attachment uploaded"
        );
        Ok(Attempt::Uploaded)
    }
}
