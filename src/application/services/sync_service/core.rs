use super::status::{Subscription, SyncStatusHandle};
use crate::application::ports::connectivity::ConnectivityObserver;
use crate::application::ports::local_store::LocalStore;
use crate::application::ports::operation_queue::OperationQueue;
use crate::application::ports::remote_service::{RemoteError, RemoteService};
use crate::application::ports::sync_checkpoint::SyncCheckpoint;
use crate::application::services::attachment_uploader::AttachmentUploader;
use crate::application::services::reconciler::Reconciler;
use crate::domain::entities::{Operation, QueueEntry, SyncState, SyncStatus};
use crate::domain::value_objects::{QueueEntryId, TenantId};
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};

/// Tunables of one sync cycle.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: u32,
    pub max_push_rounds: u32,
    pub request_timeout: Duration,
    pub lookback: chrono::Duration,
    pub lookahead: chrono::Duration,
    pub overlap: chrono::Duration,
    /// Every n-th pull asks for the full window.
    pub full_refresh_every: u32,
}

impl SyncSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.sync.batch_size.max(1),
            max_push_rounds: config.sync.max_push_rounds.max(1),
            request_timeout: config.sync.request_timeout(),
            lookback: chrono::Duration::days(i64::from(config.pull.lookback_days)),
            lookahead: chrono::Duration::days(i64::from(config.pull.lookahead_days)),
            overlap: chrono::Duration::seconds(
                i64::try_from(config.pull.overlap_secs).unwrap_or(i64::MAX / 1000),
            ),
            full_refresh_every: config.pull.full_refresh_every.max(1),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Ports the orchestrator drives.
#[derive(Clone)]
pub struct SyncComponents {
    pub store: Arc<dyn LocalStore>,
    pub queue: Arc<dyn OperationQueue>,
    pub remote: Arc<dyn RemoteService>,
    pub connectivity: Arc<dyn ConnectivityObserver>,
    pub checkpoint: Arc<dyn SyncCheckpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub pushed: u32,
    pub failed: u32,
    pub deferred: u32,
    pub uploaded: u32,
    pub pulled: u32,
    pub removed: u64,
    /// The pull asked for the whole window and dropped what was missing.
    pub authoritative_pull: bool,
    pub errors: Vec<String>,
    /// `Success` or `Error`; the state has already moved on to `Idle`.
    pub status: Option<SyncStatus>,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.status == Some(SyncStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle held the guard; nothing was done.
    AlreadyRunning,
    Skipped(SkipReason),
}

/// Single coordinator of push and pull for one tenant.
///
/// Timer, connectivity and caller triggers all end up in
/// [`SyncOrchestrator::request_sync`], whose guard lets at most one cycle run.
/// A running cycle is never aborted; it always ends back in `Idle`.
#[derive(Clone)]
pub struct SyncOrchestrator {
    pub(super) tenant_id: TenantId,
    pub(super) store: Arc<dyn LocalStore>,
    pub(super) queue: Arc<dyn OperationQueue>,
    pub(super) remote: Arc<dyn RemoteService>,
    pub(super) connectivity: Arc<dyn ConnectivityObserver>,
    pub(super) checkpoint: Arc<dyn SyncCheckpoint>,
    pub(super) reconciler: Reconciler,
    pub(super) uploader: AttachmentUploader,
    pub(super) settings: SyncSettings,
    pub(super) pull_cycles: Arc<AtomicU32>,
    status: SyncStatusHandle,
    cycle_gate: Arc<Mutex<()>>,
}

impl SyncOrchestrator {
    pub fn new(tenant_id: TenantId, components: SyncComponents, settings: SyncSettings) -> Self {
        let reconciler = Reconciler::new(
            Arc::clone(&components.store),
            Arc::clone(&components.queue),
            Arc::clone(&components.remote),
            settings.request_timeout,
        );
        let uploader = AttachmentUploader::new(
            Arc::clone(&components.store),
            Arc::clone(&components.queue),
            Arc::clone(&components.remote),
            settings.request_timeout,
            settings.batch_size,
        );
        Self {
            tenant_id,
            store: components.store,
            queue: components.queue,
            remote: components.remote,
            connectivity: components.connectivity,
            checkpoint: components.checkpoint,
            reconciler,
            uploader,
            settings,
            pull_cycles: Arc::new(AtomicU32::new(0)),
            status: SyncStatusHandle::new(SyncState::default()),
            cycle_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Startup: returns entries orphaned by a crash to pending and restores
    /// `last_sync_time` from the checkpoint.
    pub async fn recover(&self) -> Result<(), AppError> {
        let _guard = self.cycle_gate.lock().await;
        let recovered = self.queue.recover_in_flight().await?;
        if recovered > 0 {
            tracing::info!(
                target: "sync::scheduler",
                recovered,
                "returned interrupted queue entries to pending"
            );
        }
        let last_sync_time = self.checkpoint.load().await?;
        self.status.replace(SyncState::restored(last_sync_time));
        self.refresh_counts().await
    }

    pub fn current(&self) -> SyncState {
        self.status.current()
    }

    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.status.watch()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.status.subscribe(callback)
    }

    pub fn is_syncing(&self) -> bool {
        self.cycle_gate.try_lock().is_err()
    }

    /// Runs one push-then-pull cycle unless one is already running.
    pub async fn request_sync(&self) -> CycleOutcome {
        let Ok(_guard) = self.cycle_gate.try_lock() else {
            tracing::debug!(target: "sync::scheduler", "sync already running; request ignored");
            return CycleOutcome::AlreadyRunning;
        };
        if !self.connectivity.is_online() {
            tracing::debug!(target: "sync::scheduler", "offline; sync skipped");
            return CycleOutcome::Skipped(SkipReason::Offline);
        }

        self.status.transition(SyncStatus::Syncing, |_| {});
        let started_at = Utc::now();
        tracing::info!(target: "sync::scheduler", tenant = %self.tenant_id, "sync cycle started");

        let mut report = CycleReport::default();
        let fatal = self.run_phases(&mut report).await.err();

        let final_status = if let Some(err) = &fatal {
            tracing::error!(target: "sync::scheduler", error = %err, "sync cycle aborted");
            if let Err(recover_err) = self.queue.recover_in_flight().await {
                tracing::warn!(
                    target: "sync::scheduler",
                    error = %recover_err,
                    "could not release in-flight entries"
                );
            }
            report.errors.push(err.to_string());
            SyncStatus::Error
        } else if report.errors.is_empty() {
            match self.checkpoint.save(started_at).await {
                Ok(()) => SyncStatus::Success,
                Err(err) => {
                    tracing::warn!(
                        target: "sync::scheduler",
                        error = %err,
                        "failed to persist sync checkpoint"
                    );
                    report.errors.push(err.to_string());
                    SyncStatus::Error
                }
            }
        } else {
            SyncStatus::Error
        };

        if let Err(err) = self.refresh_counts().await {
            tracing::warn!(target: "sync::scheduler", error = %err, "failed to refresh queue counts");
        }

        let last_error = summarize(&report.errors);
        self.status.transition(final_status, |state| {
            if final_status == SyncStatus::Success {
                state.last_sync_time = Some(started_at);
                state.last_error = None;
            } else {
                state.last_error = last_error.clone();
            }
        });
        self.status.transition(SyncStatus::Idle, |_| {});
        report.status = Some(final_status);

        tracing::info!(
            target: "sync::scheduler",
            status = %final_status,
            pushed = report.pushed,
            failed = report.failed,
            deferred = report.deferred,
            uploaded = report.uploaded,
            pulled = report.pulled,
            removed = report.removed,
            authoritative_pull = report.authoritative_pull,
            "sync cycle finished"
        );
        CycleOutcome::Completed(report)
    }

    async fn run_phases(&self, report: &mut CycleReport) -> Result<(), AppError> {
        let push = self.push().await?;
        report.pushed = push.pushed;
        report.failed = push.failed;
        report.deferred = push.deferred;
        report.uploaded = push.uploaded;
        report.errors.extend(push.errors);

        let pull = self.pull().await?;
        report.pulled = pull.pulled;
        report.removed = pull.removed;
        report.authoritative_pull = pull.authoritative;
        report.errors.extend(pull.errors);
        Ok(())
    }

    /// Clears every record, queue entry and the checkpoint. Waits for a
    /// running cycle to finish first.
    pub async fn reset_local_data(&self) -> Result<(), AppError> {
        let _guard = self.cycle_gate.lock().await;
        self.queue.clear().await?;
        self.store.clear().await?;
        self.checkpoint.clear().await?;
        self.pull_cycles.store(0, Ordering::Relaxed);
        self.status.replace(SyncState::default());
        tracing::info!(target: "sync::scheduler", tenant = %self.tenant_id, "local data reset");
        Ok(())
    }

    /// Re-reads pending and failed counts into the sync state.
    pub async fn refresh_counts(&self) -> Result<(), AppError> {
        let pending = self.queue.count(&self.tenant_id).await?;
        let failed = self.queue.count_failed(&self.tenant_id).await?;
        self.status.update(|state| {
            state.pending_changes_count = pending;
            state.failed_changes_count = failed;
        });
        Ok(())
    }

    pub async fn failed_changes(&self) -> Result<Vec<QueueEntry>, AppError> {
        self.queue.list_failed(&self.tenant_id).await
    }

    /// Gives a terminally failed entry a fresh retry budget.
    pub async fn retry_failed(&self, id: QueueEntryId) -> Result<QueueEntry, AppError> {
        self.owned_failed_entry(id).await?;
        let entry = self
            .queue
            .retry(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("queue entry {id}")))?;
        tracing::info!(
            target: "sync::push",
            queue_id = %id,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            "failed change re-queued"
        );
        self.refresh_counts().await?;
        Ok(entry)
    }

    /// Drops a terminally failed entry. Discarding a DELETE makes the
    /// record visible again.
    pub async fn discard_failed(&self, id: QueueEntryId) -> Result<QueueEntry, AppError> {
        self.owned_failed_entry(id).await?;
        let entry = self
            .queue
            .discard(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("queue entry {id}")))?;
        if entry.operation == Operation::Delete {
            self.store
                .restore_deleted(entry.entity_type, entry.entity_id)
                .await?;
        }
        tracing::info!(
            target: "sync::push",
            queue_id = %id,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            operation = %entry.operation.as_str(),
            "failed change discarded"
        );
        self.refresh_counts().await?;
        Ok(entry)
    }

    async fn owned_failed_entry(&self, id: QueueEntryId) -> Result<QueueEntry, AppError> {
        let entry = self
            .queue
            .get(id)
            .await?
            .filter(|entry| entry.tenant_id == self.tenant_id)
            .ok_or_else(|| AppError::NotFound(format!("queue entry {id}")))?;
        if !entry.is_terminal() {
            return Err(AppError::InvalidInput(format!(
                "queue entry {id} has not failed"
            )));
        }
        Ok(entry)
    }

    /// Bounds a remote call by the request timeout.
    pub(super) async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        tokio::time::timeout(self.settings.request_timeout, request)
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }
}

fn summarize(errors: &[String]) -> Option<String> {
    match errors {
        [] => None,
        [only] => Some(only.clone()),
        [first, rest @ ..] => Some(format!("{first} (+{} more)", rest.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_keeps_first_error() {
        assert_eq!(summarize(&[]), None);
        assert_eq!(summarize(&["a".to_string()]), Some("a".to_string()));
        assert_eq!(
            summarize(&["a".to_string(), "b".to_string(), "c".to_string()]),
            Some("a (+2 more)".to_string())
        );
    }

    #[test]
    fn settings_follow_config() {
        let mut config = AppConfig::default();
        config.sync.batch_size = 0;
        config.pull.lookback_days = 7;
        config.pull.full_refresh_every = 3;
        let settings = SyncSettings::from_config(&config);
        assert_eq!(settings.batch_size, 1);
        assert_eq!(settings.lookback, chrono::Duration::days(7));
        assert_eq!(settings.full_refresh_every, 3);
    }
}
