use super::core::SyncOrchestrator;
use crate::application::ports::remote_service::{PullQuery, RemoteError, RemoteRecord};
use crate::application::services::reconciler::ReconcileOutcome;
use crate::domain::value_objects::{EntityType, ServerId};
use crate::shared::error::AppError;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;

/// Pages followed for one entity type before the listing counts as broken.
const MAX_PAGES: usize = 200;

#[derive(Debug, Default)]
pub(super) struct PullReport {
    pub pulled: u32,
    pub removed: u64,
    pub authoritative: bool,
    pub errors: Vec<String>,
}

impl SyncOrchestrator {
    /// Fetches the sliding window from the remote and reconciles it.
    ///
    /// Delta pulls start `overlap` before the last successful sync. The first
    /// pull of a process, and every `full_refresh_every`-th one, asks for the
    /// whole window and removes synced records missing from the answer.
    pub(super) async fn pull(&self) -> Result<PullReport, AppError> {
        let now = Utc::now();
        let last_sync = self.current().last_sync_time;
        let cycle = self.pull_cycles.fetch_add(1, Ordering::Relaxed);
        let authoritative =
            last_sync.is_none() || cycle % self.settings.full_refresh_every.max(1) == 0;

        let query = PullQuery {
            modified_since: if authoritative {
                None
            } else {
                last_sync.map(|at| at - self.settings.overlap)
            },
            window_start: now - self.settings.lookback,
            window_end: now + self.settings.lookahead,
        };
        let mut report = PullReport {
            authoritative,
            ..PullReport::default()
        };
        tracing::debug!(
            target: "sync::pull",
            authoritative,
            modified_since = ?query.modified_since,
            window_start = %query.window_start,
            window_end = %query.window_end,
            "pull started"
        );

        let mut listed: HashMap<EntityType, HashSet<ServerId>> = HashMap::new();
        for entity_type in EntityType::ALL {
            let records = match self.list_window(entity_type, &query).await {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!(
                        target: "sync::pull",
                        entity_type = %entity_type,
                        error = %err,
                        "listing failed"
                    );
                    report.errors.push(format!("pull {entity_type}: {err}"));
                    continue;
                }
            };

            let mut seen = HashSet::with_capacity(records.len());
            for remote in records {
                let server_id = remote.server_id.clone();
                seen.insert(server_id.clone());
                match self.reconciler.apply(&self.tenant_id, remote).await {
                    Ok(ReconcileOutcome::Removed(_)) => report.removed += 1,
                    Ok(outcome) if outcome.changed_store() => report.pulled += 1,
                    Ok(_) => {}
                    Err(err) if err.is_local_storage_failure() => return Err(err),
                    Err(err) => {
                        tracing::warn!(
                            target: "sync::pull",
                            entity_type = %entity_type,
                            server_id = %server_id,
                            error = %err,
                            "could not reconcile remote record"
                        );
                        report
                            .errors
                            .push(format!("reconcile {entity_type} {server_id}: {err}"));
                    }
                }
            }
            listed.insert(entity_type, seen);
        }

        if authoritative {
            // dependents first so their parents are no longer referenced
            for entity_type in EntityType::ALL.iter().rev() {
                if let Some(seen) = listed.get(entity_type) {
                    report.removed += self
                        .reconciler
                        .remove_absent(&self.tenant_id, *entity_type, seen)
                        .await?;
                }
            }
        }

        tracing::info!(
            target: "sync::pull",
            authoritative,
            pulled = report.pulled,
            removed = report.removed,
            errors = report.errors.len(),
            "pull finished"
        );
        Ok(report)
    }

    /// Follows the listing cursor; each page gets its own request timeout.
    async fn list_window(
        &self,
        entity_type: EntityType,
        query: &PullQuery,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page = self
                .call(self.remote.list_page(
                    &self.tenant_id,
                    entity_type,
                    query,
                    cursor.as_deref(),
                ))
                .await?;
            records.extend(page.records);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(records),
            }
        }
        Err(RemoteError::Decode(format!(
            "{entity_type} listing did not end after {MAX_PAGES} pages"
        )))
    }
}
