use super::core::{CycleOutcome, SyncOrchestrator};
use crate::application::ports::connectivity::ConnectivityObserver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Background trigger source: a fixed interval plus "became online" edges.
///
/// Stopping only prevents the next cycle; a running one finishes first.
pub struct SyncScheduler {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn start(
        orchestrator: SyncOrchestrator,
        connectivity: Arc<dyn ConnectivityObserver>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut online_rx = connectivity.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut was_online = *online_rx.borrow_and_update();
            let mut watching = true;

            tracing::info!(
                target: "sync::scheduler",
                interval_secs = interval.as_secs(),
                "sync scheduler started"
            );

            loop {
                let trigger = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => "timer",
                    changed = online_rx.changed(), if watching => {
                        if changed.is_err() {
                            watching = false;
                            continue;
                        }
                        let online = *online_rx.borrow_and_update();
                        let regained = online && !was_online;
                        was_online = online;
                        if !regained {
                            continue;
                        }
                        "connectivity"
                    }
                };

                match orchestrator.request_sync().await {
                    CycleOutcome::Completed(report) => {
                        tracing::debug!(
                            target: "sync::scheduler",
                            trigger,
                            succeeded = report.succeeded(),
                            "triggered sync completed"
                        );
                    }
                    outcome => {
                        tracing::debug!(
                            target: "sync::scheduler",
                            trigger,
                            outcome = ?outcome,
                            "triggered sync did not run"
                        );
                    }
                }
            }

            tracing::info!(target: "sync::scheduler", "sync scheduler stopped");
        });

        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Waits for a running cycle, then ends the loop.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(target: "sync::scheduler", error = %err, "scheduler task ended abnormally");
            }
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
