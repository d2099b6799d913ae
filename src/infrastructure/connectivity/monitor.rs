use crate::application::ports::connectivity::ConnectivityObserver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Online/offline flag fed either by the host platform (`set_online`) or by
/// a reachability probe against the remote service.
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    /// Publishes only real transitions.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            if online {
                tracing::info!(target: "sync::scheduler", "connectivity regained");
            } else {
                tracing::warn!(target: "sync::scheduler", "connectivity lost");
            }
        }
    }

    /// Probes `url` every `every`. Any HTTP response counts as online; a
    /// transport error counts as offline.
    pub fn spawn_probe(
        self: &Arc<Self>,
        client: reqwest::Client,
        url: String,
        every: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = client.head(&url).send().await.is_ok();
                monitor.set_online(reachable);
            }
        })
    }
}

impl ConnectivityObserver for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
