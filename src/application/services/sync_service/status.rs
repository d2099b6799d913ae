use crate::domain::entities::{SyncState, SyncStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;

type Callback = Arc<dyn Fn(&SyncState) + Send + Sync>;

struct StatusInner {
    tx: watch::Sender<SyncState>,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

/// Owner of the process-wide [`SyncState`].
///
/// Every change is published to `watch` receivers and to registered
/// callbacks. Only the orchestrator holds a handle that mutates it.
#[derive(Clone)]
pub struct SyncStatusHandle {
    inner: Arc<StatusInner>,
}

/// Keeps a callback registered; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    inner: Weak<StatusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Ok(mut callbacks) = inner.callbacks.lock() {
                callbacks.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl SyncStatusHandle {
    pub fn new(initial: SyncState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            inner: Arc::new(StatusInner {
                tx,
                callbacks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn current(&self) -> SyncState {
        self.inner.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.inner.tx.subscribe()
    }

    /// `callback` receives the state after every change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut callbacks) = self.inner.callbacks.lock() {
            callbacks.push((id, Arc::new(callback)));
        }
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .callbacks
            .lock()
            .map(|callbacks| callbacks.len())
            .unwrap_or(0)
    }

    /// Moves to `next` if the state machine allows it and applies `update`
    /// in the same publication. Returns `false` for an illegal transition.
    pub(crate) fn transition(&self, next: SyncStatus, update: impl FnOnce(&mut SyncState)) -> bool {
        let mut allowed = true;
        self.inner.tx.send_modify(|state| {
            if !state.status.can_transition_to(next) {
                allowed = false;
                return;
            }
            state.status = next;
            update(state);
        });
        if allowed {
            self.notify();
        } else {
            tracing::warn!(
                target: "sync::status",
                to = %next,
                "ignored illegal sync status transition"
            );
        }
        allowed
    }

    /// Updates fields other than the status.
    pub(crate) fn update(&self, update: impl FnOnce(&mut SyncState)) {
        let changed = self.inner.tx.send_if_modified(|state| {
            let before = state.clone();
            update(state);
            state.status = before.status;
            *state != before
        });
        if changed {
            self.notify();
        }
    }

    pub(crate) fn replace(&self, state: SyncState) {
        self.inner.tx.send_replace(state);
        self.notify();
    }

    fn notify(&self) {
        let snapshot = self.current();
        // callbacks run without the lock so they may subscribe or unsubscribe
        let callbacks: Vec<Callback> = match self.inner.callbacks.lock() {
            Ok(callbacks) => callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(&snapshot);
        }
    }
}
