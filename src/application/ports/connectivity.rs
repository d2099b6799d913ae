use tokio::sync::watch;

/// Reports whether the remote service is reachable.
pub trait ConnectivityObserver: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receives every online/offline transition.
    fn subscribe(&self) -> watch::Receiver<bool>;
}
