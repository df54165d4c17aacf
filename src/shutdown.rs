//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is shared across the uploader and the ingestion
//! engine so Ctrl+C stops work at batch granularity: checkpoint and queue
//! state are only mutated after a unit fully commits, so an interrupted run
//! never loses committed progress or marks partial work complete.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared handle to a shutdown signal.
pub type SharedShutdown = Arc<ShutdownSignal>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register a global shutdown handle so subsystems can discover it lazily.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// Retrieve the registered global shutdown handle, if available.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// One-way latch flipped when termination is requested.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Create a new, un-triggered signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Create a new shared signal wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Idempotent; wakes all waiters.
    pub fn request(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_wakes_waiters() {
        let signal = ShutdownSignal::shared();
        assert!(!signal.is_requested());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        signal.request();
        waiter.await.unwrap();
        assert!(signal.is_requested());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_requested() {
        let signal = ShutdownSignal::new();
        signal.request();
        signal.request(); // idempotent
        signal.wait().await;
    }
}
