//! Async/sync bridge adapters
//!
//! Call sites that must expose one calling convention to callers in the
//! other domain wrap the coordinator through this adapter instead of
//! spelling out the handoff at every site.

use std::future::Future;
use std::sync::Arc;

use super::coordinator::ThreadCoordinator;
use crate::error::Result;

/// Thin adapter over [`ThreadCoordinator`] for domain-crossing call sites
#[derive(Debug, Clone)]
pub struct AsyncSyncBridge {
    coordinator: Arc<ThreadCoordinator>,
}

impl AsyncSyncBridge {
    pub fn new(coordinator: Arc<ThreadCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<ThreadCoordinator> {
        &self.coordinator
    }

    /// Expose a cooperative routine as a plain blocking call
    ///
    /// For wireless callback threads needing a result from the network
    /// layer. Same preconditions and deadline as
    /// [`ThreadCoordinator::run_async_from_sync`].
    pub fn blocking_call<F>(&self, name: &str, future: F) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.coordinator.run_async_from_sync(name, future)
    }

    /// Expose a blocking routine as an awaitable
    ///
    /// For cooperative tasks needing a result from the blocking wireless
    /// stack without stalling the loop.
    pub async fn dispatch<F, T>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.coordinator.run_in_thread(name, f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Handle;

    #[tokio::test]
    async fn test_dispatch_runs_blocking_work() {
        let bridge = AsyncSyncBridge::new(Arc::new(ThreadCoordinator::new()));
        let value = bridge
            .dispatch("checksum", || {
                std::thread::sleep(std::time::Duration::from_millis(10));
                0xBEEFu32
            })
            .await
            .unwrap();
        assert_eq!(value, 0xBEEF);
    }

    #[tokio::test]
    async fn test_blocking_call_from_callback_thread() {
        let bridge = AsyncSyncBridge::new(Arc::new(ThreadCoordinator::new()));
        bridge.coordinator().register_runtime(Handle::current());

        let worker = bridge.clone();
        let result = tokio::task::spawn_blocking(move || {
            std::thread::spawn(move || {
                worker.blocking_call("lookup", async { String::from("10.0.0.7") })
            })
            .join()
            .unwrap()
        })
        .await
        .unwrap();

        assert_eq!(result.unwrap(), "10.0.0.7");
    }

    #[tokio::test]
    async fn test_blocking_call_precondition_passthrough() {
        let bridge = AsyncSyncBridge::new(Arc::new(ThreadCoordinator::new()));
        bridge.coordinator().register_runtime(Handle::current());

        let err = bridge.blocking_call("on-loop", async { 0 }).unwrap_err();
        assert_eq!(err.code(), "COORDINATION_PRECONDITION_VIOLATED");
    }
}
