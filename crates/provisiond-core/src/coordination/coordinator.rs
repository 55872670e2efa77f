//! Cross-domain call coordination
//!
//! Two execution domains coexist in the provisioning agent: the cooperative
//! tokio loop running orchestration, and the OS threads driven by the
//! wireless stack's blocking callback API. Crossing between them always goes
//! through this coordinator: it tracks in-flight blocking operations,
//! dispatches work to the proper domain with a bounded deadline, and drains
//! the live operation table during graceful shutdown.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{Result, SecurityError};

/// Deadline for a blocking thread awaiting a cooperative routine
pub const CROSS_DOMAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the shutdown loop re-checks the live operation table
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The declared execution-domain relationship of a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationMode {
    /// Runs only on the cooperative loop
    CooperativeOnly,
    /// Runs only on a worker/callback thread
    ThreadOnly,
    /// A thread blocked on cooperative work (or vice versa)
    Mixed,
}

impl CoordinationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CooperativeOnly => "cooperative-only",
            Self::ThreadOnly => "thread-only",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A live blocking operation, tracked from start to finish
#[derive(Debug, Clone)]
pub struct ThreadOperationRecord {
    pub id: u64,
    pub thread_identity: String,
    pub operation_name: String,
    pub started_at: DateTime<Utc>,
    pub coordination_mode: CoordinationMode,
}

type OperationTable = Arc<Mutex<HashMap<u64, ThreadOperationRecord>>>;

/// RAII registration of a blocking operation
///
/// Removal from the live table happens on drop, so every exit path
/// (success, early return, panic unwind) leaves tracking consistent.
pub struct OperationGuard {
    operations: OperationTable,
    id: u64,
}

impl OperationGuard {
    fn register(
        operations: &OperationTable,
        counter: &AtomicU64,
        name: &str,
        mode: CoordinationMode,
    ) -> Self {
        let id = counter.fetch_add(1, Ordering::Relaxed);
        Self::with_id(operations, id, name, mode)
    }

    fn with_id(operations: &OperationTable, id: u64, name: &str, mode: CoordinationMode) -> Self {
        let record = ThreadOperationRecord {
            id,
            thread_identity: thread_identity(),
            operation_name: name.to_string(),
            started_at: Utc::now(),
            coordination_mode: mode,
        };
        debug!(
            operation = %record.operation_name,
            thread = %record.thread_identity,
            mode = %mode,
            "Operation started"
        );
        operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, record);
        Self {
            operations: Arc::clone(operations),
            id,
        }
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

fn thread_identity() -> String {
    let current = std::thread::current();
    match current.name() {
        Some(name) => format!("{} ({:?})", name, current.id()),
        None => format!("{:?}", current.id()),
    }
}

/// Coordinator for calls crossing between the cooperative loop and
/// wireless-stack worker threads
#[derive(Debug)]
pub struct ThreadCoordinator {
    runtime: RwLock<Option<Handle>>,
    operations: OperationTable,
    next_operation_id: AtomicU64,
    shutting_down: AtomicBool,
    cross_domain_timeout: Duration,
}

impl ThreadCoordinator {
    pub fn new() -> Self {
        Self::with_cross_domain_timeout(CROSS_DOMAIN_TIMEOUT)
    }

    /// Create a coordinator with a non-default cross-domain deadline
    pub fn with_cross_domain_timeout(timeout: Duration) -> Self {
        Self {
            runtime: RwLock::new(None),
            operations: Arc::new(Mutex::new(HashMap::new())),
            next_operation_id: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            cross_domain_timeout: timeout,
        }
    }

    /// Register the cooperative loop this coordinator dispatches onto
    pub fn register_runtime(&self, handle: Handle) {
        *self
            .runtime
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("Cooperative runtime registered with coordinator");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Scoped registration of a blocking operation on the calling thread
    pub fn thread_operation(&self, name: &str, mode: CoordinationMode) -> OperationGuard {
        OperationGuard::register(&self.operations, &self.next_operation_id, name, mode)
    }

    /// Read-only snapshot of the live operation table
    pub fn get_active_operations(&self) -> Vec<ThreadOperationRecord> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Dispatch a blocking function to a worker thread from the cooperative
    /// domain, awaiting it without stalling the loop's other work
    ///
    /// Cancelling the awaiting task does not abort the worker mid-operation;
    /// the operation record is removed once the thread finishes.
    pub async fn run_in_thread<F, T>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutting_down() {
            return Err(SecurityError::CoordinationPrecondition(format!(
                "run_in_thread('{}') refused: shutdown in progress",
                name
            )));
        }

        let current = Handle::try_current().map_err(|_| {
            SecurityError::CoordinationPrecondition(format!(
                "run_in_thread('{}') called outside the cooperative domain",
                name
            ))
        })?;
        let handle = self
            .runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(current);

        let operations = Arc::clone(&self.operations);
        let id = self.next_operation_id.fetch_add(1, Ordering::Relaxed);
        let name_owned = name.to_string();
        handle
            .spawn_blocking(move || {
                // Registered on the worker so a cancelled awaiter still
                // leaves the record live until the thread finishes.
                let _guard = OperationGuard::with_id(
                    &operations,
                    id,
                    &name_owned,
                    CoordinationMode::ThreadOnly,
                );
                f()
            })
            .await
            .map_err(|e| {
                SecurityError::Internal(format!("worker thread for '{}' failed: {}", name, e))
            })
    }

    /// Schedule a cooperative routine from a non-loop thread and block the
    /// calling thread (never the loop) for its result
    ///
    /// Calling this from any runtime-managed thread is a caller bug and
    /// fails immediately rather than deadlocking. That refusal is stricter
    /// than the loop thread alone: spawn_blocking workers (including
    /// closures dispatched via [`run_in_thread`](Self::run_in_thread)) carry
    /// the runtime context and are refused too; only genuinely external
    /// threads, such as wireless-stack callbacks, may block here. With no
    /// runtime registered, a transient single-call runtime is established.
    pub fn run_async_from_sync<F>(&self, name: &str, future: F) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            return Err(SecurityError::CoordinationPrecondition(format!(
                "run_async_from_sync('{}') called from the cooperative loop's own thread; \
                 blocking here would deadlock the loop",
                name
            )));
        }
        if self.is_shutting_down() {
            return Err(SecurityError::CoordinationPrecondition(format!(
                "run_async_from_sync('{}') refused: shutdown in progress",
                name
            )));
        }

        let _guard = self.thread_operation(name, CoordinationMode::Mixed);
        let registered = self
            .runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match registered {
            Some(handle) => {
                let (tx, rx) = std::sync::mpsc::sync_channel(1);
                let task = handle.spawn(async move {
                    let _ = tx.send(future.await);
                });

                match rx.recv_timeout(self.cross_domain_timeout) {
                    Ok(value) => Ok(value),
                    Err(RecvTimeoutError::Timeout) => {
                        task.abort();
                        warn!(operation = name, "Cross-domain call timed out");
                        Err(SecurityError::CoordinationTimeout {
                            operation: name.to_string(),
                            timeout_secs: self.cross_domain_timeout.as_secs(),
                        })
                    }
                    Err(RecvTimeoutError::Disconnected) => Err(SecurityError::Internal(format!(
                        "cooperative task for '{}' dropped its result",
                        name
                    ))),
                }
            }
            None => {
                debug!(operation = name, "No runtime registered; using a transient one");
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| {
                        SecurityError::Internal(format!("transient runtime build failed: {}", e))
                    })?;
                // The timeout future needs the runtime's reactor, so it must
                // be constructed inside block_on, not before it.
                let deadline = self.cross_domain_timeout;
                runtime
                    .block_on(async move { tokio::time::timeout(deadline, future).await })
                    .map_err(|_| SecurityError::CoordinationTimeout {
                        operation: name.to_string(),
                        timeout_secs: self.cross_domain_timeout.as_secs(),
                    })
            }
        }
    }

    /// Signal shutdown; new cross-domain dispatches are refused
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Coordinator shutdown signalled");
        }
    }

    /// Wait for in-flight blocking operations to drain
    ///
    /// Returns true iff the live table emptied within `timeout`; polls at a
    /// fixed interval so the overshoot is bounded by that granularity.
    pub async fn graceful_shutdown(&self, timeout: Duration) -> bool {
        self.begin_shutdown();
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = self
                .operations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len();
            if remaining == 0 {
                info!("All tracked operations drained");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(remaining, "Graceful shutdown timed out with operations in flight");
                return false;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }

    /// [`graceful_shutdown`](Self::graceful_shutdown) surfacing the stuck
    /// operation count as an error
    pub async fn drain(&self, timeout: Duration) -> Result<()> {
        if self.graceful_shutdown(timeout).await {
            Ok(())
        } else {
            Err(SecurityError::ShutdownIncomplete(
                self.get_active_operations().len(),
            ))
        }
    }
}

impl Default for ThreadCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
