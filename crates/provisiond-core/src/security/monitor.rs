//! Key health monitoring and rotation sweeps
//!
//! Periodically re-classifies every key, expires stale sessions, and rotates
//! session keys that are overdue or weak. The recurring task runs on the
//! cooperative loop but dispatches the sweep body through the coordinator so
//! classification work never blocks scheduled orchestration.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::material::{KeyMaterial, KeyStrength};
use super::store::SessionKeyStore;
use crate::coordination::ThreadCoordinator;
use crate::error::{Result, SecurityError};

/// Result of one key health sweep
#[derive(Debug)]
pub struct SweepReport {
    /// Sessions removed for inactivity or key age
    pub expired: usize,

    /// Sessions whose keys were rotated
    pub rotated: Vec<String>,

    /// Rotations that failed this sweep; retried on the next one
    pub failures: Vec<(String, SecurityError)>,
}

impl SweepReport {
    fn new() -> Self {
        Self {
            expired: 0,
            rotated: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.expired > 0 {
            parts.push(format!("{} sessions expired", self.expired));
        }
        if !self.rotated.is_empty() {
            parts.push(format!("{} keys rotated", self.rotated.len()));
        }
        if !self.failures.is_empty() {
            parts.push(format!("{} rotations failed", self.failures.len()));
        }
        if parts.is_empty() {
            "Sweep completed (no actions needed)".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Monitor for rotation due-dates and key compromise
#[derive(Debug)]
pub struct KeyHealthMonitor {
    store: Arc<SessionKeyStore>,
    coordinator: Arc<ThreadCoordinator>,
}

impl KeyHealthMonitor {
    pub fn new(store: Arc<SessionKeyStore>, coordinator: Arc<ThreadCoordinator>) -> Self {
        Self { store, coordinator }
    }

    /// Classify arbitrary key material
    pub fn classify(&self, key: &KeyMaterial) -> KeyStrength {
        key.classify()
    }

    /// Verify the master key is strong
    ///
    /// A weak master key is fatal: it cannot be silently rotated without
    /// re-establishing every session, so the condition blocks startup.
    pub fn check_master(&self) -> Result<()> {
        match self.store.master_strength() {
            KeyStrength::Strong => Ok(()),
            KeyStrength::Weak(reason) => Err(SecurityError::KeyCompromised(format!(
                "master key classified weak: {}",
                reason
            ))),
        }
    }

    /// Run one sweep: expire stale sessions, rotate overdue or weak keys
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.check_master()?;

        let mut report = SweepReport::new();
        report.expired = self.store.expire_sessions(now);

        let rotation_interval =
            ChronoDuration::seconds(self.store.config().key_rotation_interval_secs as i64);

        for session_id in self.store.session_ids() {
            // The session may have been torn down since the id snapshot.
            let Some(status) = self.store.inspect(&session_id) else {
                continue;
            };

            let never_rotated = status.rotation_count == 0;
            let overdue = now - status.last_rotated_at > rotation_interval;
            let weak = status.key_strength.is_weak();

            if never_rotated || overdue || weak {
                if weak {
                    warn!(
                        session_id = %session_id,
                        strength = ?status.key_strength,
                        "Weak session key detected, forcing rotation"
                    );
                }
                match self.store.rotate_session_key(&session_id) {
                    Ok(()) => report.rotated.push(session_id),
                    Err(e) => {
                        warn!(
                            session_id = %session_id,
                            error_code = e.code(),
                            "Rotation failed; will retry next sweep"
                        );
                        report.failures.push((session_id, e));
                    }
                }
            }
        }

        debug!(
            expired = report.expired,
            rotated = report.rotated.len(),
            failures = report.failures.len(),
            "Key health sweep completed"
        );
        Ok(report)
    }

    /// Spawn the recurring sweep task on the cooperative loop
    ///
    /// Sweeps at a quarter of the rotation interval (at least every second)
    /// and stops once the coordinator begins shutting down.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let period = (monitor.store.config().key_rotation_interval() / 4)
                .max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(period_secs = period.as_secs(), "Key health monitor started");
            loop {
                ticker.tick().await;
                if monitor.coordinator.is_shutting_down() {
                    break;
                }

                let sweeper = Arc::clone(&monitor);
                let dispatched = monitor
                    .coordinator
                    .run_in_thread("key-health-sweep", move || sweeper.sweep(Utc::now()))
                    .await;

                match dispatched {
                    Ok(Ok(report)) => {
                        if report.expired > 0 || !report.rotated.is_empty() {
                            info!(summary = %report.summary(), "Key health sweep");
                        }
                    }
                    Ok(Err(e)) => {
                        error!(error_code = e.code(), "Key health sweep failed: {}", e);
                        if matches!(e, SecurityError::KeyCompromised(_)) {
                            break;
                        }
                    }
                    Err(e) => {
                        // Dispatch refused, e.g. shutdown started mid-tick.
                        debug!(error_code = e.code(), "Sweep dispatch refused");
                        break;
                    }
                }
            }
            info!("Key health monitor stopped");
        })
    }
}
