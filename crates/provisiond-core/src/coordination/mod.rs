//! Coordination between the cooperative orchestration loop and the
//! blocking wireless-stack threads
//!
//! Crossing domains always goes through these types; ad hoc loop lookups
//! from worker threads are not supported.

mod bridge;
mod coordinator;

pub use bridge::AsyncSyncBridge;
pub use coordinator::{
    CROSS_DOMAIN_TIMEOUT, CoordinationMode, OperationGuard, ThreadCoordinator,
    ThreadOperationRecord,
};
