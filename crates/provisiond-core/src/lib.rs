//! Provisiond Core Library
//!
//! This crate provides the security core for Provisiond, including:
//! - Master and per-session key lifecycle (creation, rotation, expiry)
//! - Authenticated encryption of credential payloads (AES-256-GCM)
//! - Plaintext credential pattern detection (compliance gate)
//! - Key health monitoring and scheduled rotation sweeps
//! - Coordination between the async orchestration loop and the blocking
//!   wireless-stack callback threads
//!
//! The wireless transport, SOC detection, and display layers live in
//! sibling crates and consume this one through [`security::SecurityService`]
//! and [`coordination::ThreadCoordinator`].

pub mod config;
pub mod coordination;
pub mod error;
pub mod security;

pub use error::{Result, SecurityError, Severity};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SecurityConfig;
    pub use crate::coordination::{AsyncSyncBridge, ThreadCoordinator};
    pub use crate::error::{Result, SecurityError, Severity};
    pub use crate::security::{
        CredentialGuard, EncryptionEngine, KeyHealthMonitor, SecurityService, SessionKeyStore,
    };
}
