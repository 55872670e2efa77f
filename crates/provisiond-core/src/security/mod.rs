//! Security session core
//!
//! Master/session key lifecycle, authenticated payload encryption, the
//! credential compliance gate, and key health monitoring. Everything here is
//! thread-safe and callable from either execution domain without blocking on
//! cooperative primitives.

mod engine;
mod guard;
mod material;
mod monitor;
mod service;
mod store;

pub use engine::{EncryptedPayload, EncryptionEngine, KeyReference};
pub use guard::CredentialGuard;
pub use material::{AES_KEY_SIZE, KeyMaterial, KeyStrength, MasterKey, WeakKeyReason};
pub use monitor::{KeyHealthMonitor, SweepReport};
pub use service::SecurityService;
pub use store::{Session, SessionKeyStore, SessionStatus};
