//! Security service facade
//!
//! The single surface collaborators consume: the wireless transport, the
//! network orchestrator, and the ownership service all receive this by
//! `Arc` at startup. No hidden global lookup exists; construction happens
//! once in process wiring and everything downstream takes it by parameter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::engine::{EncryptedPayload, EncryptionEngine};
use super::monitor::KeyHealthMonitor;
use super::store::SessionKeyStore;
use crate::config::SecurityConfig;
use crate::coordination::ThreadCoordinator;
use crate::error::{Result, SecurityError};

/// Maximum SSID length in bytes (IEEE 802.11)
const MAX_IDENTIFIER_LEN: usize = 32;

/// WPA2 passphrase length bounds
const MIN_PASSPHRASE_LEN: usize = 8;
const MAX_PASSPHRASE_LEN: usize = 63;

/// Length of a raw pre-shared key given as hex digits
const RAW_PSK_HEX_LEN: usize = 64;

/// High-level security API for provisioning collaborators
#[derive(Debug)]
pub struct SecurityService {
    store: Arc<SessionKeyStore>,
    engine: Arc<EncryptionEngine>,
    monitor: Arc<KeyHealthMonitor>,
    coordinator: Arc<ThreadCoordinator>,
}

impl SecurityService {
    /// Construct the service, generating the process master key
    ///
    /// Fails with `KEY_COMPROMISED` if the master key does not pass the
    /// startup weakness check.
    pub fn new(config: SecurityConfig, coordinator: Arc<ThreadCoordinator>) -> Result<Self> {
        let store = Arc::new(SessionKeyStore::new(config)?);
        let engine = Arc::new(EncryptionEngine::new(store.clone()));
        let monitor = Arc::new(KeyHealthMonitor::new(store.clone(), coordinator.clone()));
        info!("Security service initialized");
        Ok(Self {
            store,
            engine,
            monitor,
            coordinator,
        })
    }

    pub fn store(&self) -> &Arc<SessionKeyStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<EncryptionEngine> {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<KeyHealthMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &Arc<ThreadCoordinator> {
        &self.coordinator
    }

    /// Encrypt plaintext under a session key (or the master key when no
    /// `key_id` is given), returning transport-ready bytes
    pub fn encrypt_data(&self, plaintext: &str, key_id: Option<&str>) -> Result<Vec<u8>> {
        let payload = self.engine.encrypt(plaintext, key_id)?;
        serde_json::to_vec(&payload)
            .map_err(|e| SecurityError::Internal(format!("payload serialization failed: {}", e)))
    }

    /// Decrypt transport bytes produced by [`encrypt_data`](Self::encrypt_data)
    pub fn decrypt_data(&self, ciphertext: &[u8], key_id: Option<&str>) -> Result<String> {
        let payload: EncryptedPayload = serde_json::from_slice(ciphertext).map_err(|e| {
            SecurityError::EncryptionFailed(format!("malformed payload structure: {}", e))
        })?;
        self.engine.decrypt(&payload, key_id)
    }

    /// Check whether a network identifier/secret pair is acceptable for
    /// provisioning
    ///
    /// Identifier rules follow the SSID limit; the secret must be either a
    /// WPA2 passphrase (8-63 printable ASCII characters) or a raw 64-digit
    /// hex pre-shared key. Returns the verdict; never the reason with the
    /// secret embedded.
    pub fn validate_credentials(&self, identifier: &str, secret: &str) -> Result<bool> {
        if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LEN {
            return Ok(false);
        }

        let is_raw_psk =
            secret.len() == RAW_PSK_HEX_LEN && secret.chars().all(|c| c.is_ascii_hexdigit());
        let is_passphrase = (MIN_PASSPHRASE_LEN..=MAX_PASSPHRASE_LEN).contains(&secret.len())
            && secret.chars().all(|c| (' '..='~').contains(&c));

        Ok(is_raw_psk || is_passphrase)
    }

    /// Create a provisioning session for a connected client
    pub fn create_session(&self, client_id: &str) -> Result<String> {
        self.store.create_session(client_id)
    }

    /// Rotate a session's key; true on success
    pub fn rotate_session_key(&self, session_id: &str) -> Result<bool> {
        self.store.rotate_session_key(session_id)?;
        Ok(true)
    }

    /// Audit arbitrary text for credential-shaped content
    pub fn detect_plaintext_credentials(&self, text: &str) -> bool {
        self.engine.guard().looks_like_plaintext_credentials(text)
    }

    /// Expire idle or stale sessions, returning the number removed
    pub fn expire_sessions(&self, now: DateTime<Utc>) -> usize {
        self.store.expire_sessions(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SecurityService {
        SecurityService::new(SecurityConfig::default(), Arc::new(ThreadCoordinator::new()))
            .expect("service")
    }

    #[test]
    fn test_encrypt_decrypt_bytes_roundtrip() {
        let service = service();
        let bytes = service.encrypt_data("status: online", None).unwrap();
        assert_eq!(service.decrypt_data(&bytes, None).unwrap(), "status: online");
    }

    #[test]
    fn test_session_bound_roundtrip() {
        let service = service();
        let session_id = service.create_session("companion-app").unwrap();

        let bytes = service
            .encrypt_data("payload for one client", Some(&session_id))
            .unwrap();
        let plaintext = service.decrypt_data(&bytes, None).unwrap();
        assert_eq!(plaintext, "payload for one client");
    }

    #[test]
    fn test_decrypt_garbage_bytes() {
        let service = service();
        let err = service.decrypt_data(b"not a payload", None).unwrap_err();
        assert_eq!(err.code(), "ENCRYPTION_FAILED");
    }

    #[test]
    fn test_validate_credentials_accepts_wpa2_passphrase() {
        let service = service();
        assert!(service.validate_credentials("HomeNet", "hunter2!").unwrap());
        assert!(
            service
                .validate_credentials("HomeNet", "a much longer passphrase 123")
                .unwrap()
        );
    }

    #[test]
    fn test_validate_credentials_accepts_raw_psk() {
        let service = service();
        let psk = "ab".repeat(32);
        assert!(service.validate_credentials("HomeNet", &psk).unwrap());
    }

    #[test]
    fn test_validate_credentials_rejects_bad_input() {
        let service = service();
        assert!(!service.validate_credentials("", "hunter2!").unwrap());
        assert!(!service.validate_credentials(&"s".repeat(33), "hunter2!").unwrap());
        assert!(!service.validate_credentials("HomeNet", "short").unwrap());
        assert!(!service.validate_credentials("HomeNet", &"x".repeat(64)).unwrap());
        assert!(!service.validate_credentials("HomeNet", "tab\tis\tnot\tprintable").unwrap());
    }

    #[test]
    fn test_rotate_session_key_returns_true() {
        let service = service();
        let session_id = service.create_session("device").unwrap();
        assert!(service.rotate_session_key(&session_id).unwrap());

        let err = service.rotate_session_key("no-such-id").unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn test_detect_plaintext_credentials_passthrough() {
        let service = service();
        assert!(service.detect_plaintext_credentials("password=hunter2"));
        assert!(!service.detect_plaintext_credentials("all quiet on the device"));
    }
}
