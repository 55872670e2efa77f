//! Authenticated encryption of provisioning payloads
//!
//! AES-256-GCM bound to a resolved key: either a session's derived key or
//! the master key. Tampering produces a hard failure, never silently-wrong
//! plaintext. Nonces combine 4 random bytes with a process-wide counter so
//! they never repeat for any key within the process lifetime.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;
use zeroize::Zeroize;

use super::guard::CredentialGuard;
use super::material::{AES_KEY_SIZE, KeyMaterial};
use super::store::SessionKeyStore;
use crate::error::{Result, SecurityError};

/// Size of an AES-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of an AES-GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Which key a payload was sealed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum KeyReference {
    Master,
    Session(String),
}

impl KeyReference {
    fn resolve(key_reference: Option<&str>) -> Self {
        match key_reference {
            None | Some("master") => Self::Master,
            Some(id) => Self::Session(id.to_string()),
        }
    }
}

impl std::fmt::Display for KeyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Session(id) => write!(f, "{}", id),
        }
    }
}

impl From<KeyReference> for String {
    fn from(reference: KeyReference) -> Self {
        reference.to_string()
    }
}

impl TryFrom<String> for KeyReference {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Ok(if value == "master" {
            Self::Master
        } else {
            Self::Session(value)
        })
    }
}

/// An encrypted payload with its nonce and authentication tag
///
/// Binary fields are base64 encoded so payloads serialize cleanly for the
/// wireless transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// The key this payload was sealed under
    pub key_reference: KeyReference,

    /// Nonce used for this encryption (base64 encoded, 12 bytes)
    pub nonce: String,

    /// Ciphertext without the tag (base64 encoded)
    pub ciphertext: String,

    /// GCM authentication tag (base64 encoded, 16 bytes)
    pub tag: String,
}

/// Engine for authenticated encryption and decryption
///
/// Thread-safe and callable from both execution domains; cipher work against
/// a session runs under that session's lock, so it serializes with rotation
/// on the same session only.
#[derive(Debug)]
pub struct EncryptionEngine {
    store: Arc<SessionKeyStore>,
    guard: CredentialGuard,
    nonce_counter: AtomicU64,
}

impl EncryptionEngine {
    pub fn new(store: Arc<SessionKeyStore>) -> Self {
        Self {
            store,
            guard: CredentialGuard::new(),
            nonce_counter: AtomicU64::new(0),
        }
    }

    pub fn guard(&self) -> &CredentialGuard {
        &self.guard
    }

    /// Encrypt plaintext under the referenced key (master when omitted)
    ///
    /// Input shaped like literal credentials is refused before any key is
    /// resolved; the compliance check itself lives in [`CredentialGuard`].
    pub fn encrypt(&self, plaintext: &str, key_reference: Option<&str>) -> Result<EncryptedPayload> {
        let reference = KeyReference::resolve(key_reference);

        if self.guard.looks_like_plaintext_credentials(plaintext) {
            let err = SecurityError::EncryptionFailed(
                "input matches a plaintext credential pattern; generic encryption refused"
                    .to_string(),
            );
            warn!(
                error_code = err.code(),
                key_reference = %reference,
                "Encryption rejected by credential guard"
            );
            return Err(err);
        }

        let result = match &reference {
            KeyReference::Master => self
                .store
                .with_master_key(|master| self.seal(&master.material(), plaintext, &reference)),
            KeyReference::Session(id) => self
                .store
                .with_session_key(id, |key| self.seal(key, plaintext, &reference))
                .map_err(|e| unresolvable(&reference, e))?,
        };

        if let Err(e) = &result {
            warn!(
                error_code = e.code(),
                key_reference = %reference,
                "Encryption failed"
            );
        }
        result
    }

    /// Decrypt a payload with the key used at encryption time
    ///
    /// An explicit `key_reference` overrides the payload's own reference
    /// (the tag check still rejects any key other than the sealing one).
    pub fn decrypt(&self, payload: &EncryptedPayload, key_reference: Option<&str>) -> Result<String> {
        let reference = match key_reference {
            Some(_) => KeyReference::resolve(key_reference),
            None => payload.key_reference.clone(),
        };

        let result = match &reference {
            KeyReference::Master => self
                .store
                .with_master_key(|master| open(&master.material(), payload)),
            KeyReference::Session(id) => self
                .store
                .with_session_key(id, |key| open(key, payload))
                .map_err(|e| unresolvable(&reference, e))?,
        };

        if let Err(e) = &result {
            warn!(
                error_code = e.code(),
                key_reference = %reference,
                "Decryption failed"
            );
        }
        result
    }

    /// Seal plaintext under a specific key
    pub(crate) fn seal(
        &self,
        key: &KeyMaterial,
        plaintext: &str,
        reference: &KeyReference,
    ) -> Result<EncryptedPayload> {
        if key.len() < AES_KEY_SIZE {
            return Err(SecurityError::EncryptionFailed(format!(
                "resolved key is below the {}-byte minimum ({} bytes)",
                AES_KEY_SIZE,
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| SecurityError::EncryptionFailed(format!("cipher init: {}", e)))?;

        let nonce_bytes = self.next_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut combined = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecurityError::EncryptionFailed(format!("cipher error: {}", e)))?;
        let tag = combined.split_off(combined.len() - TAG_SIZE);

        Ok(EncryptedPayload {
            key_reference: reference.clone(),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(&combined),
            tag: BASE64.encode(&tag),
        })
    }

    /// 4 random bytes followed by a big-endian process-wide counter
    fn next_nonce(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce[..4]);
        let counter = self.nonce_counter.fetch_add(1, Ordering::Relaxed);
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }
}

/// At the cipher boundary a key reference that does not resolve is an
/// encryption failure; `SESSION_NOT_FOUND` stays scoped to the session
/// management operations.
fn unresolvable(reference: &KeyReference, source: SecurityError) -> SecurityError {
    match source {
        SecurityError::SessionNotFound(_) => SecurityError::EncryptionFailed(format!(
            "key reference '{}' does not resolve to a live key",
            reference
        )),
        other => other,
    }
}

/// Open a payload under a specific key
fn open(key: &KeyMaterial, payload: &EncryptedPayload) -> Result<String> {
    if key.len() < AES_KEY_SIZE {
        return Err(SecurityError::EncryptionFailed(format!(
            "resolved key is below the {}-byte minimum ({} bytes)",
            AES_KEY_SIZE,
            key.len()
        )));
    }

    let nonce_bytes = BASE64
        .decode(&payload.nonce)
        .map_err(|e| SecurityError::EncryptionFailed(format!("malformed payload nonce: {}", e)))?;
    let ciphertext = BASE64
        .decode(&payload.ciphertext)
        .map_err(|e| SecurityError::EncryptionFailed(format!("malformed payload ciphertext: {}", e)))?;
    let tag = BASE64
        .decode(&payload.tag)
        .map_err(|e| SecurityError::EncryptionFailed(format!("malformed payload tag: {}", e)))?;

    if nonce_bytes.len() != NONCE_SIZE {
        return Err(SecurityError::EncryptionFailed(format!(
            "malformed payload: nonce must be {} bytes, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        )));
    }
    if tag.len() != TAG_SIZE {
        return Err(SecurityError::EncryptionFailed(format!(
            "malformed payload: tag must be {} bytes, got {}",
            TAG_SIZE,
            tag.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| SecurityError::EncryptionFailed(format!("cipher init: {}", e)))?;

    let mut combined = ciphertext;
    combined.extend_from_slice(&tag);

    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher.decrypt(nonce, combined.as_ref()).map_err(|_| {
        SecurityError::EncryptionFailed(
            "authentication tag mismatch (wrong key or corrupted payload)".to_string(),
        )
    })?;

    // On the failure path the decrypted bytes go nowhere; wipe them instead
    // of leaving them in the freed allocation.
    String::from_utf8(plaintext).map_err(|e| {
        let mut rejected = e.into_bytes();
        rejected.zeroize();
        SecurityError::EncryptionFailed("decrypted bytes are not valid UTF-8".to_string())
    })
}
