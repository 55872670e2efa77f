//! Key material and weakness classification
//!
//! Raw key bytes are wrapped so they are zeroized on drop and never leak
//! through `Debug` output. Classification is computed on demand; a key must
//! be re-classified after every rotation, so verdicts are never cached.

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::SecurityError;

/// Size of an AES-256 key in bytes
pub const AES_KEY_SIZE: usize = 32;

/// Minimum distinct byte values a key of 16+ bytes must contain
pub const MIN_UNIQUE_BYTE_VALUES: usize = 8;

/// Minimum key length for sequential-pattern detection to apply
const SEQUENTIAL_MIN_LEN: usize = 8;

/// Why a key was classified as weak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakKeyReason {
    /// Every byte has the same value
    AllIdenticalBytes,
    /// Fewer distinct byte values than required for the key's length
    LowUniqueByteCount { unique: usize, minimum: usize },
    /// Bytes form an arithmetic progression (constant wrapping delta)
    SequentialPattern,
}

impl std::fmt::Display for WeakKeyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllIdenticalBytes => write!(f, "all-identical-bytes"),
            Self::LowUniqueByteCount { unique, minimum } => {
                write!(f, "low-unique-byte-count ({} of minimum {})", unique, minimum)
            }
            Self::SequentialPattern => write!(f, "sequential-pattern"),
        }
    }
}

/// Classification verdict for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrength {
    Strong,
    Weak(WeakKeyReason),
}

impl KeyStrength {
    pub fn is_weak(&self) -> bool {
        matches!(self, Self::Weak(_))
    }
}

/// Raw key bytes, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Short non-secret identifier for log correlation (first 8 bytes of the
    /// key's SHA-256, hex encoded)
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..8])
    }

    /// Classify the key's strength
    ///
    /// Heuristic detection of keys unlikely to have come from a strong random
    /// source. Computed from scratch on every call.
    pub fn classify(&self) -> KeyStrength {
        let bytes = &self.bytes;

        if bytes.is_empty() {
            return KeyStrength::Weak(WeakKeyReason::LowUniqueByteCount {
                unique: 0,
                minimum: 1,
            });
        }

        if bytes.len() >= 2 && bytes.iter().all(|b| *b == bytes[0]) {
            return KeyStrength::Weak(WeakKeyReason::AllIdenticalBytes);
        }

        if bytes.len() >= SEQUENTIAL_MIN_LEN {
            let delta = bytes[1].wrapping_sub(bytes[0]);
            if delta != 0 && bytes.windows(2).all(|w| w[1].wrapping_sub(w[0]) == delta) {
                return KeyStrength::Weak(WeakKeyReason::SequentialPattern);
            }
        }

        let mut seen = [false; 256];
        for b in bytes {
            seen[*b as usize] = true;
        }
        let unique = seen.iter().filter(|s| **s).count();
        let minimum = if bytes.len() >= 16 {
            MIN_UNIQUE_BYTE_VALUES
        } else {
            (bytes.len() / 2).max(1)
        };
        if unique < minimum {
            return KeyStrength::Weak(WeakKeyReason::LowUniqueByteCount { unique, minimum });
        }

        KeyStrength::Strong
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"[REDACTED]")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The process-wide root secret
///
/// Generated once at process start, held only in memory, and never logged or
/// serialized. Session keys are derived from it; once sessions exist it is
/// not used directly for application payloads.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; AES_KEY_SIZE],
}

impl MasterKey {
    /// Generate a new random master key
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a master key from raw bytes
    ///
    /// Anything below the 256-bit minimum is refused outright; no default is
    /// ever substituted.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SecurityError> {
        if bytes.len() != AES_KEY_SIZE {
            return Err(SecurityError::KeyCompromised(format!(
                "master key must be exactly {} bytes, got {}",
                AES_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; AES_KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    pub(crate) fn as_bytes(&self) -> &[u8; AES_KEY_SIZE] {
        &self.bytes
    }

    /// View the master key as classifiable key material
    pub fn material(&self) -> KeyMaterial {
        KeyMaterial::from_bytes(&self.bytes)
    }

    /// Derive a fresh session key from the master key and new randomness
    pub fn derive_session_key(&self, client_id: &str) -> KeyMaterial {
        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);

        let mut hasher = Sha256::new();
        hasher.update(self.bytes);
        hasher.update(salt);
        hasher.update(client_id.as_bytes());
        let digest = hasher.finalize();

        salt.zeroize();
        KeyMaterial::from_bytes(&digest)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
