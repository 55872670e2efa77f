//! Error types for the Provisiond security core

use thiserror::Error;

/// Result type alias using the security core's error
pub type Result<T> = std::result::Result<T, SecurityError>;

/// How serious a failure is for the device as a whole.
///
/// Collaborators use this to decide between logging, backing off, and
/// refusing to continue provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Security core error types
///
/// Every public operation returns one of these rather than panicking;
/// messages never contain plaintext or key bytes.
#[derive(Error, Debug)]
pub enum SecurityError {
    /// Missing/short key, authentication failure, malformed payload, or a
    /// credential-pattern rejection on the encrypt path.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Invalid session request: {0}")]
    SessionInvalid(String),

    /// A weak or low-entropy key was detected where a strong one is required.
    #[error("Key compromised: {0}")]
    KeyCompromised(String),

    /// A cross-domain call exceeded its deadline.
    #[error("Coordination timeout: operation '{operation}' exceeded {timeout_secs}s")]
    CoordinationTimeout { operation: String, timeout_secs: u64 },

    /// Caller bug (e.g. blocking bridge invoked from the loop's own thread).
    /// Never retried.
    #[error("Coordination precondition violated: {0}")]
    CoordinationPrecondition(String),

    #[error("Shutdown incomplete: {0} operation(s) still in flight")]
    ShutdownIncomplete(usize),

    /// Unexpected internal fault caught at the public boundary.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SecurityError {
    /// Get the stable error-kind code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::EncryptionFailed(_) => "ENCRYPTION_FAILED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionInvalid(_) => "SESSION_INVALID",
            Self::KeyCompromised(_) => "KEY_COMPROMISED",
            Self::CoordinationTimeout { .. } => "COORDINATION_TIMEOUT",
            Self::CoordinationPrecondition(_) => "COORDINATION_PRECONDITION_VIOLATED",
            Self::ShutdownIncomplete(_) => "SHUTDOWN_INCOMPLETE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Get the severity of this error
    pub fn severity(&self) -> Severity {
        match self {
            Self::SessionNotFound(_) | Self::SessionInvalid(_) => Severity::Low,
            Self::EncryptionFailed(_)
            | Self::CoordinationTimeout { .. }
            | Self::ShutdownIncomplete(_) => Severity::Medium,
            Self::KeyCompromised(_)
            | Self::CoordinationPrecondition(_)
            | Self::Internal(_) => Severity::High,
        }
    }
}
