//! Plaintext credential pattern detection
//!
//! Structural heuristics for text that looks like literal, unencrypted
//! network credentials. Used as a pre-encryption compliance gate and exposed
//! standalone for auditing strings about to be persisted. False negatives
//! are possible and acceptable; a match blocks the calling code path.

use serde_json::Value;

/// Key names that identify a credential assignment outright
const CREDENTIAL_KEY_NAMES: &[&str] = &[
    "ssid",
    "password",
    "psk",
    "passphrase",
    "secret",
    "token",
    "api_key",
    "apikey",
    "wifi_password",
    "network_key",
    "wpa_passphrase",
];

/// Substrings that flag a key name when its value is long enough
const SENSITIVE_KEY_SUBSTRINGS: &[&str] = &["password", "token", "secret"];

/// Minimum value length for a substring-based key match
const MIN_SENSITIVE_VALUE_LEN: usize = 8;

/// Detector for credential-shaped plaintext
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialGuard;

impl CredentialGuard {
    pub fn new() -> Self {
        Self
    }

    /// Check whether `text` is structured like unencrypted credentials
    ///
    /// Matches:
    /// - JSON objects (at any nesting depth) with credential-named keys
    /// - `KEY=VALUE` or `KEY: VALUE` lines with recognized credential keys
    /// - assignments to names containing password/token/secret with values
    ///   of at least 8 characters
    pub fn looks_like_plaintext_credentials(&self, text: &str) -> bool {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            if json_has_credential_key(&value) {
                return true;
            }
        }

        text.lines().any(|line| {
            split_assignment(line)
                .map(|(key, value)| key_flags_value(&key, &value))
                .unwrap_or(false)
        })
    }
}

/// Split a `KEY=VALUE` or `KEY: VALUE` line into a normalized key and value
fn split_assignment(line: &str) -> Option<(String, String)> {
    let idx = line.find(['=', ':'])?;
    let key = line[..idx]
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase();
    let value = line[idx + 1..].trim().to_string();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value))
}

fn key_flags_value(key: &str, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if CREDENTIAL_KEY_NAMES.contains(&key) {
        return true;
    }
    value.len() >= MIN_SENSITIVE_VALUE_LEN
        && SENSITIVE_KEY_SUBSTRINGS.iter().any(|s| key.contains(s))
}

fn json_has_credential_key(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(key, child)| {
            let key = key.to_ascii_lowercase();
            CREDENTIAL_KEY_NAMES.contains(&key.as_str())
                || SENSITIVE_KEY_SUBSTRINGS.iter().any(|s| key.contains(s))
                || json_has_credential_key(child)
        }),
        Value::Array(items) => items.iter().any(json_has_credential_key),
        _ => false,
    }
}
