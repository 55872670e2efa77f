//! Security configuration with file persistence
//!
//! Loaded for the process by the configuration collaborator and handed to the
//! security core by reference. There is deliberately no switch that disables
//! encryption: the absence of such a flag is a security invariant of the
//! provisioning agent.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Security configuration for the provisioning agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Seconds of inactivity after which a session is expired
    pub session_timeout_secs: u64,

    /// Failed credential validation attempts before a client is refused
    pub max_failed_attempts: u32,

    /// Seconds a new device waits for owner setup before giving up
    pub owner_setup_timeout_secs: u64,

    /// Whether owner setup must complete before provisioning starts
    pub require_owner_setup: bool,

    /// Seconds between scheduled key rotations for a session
    pub key_rotation_interval_secs: u64,

    /// Maximum seconds a session key may live, rotated or not
    pub max_key_age_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 900,
            max_failed_attempts: 5,
            owner_setup_timeout_secs: 300,
            require_owner_setup: true,
            key_rotation_interval_secs: 3600,
            max_key_age_secs: 86_400,
        }
    }
}

impl SecurityConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn owner_setup_timeout(&self) -> Duration {
        Duration::from_secs(self.owner_setup_timeout_secs)
    }

    pub fn key_rotation_interval(&self) -> Duration {
        Duration::from_secs(self.key_rotation_interval_secs)
    }

    pub fn max_key_age(&self) -> Duration {
        Duration::from_secs(self.max_key_age_secs)
    }

    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("PROVISIOND_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("provisiond")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("security.toml"))
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<Self> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(self.clone())
    }

    /// Reject configurations that would hollow out the key lifecycle
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session_timeout_secs == 0 {
            return Err(anyhow!("session_timeout_secs must be greater than zero"));
        }
        if self.key_rotation_interval_secs == 0 {
            return Err(anyhow!("key_rotation_interval_secs must be greater than zero"));
        }
        if self.max_key_age_secs < self.key_rotation_interval_secs {
            return Err(anyhow!(
                "max_key_age_secs must be at least key_rotation_interval_secs"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SecurityConfig::default();
        assert_eq!(config.session_timeout(), Duration::from_secs(900));
        assert_eq!(config.max_failed_attempts, 5);
        assert!(config.require_owner_setup);
        assert_eq!(config.key_rotation_interval(), Duration::from_secs(3600));
        assert_eq!(config.max_key_age(), Duration::from_secs(86_400));
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("security.toml");

        let mut config = SecurityConfig::default();
        config.session_timeout_secs = 120;
        config.require_owner_setup = false;
        config.save_to(&path).expect("save");

        let loaded = SecurityConfig::load_from(&path).expect("load");
        assert_eq!(loaded.session_timeout_secs, 120);
        assert!(!loaded.require_owner_setup);
        assert_eq!(loaded.max_failed_attempts, 5);
    }

    #[test]
    fn test_rejects_zero_rotation_interval() {
        let mut config = SecurityConfig::default();
        config.key_rotation_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_key_age_below_rotation_interval() {
        let mut config = SecurityConfig::default();
        config.max_key_age_secs = config.key_rotation_interval_secs - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("security.toml");
        fs::write(&path, "not valid toml [[").expect("write");
        assert!(SecurityConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_no_encryption_toggle_exists() {
        // The TOML surface must not accept a switch that disables encryption.
        let parsed: toml::Value =
            toml::from_str(&toml::to_string(&SecurityConfig::default()).unwrap()).unwrap();
        assert!(parsed.get("encryption_enabled").is_none());
    }
}
