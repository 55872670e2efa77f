//! Session key store
//!
//! Owns the process-wide master key and every per-session derived key.
//! Thread-safe from both execution domains: the table is guarded by a coarse
//! `RwLock` for insert/remove, while each session carries its own `Mutex` so
//! key mutation on one session never serializes unrelated sessions. std
//! primitives only, no cooperative locks, so wireless callback threads may
//! call in directly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::material::{KeyMaterial, KeyStrength, MasterKey};
use crate::config::SecurityConfig;
use crate::error::{Result, SecurityError};

/// A bounded credential-exchange context between one client and the device
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub client_id: String,
    session_key: KeyMaterial,
    pub created_at: DateTime<Utc>,
    pub last_rotated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub rotation_count: u32,
}

/// Non-secret view of a session used by the health monitor
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub session_id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub last_rotated_at: DateTime<Utc>,
    pub rotation_count: u32,
    pub key_strength: KeyStrength,
}

/// Store for the master key and per-session derived keys
#[derive(Debug)]
pub struct SessionKeyStore {
    master: RwLock<MasterKey>,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    config: SecurityConfig,
}

impl SessionKeyStore {
    /// Create a store with a freshly generated master key
    ///
    /// Fails with `KEY_COMPROMISED` if the generated key classifies as weak.
    /// That condition blocks startup: the master key cannot be silently
    /// replaced without re-establishing every session.
    pub fn new(config: SecurityConfig) -> Result<Self> {
        Self::with_master(MasterKey::generate(), config)
    }

    /// Create a store around an externally supplied master key
    pub fn with_master(master: MasterKey, config: SecurityConfig) -> Result<Self> {
        if let KeyStrength::Weak(reason) = master.material().classify() {
            return Err(SecurityError::KeyCompromised(format!(
                "master key failed startup weakness check: {}",
                reason
            )));
        }
        Ok(Self {
            master: RwLock::new(master),
            sessions: RwLock::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Create a new session for a client, returning its id
    pub fn create_session(&self, client_id: &str) -> Result<String> {
        if client_id.trim().is_empty() {
            return Err(SecurityError::SessionInvalid(
                "client_id must not be empty".to_string(),
            ));
        }

        let session_key = self
            .master
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .derive_session_key(client_id);

        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let fingerprint = session_key.fingerprint();
        let session = Session {
            session_id: session_id.clone(),
            client_id: client_id.to_string(),
            session_key,
            created_at: now,
            last_rotated_at: now,
            last_activity_at: now,
            rotation_count: 0,
        };

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));

        info!(
            session_id = %session_id,
            client_id = %client_id,
            key_fingerprint = %fingerprint,
            "Session created"
        );
        Ok(session_id)
    }

    /// Get a copy of a session's current key, touching its activity time
    pub fn get_session_key(&self, session_id: &str) -> Result<KeyMaterial> {
        self.with_session_key(session_id, |key| key.clone())
    }

    /// Run `f` with the session's key while holding the session's lock
    ///
    /// Cipher work done inside `f` is linearized with rotations on the same
    /// session; rotations on other sessions proceed concurrently.
    pub fn with_session_key<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&KeyMaterial) -> R,
    ) -> Result<R> {
        let entry = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .ok_or_else(|| SecurityError::SessionNotFound(session_id.to_string()))?;

        let mut session = entry.lock().unwrap_or_else(PoisonError::into_inner);
        session.last_activity_at = Utc::now();
        Ok(f(&session.session_key))
    }

    /// Run `f` with the master key under a shared read lock
    pub fn with_master_key<R>(&self, f: impl FnOnce(&MasterKey) -> R) -> R {
        let master = self.master.read().unwrap_or_else(PoisonError::into_inner);
        f(&master)
    }

    /// Classify the master key under exclusive access
    pub fn master_strength(&self) -> KeyStrength {
        let master = self.master.write().unwrap_or_else(PoisonError::into_inner);
        master.material().classify()
    }

    /// Derive a new key for the session, replacing the old one
    ///
    /// Prior key generations are not retained: ciphertext sealed under the
    /// old key will no longer decrypt.
    pub fn rotate_session_key(&self, session_id: &str) -> Result<()> {
        let entry = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .ok_or_else(|| SecurityError::SessionNotFound(session_id.to_string()))?;

        let new_key = self
            .master
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .derive_session_key(session_id);

        let mut session = entry.lock().unwrap_or_else(PoisonError::into_inner);
        session.session_key = new_key;
        session.rotation_count += 1;
        session.last_rotated_at = Utc::now();

        info!(
            session_id = %session_id,
            rotation_count = session.rotation_count,
            key_fingerprint = %session.session_key.fingerprint(),
            "Session key rotated"
        );
        Ok(())
    }

    /// Tear down a session explicitly
    pub fn remove_session(&self, session_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some();
        if removed {
            info!(session_id = %session_id, "Session removed");
        }
        removed
    }

    /// Remove sessions idle past `session_timeout` or whose key has outlived
    /// `max_key_age` (measured from the last rotation)
    pub fn expire_sessions(&self, now: DateTime<Utc>) -> usize {
        let idle_limit = ChronoDuration::seconds(self.config.session_timeout_secs as i64);
        let age_limit = ChronoDuration::seconds(self.config.max_key_age_secs as i64);

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|session_id, entry| {
            let session = entry.lock().unwrap_or_else(PoisonError::into_inner);
            let idle = now - session.last_activity_at;
            let key_age = now - session.last_rotated_at;
            let keep = idle <= idle_limit && key_age <= age_limit;
            if !keep {
                debug!(
                    session_id = %session_id,
                    idle_secs = idle.num_seconds(),
                    key_age_secs = key_age.num_seconds(),
                    "Session expired"
                );
            }
            keep
        });
        before - sessions.len()
    }

    /// Non-secret status snapshot for one session
    pub fn inspect(&self, session_id: &str) -> Option<SessionStatus> {
        let entry = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()?;
        let session = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some(SessionStatus {
            session_id: session.session_id.clone(),
            client_id: session.client_id.clone(),
            created_at: session.created_at,
            last_rotated_at: session.last_rotated_at,
            rotation_count: session.rotation_count,
            key_strength: session.session_key.classify(),
        })
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionKeyStore {
        SessionKeyStore::new(SecurityConfig::default()).expect("store")
    }

    #[test]
    fn test_create_session_returns_unique_ids() {
        let store = store();
        let a = store.create_session("client-a").unwrap();
        let b = store.create_session("client-a").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_create_session_rejects_empty_client_id() {
        let store = store();
        let err = store.create_session("  ").unwrap_err();
        assert_eq!(err.code(), "SESSION_INVALID");
    }

    #[test]
    fn test_get_session_key_unknown_id() {
        let store = store();
        let err = store.get_session_key("nope").unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn test_rotate_replaces_key_and_updates_metadata() {
        let store = store();
        let id = store.create_session("device-1").unwrap();
        let before = store.get_session_key(&id).unwrap();

        store.rotate_session_key(&id).unwrap();

        let after = store.get_session_key(&id).unwrap();
        assert_ne!(before.fingerprint(), after.fingerprint());

        let status = store.inspect(&id).unwrap();
        assert_eq!(status.rotation_count, 1);
        assert!(status.last_rotated_at >= status.created_at);
    }

    #[test]
    fn test_rotate_unknown_session() {
        let store = store();
        let err = store.rotate_session_key("missing").unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn test_weak_master_key_blocks_startup() {
        let weak = MasterKey::from_bytes(&[0x11u8; 32]).unwrap();
        let err = SessionKeyStore::with_master(weak, SecurityConfig::default()).unwrap_err();
        assert_eq!(err.code(), "KEY_COMPROMISED");
    }

    #[test]
    fn test_expire_by_inactivity() {
        let mut config = SecurityConfig::default();
        config.session_timeout_secs = 60;
        let store = SessionKeyStore::new(config).unwrap();
        let id = store.create_session("sleepy").unwrap();

        // Not yet idle long enough
        assert_eq!(store.expire_sessions(Utc::now()), 0);

        let later = Utc::now() + ChronoDuration::seconds(61);
        assert_eq!(store.expire_sessions(later), 1);
        assert!(store.inspect(&id).is_none());
    }

    #[test]
    fn test_expire_by_key_age() {
        let mut config = SecurityConfig::default();
        config.session_timeout_secs = 100_000;
        config.key_rotation_interval_secs = 100_000;
        config.max_key_age_secs = 100_000;
        let store = SessionKeyStore::new(config).unwrap();
        store.create_session("stale-key").unwrap();

        let later = Utc::now() + ChronoDuration::seconds(100_001);
        assert_eq!(store.expire_sessions(later), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_session() {
        let store = store();
        let id = store.create_session("gone").unwrap();
        assert!(store.remove_session(&id));
        assert!(!store.remove_session(&id));
    }

    #[test]
    fn test_session_keys_are_strong_and_distinct() {
        let store = store();
        let a = store.create_session("client-a").unwrap();
        let b = store.create_session("client-b").unwrap();

        let key_a = store.get_session_key(&a).unwrap();
        let key_b = store.get_session_key(&b).unwrap();

        assert_ne!(key_a.fingerprint(), key_b.fingerprint());
        assert!(!key_a.classify().is_weak());
        assert!(!key_b.classify().is_weak());
    }

    #[test]
    fn test_concurrent_rotation_of_distinct_sessions() {
        let store = std::sync::Arc::new(store());
        let ids: Vec<String> = (0..8)
            .map(|i| store.create_session(&format!("client-{}", i)).unwrap())
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let store = store.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store.rotate_session_key(&id).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for id in &ids {
            assert_eq!(store.inspect(id).unwrap().rotation_count, 10);
        }
    }
}
