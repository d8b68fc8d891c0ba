//! Key store: persistence contract for signing and encryption keys.
//!
//! The [`KeyStore`] trait abstracts over storage backends. Keys cross this
//! boundary decrypted and ready to use; any at-rest protection is the
//! backend's concern (see [`FileKeyStore`](super::FileKeyStore)).
//!
//! Calls are synchronous and may block on I/O. The key ring holds its write
//! lock across them while rotating.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::KeyMaterial;

/// Result type for key store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Stored record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sealing or unsealing a secret at rest failed
    #[error("Sealing error: {0}")]
    Sealing(String),

    /// No key under this id
    #[error("Key not found: {0}")]
    NotFound(Uuid),

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Durable storage for signing and encryption keys.
///
/// Implementations must be `Send + Sync` because the store is shared by every
/// thread that signs or verifies tokens.
///
/// Signing keys are only ever added; tokens they signed must keep verifying.
/// The one deletion is a superseded encryption key.
pub trait KeyStore: Send + Sync + 'static {
    /// All persisted signing keys, expired ones included.
    fn signing_keys(&self) -> StoreResult<HashMap<Uuid, KeyMaterial>>;

    /// All persisted encryption keys, expired ones included.
    fn encryption_keys(&self) -> StoreResult<HashMap<Uuid, KeyMaterial>>;

    /// A single signing key.
    fn signing_key(&self, id: Uuid) -> StoreResult<KeyMaterial>;

    /// A single encryption key.
    fn encryption_key(&self, id: Uuid) -> StoreResult<KeyMaterial>;

    /// Persist a newly minted signing key.
    fn save_signing_key(&self, key: &KeyMaterial) -> StoreResult<()>;

    /// Persist a newly minted encryption key.
    fn save_encryption_key(&self, key: &KeyMaterial) -> StoreResult<()>;

    /// Delete an encryption key. Deleting an unknown id is not an error.
    fn remove_encryption_key(&self, id: Uuid) -> StoreResult<()>;
}

/// In-memory key store backed by one `DashMap` per key class.
///
/// Nothing survives the process; suitable for tests and single-process
/// deployments where every restart may invalidate outstanding tokens.
pub struct InMemoryKeyStore {
    signing: DashMap<Uuid, KeyMaterial>,
    encryption: DashMap<Uuid, KeyMaterial>,
    fail_writes: AtomicBool,
    fail_saves: AtomicBool,
}

impl InMemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signing: DashMap::new(),
            encryption: DashMap::new(),
            fail_writes: AtomicBool::new(false),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Make every subsequent save/remove fail with [`StoreError::Backend`],
    /// simulating an unavailable backend.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only saves fail; removals still go through.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_string()));
        }
        Ok(())
    }

    fn check_savable(&self) -> StoreResult<()> {
        self.check_writable()?;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("saves disabled".to_string()));
        }
        Ok(())
    }

    fn snapshot(map: &DashMap<Uuid, KeyMaterial>) -> HashMap<Uuid, KeyMaterial> {
        map.iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn signing_keys(&self) -> StoreResult<HashMap<Uuid, KeyMaterial>> {
        Ok(Self::snapshot(&self.signing))
    }

    fn encryption_keys(&self) -> StoreResult<HashMap<Uuid, KeyMaterial>> {
        Ok(Self::snapshot(&self.encryption))
    }

    fn signing_key(&self, id: Uuid) -> StoreResult<KeyMaterial> {
        self.signing
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn encryption_key(&self, id: Uuid) -> StoreResult<KeyMaterial> {
        self.encryption
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn save_signing_key(&self, key: &KeyMaterial) -> StoreResult<()> {
        self.check_savable()?;
        self.signing.insert(key.id(), key.clone());
        debug!(kid = %key.id(), "Stored signing key");
        Ok(())
    }

    fn save_encryption_key(&self, key: &KeyMaterial) -> StoreResult<()> {
        self.check_savable()?;
        self.encryption.insert(key.id(), key.clone());
        debug!(kid = %key.id(), "Stored encryption key");
        Ok(())
    }

    fn remove_encryption_key(&self, id: Uuid) -> StoreResult<()> {
        self.check_writable()?;
        self.encryption.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn make_key() -> KeyMaterial {
        KeyMaterial::generate(Utc::now()).unwrap()
    }

    #[test]
    fn save_and_list_signing_keys() {
        // GIVEN: an empty store
        let store = InMemoryKeyStore::new();
        let key = make_key();

        // WHEN: a signing key is saved
        store.save_signing_key(&key).unwrap();

        // THEN: it is listed and retrievable, and does not leak into encryption keys
        let all = store.signing_keys().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&key.id()].secret(), key.secret());
        assert_eq!(store.signing_key(key.id()).unwrap().id(), key.id());
        assert!(store.encryption_keys().unwrap().is_empty());
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = InMemoryKeyStore::new();
        let id = Uuid::new_v4();

        assert!(matches!(store.signing_key(id), Err(StoreError::NotFound(x)) if x == id));
        assert!(matches!(store.encryption_key(id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn remove_encryption_key_is_idempotent() {
        // GIVEN: a store with one encryption key
        let store = InMemoryKeyStore::new();
        let key = make_key();
        store.save_encryption_key(&key).unwrap();

        // WHEN: it is removed twice
        store.remove_encryption_key(key.id()).unwrap();
        store.remove_encryption_key(key.id()).unwrap();

        // THEN: it is gone and no error was raised
        assert!(store.encryption_keys().unwrap().is_empty());
    }

    #[test]
    fn expired_keys_are_still_listed() {
        let store = InMemoryKeyStore::new();
        let old = KeyMaterial::generate(Utc::now() - Duration::days(400)).unwrap();
        store.save_signing_key(&old).unwrap();

        assert_eq!(store.signing_keys().unwrap().len(), 1);
    }

    #[test]
    fn failing_writes_surface_backend_error() {
        let store = InMemoryKeyStore::new();
        store.set_fail_writes(true);

        let err = store.save_signing_key(&make_key()).unwrap_err();

        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.signing_keys().unwrap().is_empty());
    }

    #[test]
    fn failing_saves_still_allow_removal() {
        let store = InMemoryKeyStore::new();
        let key = make_key();
        store.save_encryption_key(&key).unwrap();
        store.set_fail_saves(true);

        assert!(matches!(
            store.save_encryption_key(&make_key()),
            Err(StoreError::Backend(_))
        ));
        store.remove_encryption_key(key.id()).unwrap();
        assert!(store.encryption_keys().unwrap().is_empty());
    }
}
