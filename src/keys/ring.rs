//! Key ring: in-memory cache of active keys with lazy, request-driven rotation.
//!
//! There is no background scheduler: the first caller to observe an absent or
//! expired key mints its replacement. Each key class sits behind its own
//! `RwLock`; the whole check-mint-persist-install sequence runs under the
//! write lock, so racing callers serialize and exactly one key is minted per
//! expired slot.
//!
//! Encryption keys keep two generations: `current` and `previous`. When a
//! third is minted the old `previous` is deleted from the store and anything
//! sealed under it becomes permanently undecryptable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::audit::{self, AuditEvent, KeyClass};
use super::{KeyMaterial, KeyStore};
use crate::{Error, Result};

#[derive(Default)]
struct SigningSlot {
    current: Option<KeyMaterial>,
    all: HashMap<Uuid, KeyMaterial>,
}

#[derive(Default)]
struct EncryptionSlot {
    current: Option<KeyMaterial>,
    previous: Option<KeyMaterial>,
}

/// Shared cache of signing and encryption keys backed by a [`KeyStore`].
pub struct KeyRing {
    store: Arc<dyn KeyStore>,
    signing: RwLock<SigningSlot>,
    encryption: RwLock<EncryptionSlot>,
}

impl KeyRing {
    /// Build the ring from everything persisted in `store`.
    ///
    /// The signing key with the latest expiry becomes current; every signing
    /// key stays available for verification. Among encryption keys the
    /// latest becomes current and the second latest previous. Expired keys
    /// are loaded as-is and replaced on first use.
    pub fn load(store: Arc<dyn KeyStore>) -> Result<Self> {
        let all = store
            .signing_keys()
            .map_err(|e| Error::store("loading signing keys", e))?;
        let current = all.values().max_by_key(|k| k.expires_at()).cloned();
        if let Some(ref key) = current {
            audit::emit(&AuditEvent::loaded(KeyClass::Signing, key));
        }

        let mut encryption: Vec<KeyMaterial> = store
            .encryption_keys()
            .map_err(|e| Error::store("loading encryption keys", e))?
            .into_values()
            .collect();
        encryption.sort_by_key(|k| std::cmp::Reverse(k.expires_at()));
        let retained = encryption.len().min(2);
        let mut newest = encryption.into_iter();
        let current_enc = newest.next();
        let previous_enc = newest.next();
        for key in current_enc.iter().chain(previous_enc.iter()) {
            audit::emit(&AuditEvent::loaded(KeyClass::Encryption, key));
        }

        info!(
            signing_keys = all.len(),
            encryption_keys = retained,
            "Key ring loaded"
        );

        Ok(Self {
            store,
            signing: RwLock::new(SigningSlot { current, all }),
            encryption: RwLock::new(EncryptionSlot {
                current: current_enc,
                previous: previous_enc,
            }),
        })
    }

    /// The active signing key, minting and persisting a new one if the cached
    /// key is absent or no longer valid at `now`.
    ///
    /// Superseded signing keys remain in the ring so tokens they signed keep
    /// verifying until their own `exp`.
    pub fn current_signing_key(&self, now: DateTime<Utc>) -> Result<KeyMaterial> {
        if let Some(key) = self.signing.read().current.as_ref().filter(|k| k.is_valid(now)) {
            return Ok(key.clone());
        }

        let mut slot = self.signing.write();
        // Another caller may have rotated while we waited for the lock
        if let Some(key) = slot.current.as_ref().filter(|k| k.is_valid(now)) {
            return Ok(key.clone());
        }

        let key = KeyMaterial::generate(now).map_err(|e| rotation_failed(KeyClass::Signing, e))?;
        self.store.save_signing_key(&key).map_err(|e| {
            rotation_failed(KeyClass::Signing, Error::store("saving signing key", e))
        })?;

        slot.all.insert(key.id(), key.clone());
        slot.current = Some(key.clone());
        drop(slot);

        audit::emit(&AuditEvent::minted(KeyClass::Signing, &key));
        Ok(key)
    }

    /// Look up any known signing key by id.
    ///
    /// Key expiry is not checked here; a token's own `exp` decides
    /// whether it is still acceptable.
    pub fn signing_key_by_id(&self, id: Uuid) -> Result<KeyMaterial> {
        self.signing
            .read()
            .all
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(id.to_string()))
    }

    /// The active encryption key, rotating if it is absent or expired.
    ///
    /// Rotation deletes the recorded previous key from the store, saves the
    /// new key, then shifts the current key into the previous slot and
    /// installs the new one. The cache changes only after every store call
    /// has succeeded.
    ///
    /// If the delete succeeds but the save fails, the cache still serves the
    /// old previous key while the store no longer holds it. A restart before
    /// the next successful rotation loses that generation early.
    pub fn current_encryption_key(&self, now: DateTime<Utc>) -> Result<KeyMaterial> {
        if let Some(key) = self.encryption.read().current.as_ref().filter(|k| k.is_valid(now)) {
            return Ok(key.clone());
        }

        let mut slot = self.encryption.write();
        if let Some(key) = slot.current.as_ref().filter(|k| k.is_valid(now)) {
            return Ok(key.clone());
        }

        let key =
            KeyMaterial::generate(now).map_err(|e| rotation_failed(KeyClass::Encryption, e))?;

        let evicted = slot.previous.as_ref().map(KeyMaterial::id);
        if let Some(old) = evicted {
            self.store.remove_encryption_key(old).map_err(|e| {
                rotation_failed(
                    KeyClass::Encryption,
                    Error::store("removing previous encryption key", e),
                )
            })?;
        }
        self.store.save_encryption_key(&key).map_err(|e| {
            rotation_failed(KeyClass::Encryption, Error::store("saving encryption key", e))
        })?;

        slot.previous = slot.current.take();
        slot.current = Some(key.clone());
        drop(slot);

        if let Some(old) = evicted {
            audit::emit(&AuditEvent::evicted(KeyClass::Encryption, old));
        }
        audit::emit(&AuditEvent::minted(KeyClass::Encryption, &key));
        Ok(key)
    }

    /// The encryption key superseded by the most recent rotation.
    pub fn previous_encryption_key(&self) -> Result<KeyMaterial> {
        self.encryption
            .read()
            .previous
            .clone()
            .ok_or_else(|| Error::KeyNotFound("no previous encryption key".to_string()))
    }

    /// Number of signing keys available for verification.
    pub fn signing_key_count(&self) -> usize {
        self.signing.read().all.len()
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signing = self.signing.read();
        let encryption = self.encryption.read();
        f.debug_struct("KeyRing")
            .field("current_signing", &signing.current.as_ref().map(KeyMaterial::id))
            .field("signing_keys", &signing.all.len())
            .field("current_encryption", &encryption.current.as_ref().map(KeyMaterial::id))
            .field("previous_encryption", &encryption.previous.as_ref().map(KeyMaterial::id))
            .finish_non_exhaustive()
    }
}

fn rotation_failed(class: KeyClass, err: Error) -> Error {
    debug!(?class, error = %err, "Key rotation aborted");
    audit::emit(&AuditEvent::rotation_failed(class, err.to_string()));
    err
}
