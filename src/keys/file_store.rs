//! File-backed key store.
//!
//! Persists keys to disk so issued tokens survive restarts. Each key is one
//! JSON file named after its id, under `signing/` or `encryption/`. Secrets
//! are sealed at rest with AES-256-GCM under a master key supplied by
//! configuration; the master key itself is never written.
//!
//! ```text
//! <base_dir>/
//!   signing/<uuid>.json      {"id":..,"key":"<base64url sealed>","expires_at":..}
//!   encryption/<uuid>.json
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::store::{KeyStore, StoreError, StoreResult};
use super::{KEY_LEN, KeyMaterial};
use crate::crypto;

const SIGNING_DIR: &str = "signing";
const ENCRYPTION_DIR: &str = "encryption";

/// On-disk form of a key; `key` holds the sealed secret.
#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    id: Uuid,
    key: String,
    expires_at: DateTime<Utc>,
}

/// Key store persisting sealed keys as JSON files.
pub struct FileKeyStore {
    base_dir: PathBuf,
    master_key: Zeroizing<Vec<u8>>,
}

impl FileKeyStore {
    /// Open (creating if needed) a store rooted at `base_dir`.
    ///
    /// `master_key` must be exactly 32 bytes.
    pub fn new(base_dir: impl Into<PathBuf>, master_key: Vec<u8>) -> StoreResult<Self> {
        let master_key = Zeroizing::new(master_key);
        if master_key.len() != KEY_LEN {
            return Err(StoreError::Sealing(format!(
                "master key must be {KEY_LEN} bytes, got {}",
                master_key.len()
            )));
        }

        let base_dir = base_dir.into();
        for sub in [SIGNING_DIR, ENCRYPTION_DIR] {
            fs::create_dir_all(base_dir.join(sub))?;
        }
        info!(path = %base_dir.display(), "Opened file key store");

        Ok(Self {
            base_dir,
            master_key,
        })
    }

    fn key_path(&self, class_dir: &str, id: Uuid) -> PathBuf {
        self.base_dir.join(class_dir).join(format!("{id}.json"))
    }

    fn read_key(&self, path: &Path) -> StoreResult<KeyMaterial> {
        let content = fs::read_to_string(path)?;
        let record: KeyRecord = serde_json::from_str(&content)?;

        let sealed = URL_SAFE_NO_PAD
            .decode(record.key.as_bytes())
            .map_err(|e| StoreError::Sealing(format!("invalid key encoding: {e}")))?;
        let secret = crypto::open(&sealed, &self.master_key)
            .map_err(|e| StoreError::Sealing(format!("cannot unseal key {}: {e}", record.id)))?;

        Ok(KeyMaterial::new(record.id, secret, record.expires_at))
    }

    fn read_all(&self, class_dir: &str) -> StoreResult<HashMap<Uuid, KeyMaterial>> {
        let mut keys = HashMap::new();

        for entry in fs::read_dir(self.base_dir.join(class_dir))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let key = self.read_key(&path)?;
            keys.insert(key.id(), key);
        }

        debug!(class = class_dir, count = keys.len(), "Loaded keys from disk");
        Ok(keys)
    }

    fn read_one(&self, class_dir: &str, id: Uuid) -> StoreResult<KeyMaterial> {
        let path = self.key_path(class_dir, id);
        if !path.exists() {
            return Err(StoreError::NotFound(id));
        }
        self.read_key(&path)
    }

    fn write(&self, class_dir: &str, key: &KeyMaterial) -> StoreResult<()> {
        let sealed = crypto::seal(key.secret(), &self.master_key)
            .map_err(|e| StoreError::Sealing(e.to_string()))?;
        let record = KeyRecord {
            id: key.id(),
            key: URL_SAFE_NO_PAD.encode(sealed),
            expires_at: key.expires_at(),
        };
        let content = serde_json::to_string_pretty(&record)?;

        let path = self.key_path(class_dir, key.id());
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            if let Err(e) = fs::set_permissions(&tmp, perms) {
                warn!(path = %tmp.display(), error = %e, "Failed to restrict key file permissions");
            }
        }

        fs::rename(&tmp, &path)?;
        debug!(class = class_dir, kid = %key.id(), "Wrote key file");
        Ok(())
    }

    fn delete(&self, class_dir: &str, id: Uuid) -> StoreResult<()> {
        let path = self.key_path(class_dir, id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(class = class_dir, kid = %id, "Deleted key file");
        }
        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    fn signing_keys(&self) -> StoreResult<HashMap<Uuid, KeyMaterial>> {
        self.read_all(SIGNING_DIR)
    }

    fn encryption_keys(&self) -> StoreResult<HashMap<Uuid, KeyMaterial>> {
        self.read_all(ENCRYPTION_DIR)
    }

    fn signing_key(&self, id: Uuid) -> StoreResult<KeyMaterial> {
        self.read_one(SIGNING_DIR, id)
    }

    fn encryption_key(&self, id: Uuid) -> StoreResult<KeyMaterial> {
        self.read_one(ENCRYPTION_DIR, id)
    }

    fn save_signing_key(&self, key: &KeyMaterial) -> StoreResult<()> {
        self.write(SIGNING_DIR, key)
    }

    fn save_encryption_key(&self, key: &KeyMaterial) -> StoreResult<()> {
        self.write(ENCRYPTION_DIR, key)
    }

    fn remove_encryption_key(&self, id: Uuid) -> StoreResult<()> {
        self.delete(ENCRYPTION_DIR, id)
    }
}

impl std::fmt::Debug for FileKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeyStore")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: [u8; 32] = [42u8; 32];

    fn open_store(dir: &Path) -> FileKeyStore {
        FileKeyStore::new(dir, MASTER.to_vec()).unwrap()
    }

    #[test]
    fn keys_survive_reopen() {
        // GIVEN: a store with one signing and one encryption key
        let dir = tempfile::tempdir().unwrap();
        let sign = KeyMaterial::generate(Utc::now()).unwrap();
        let enc = KeyMaterial::generate(Utc::now()).unwrap();
        {
            let store = open_store(dir.path());
            store.save_signing_key(&sign).unwrap();
            store.save_encryption_key(&enc).unwrap();
        }

        // WHEN: the store is reopened
        let store = open_store(dir.path());

        // THEN: both keys load with identical secrets and expiries
        let loaded = store.signing_keys().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&sign.id()].secret(), sign.secret());
        assert_eq!(loaded[&sign.id()].expires_at(), sign.expires_at());
        assert_eq!(store.encryption_key(enc.id()).unwrap().secret(), enc.secret());
    }

    #[test]
    fn secrets_are_not_stored_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let key = KeyMaterial::generate(Utc::now()).unwrap();
        store.save_signing_key(&key).unwrap();

        let raw = fs::read_to_string(store.key_path(SIGNING_DIR, key.id())).unwrap();

        assert!(!raw.contains(&URL_SAFE_NO_PAD.encode(key.secret())));
    }

    #[test]
    fn wrong_master_key_cannot_unseal() {
        // GIVEN: a key written under one master key
        let dir = tempfile::tempdir().unwrap();
        let key = KeyMaterial::generate(Utc::now()).unwrap();
        open_store(dir.path()).save_encryption_key(&key).unwrap();

        // WHEN: the store is opened under another master key
        let other = FileKeyStore::new(dir.path(), vec![1u8; 32]).unwrap();

        // THEN: loading fails with a sealing error
        assert!(matches!(other.encryption_keys(), Err(StoreError::Sealing(_))));
    }

    #[test]
    fn short_master_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileKeyStore::new(dir.path(), vec![0u8; 16]);
        assert!(matches!(result, Err(StoreError::Sealing(_))));
    }

    #[test]
    fn remove_deletes_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let key = KeyMaterial::generate(Utc::now()).unwrap();
        store.save_encryption_key(&key).unwrap();

        store.remove_encryption_key(key.id()).unwrap();
        store.remove_encryption_key(key.id()).unwrap();

        assert!(store.encryption_keys().unwrap().is_empty());
        assert!(matches!(store.encryption_key(key.id()), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        fs::write(dir.path().join(SIGNING_DIR).join("README"), "notes").unwrap();

        assert!(store.signing_keys().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn key_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let key = KeyMaterial::generate(Utc::now()).unwrap();
        store.save_signing_key(&key).unwrap();

        let mode = fs::metadata(store.key_path(SIGNING_DIR, key.id()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
