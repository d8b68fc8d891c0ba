//! Symmetric key material and its rotation.
//!
//! # Architecture
//!
//! ```text
//! TokenService
//!   -> KeyRing (cache + lazy rotation, one RwLock per key class)
//!        -> KeyStore (durable storage: in-memory or sealed files)
//! ```
//!
//! Keys are minted on demand by [`KeyRing`] when the active key is absent or
//! expired, written through the [`KeyStore`], and only then installed in the
//! cache. A key is never mutated after creation; rotation swaps references.

pub mod audit;
pub mod file_store;
pub mod ring;
pub mod store;

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;
use crate::{Error, Result};

pub use file_store::FileKeyStore;
pub use ring::KeyRing;
pub use store::{InMemoryKeyStore, KeyStore, StoreError};

/// Length of every secret in bytes (AES-256 / HMAC-SHA256 key size).
pub const KEY_LEN: usize = 32;

/// Fixed rotation horizon for freshly minted keys.
pub const KEY_LIFETIME_DAYS: i64 = 182;

/// Raw secret bytes, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct Secret(Vec<u8>);

/// An identified symmetric secret with an expiry.
#[derive(Clone)]
pub struct KeyMaterial {
    id: Uuid,
    secret: Secret,
    expires_at: DateTime<Utc>,
}

impl KeyMaterial {
    /// Assemble key material loaded from storage.
    #[must_use]
    pub fn new(id: Uuid, secret: Vec<u8>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            secret: Secret(secret),
            expires_at,
        }
    }

    /// Mint a fresh key: 32 random bytes from the OS, a new UUID v4, and an
    /// expiry [`KEY_LIFETIME_DAYS`] after `now`.
    pub fn generate(now: DateTime<Utc>) -> Result<Self> {
        let mut secret = vec![0u8; KEY_LEN];
        crypto::fill_random(&mut secret).map_err(|e| Error::Generation(e.to_string()))?;

        Ok(Self {
            id: Uuid::new_v4(),
            secret: Secret(secret),
            expires_at: now + Duration::days(KEY_LIFETIME_DAYS),
        })
    }

    /// Key identifier, embedded in token headers as `kid`.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Secret bytes.
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret.0
    }

    /// Instant after which the key is no longer valid for new work.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// A key is usable iff its id is non-nil, its secret non-empty, and its
    /// expiry strictly after `now`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.id.is_nil() && !self.secret.0.is_empty() && self.expires_at > now
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("secret", &format_args!("[redacted; {} bytes]", self.secret.0.len()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_is_valid_for_182_days() {
        // GIVEN: a fixed instant
        let now = Utc::now();

        // WHEN: a key is minted
        let key = KeyMaterial::generate(now).unwrap();

        // THEN: it has a full-length secret and the fixed horizon
        assert_eq!(key.secret().len(), KEY_LEN);
        assert!(!key.id().is_nil());
        assert_eq!(key.expires_at(), now + Duration::days(182));
        assert!(key.is_valid(now));
        assert!(key.is_valid(now + Duration::days(181)));
    }

    #[test]
    fn key_is_invalid_at_exact_expiry() {
        let now = Utc::now();
        let key = KeyMaterial::new(Uuid::new_v4(), vec![1; KEY_LEN], now);

        // Expiry must be strictly in the future
        assert!(!key.is_valid(now));
        assert!(key.is_valid(now - Duration::seconds(1)));
    }

    #[test]
    fn nil_id_or_empty_secret_is_invalid() {
        let later = Utc::now() + Duration::days(1);
        let now = Utc::now();

        assert!(!KeyMaterial::new(Uuid::nil(), vec![1; KEY_LEN], later).is_valid(now));
        assert!(!KeyMaterial::new(Uuid::new_v4(), Vec::new(), later).is_valid(now));
    }

    #[test]
    fn generated_keys_are_distinct() {
        let now = Utc::now();
        let a = KeyMaterial::generate(now).unwrap();
        let b = KeyMaterial::generate(now).unwrap();

        assert_ne!(a.id(), b.id());
        assert_ne!(a.secret(), b.secret());
    }

    #[test]
    fn debug_redacts_secret() {
        let key = KeyMaterial::new(Uuid::new_v4(), vec![0xAB; KEY_LEN], Utc::now());
        let rendered = format!("{key:?}");

        assert!(rendered.contains("redacted; 32 bytes"));
        assert!(!rendered.contains("171, 171"));
    }
}
