//! Token issuance and verification.
//!
//! [`TokenService`] signs claims into the compact envelope described in
//! [`envelope`] and verifies them again. Two flavours share the same wire
//! format:
//!
//! 1. **Plain**: the payload is base64url JSON, authenticated by HMAC-SHA256.
//! 2. **Encrypted**: the payload is AES-256-GCM ciphertext (`enc: "A256GCM"`)
//!    and the HMAC covers the ciphertext.
//!
//! Keys come from the [`KeyRing`] unless the caller passes one explicitly.
//! Ring-signed tokens carry the signing key id as `kid`, so tokens signed by
//! any historical key still verify. Encrypted tokens that the current
//! encryption key cannot open are retried once with the previous key, which
//! keeps in-flight tokens readable across a single rotation.

pub mod claims;
pub mod envelope;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::{self, CryptoError, NONCE_LEN};
use crate::keys::KeyRing;
use crate::{Error, Result};

pub use claims::Claims;
pub use envelope::{ALG_HS256, ENC_A256GCM, Envelope, Header};

/// Verification policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenPolicy {
    /// Reject tokens without an `exp` claim instead of treating them as
    /// never expiring.
    pub require_expiry: bool,
}

/// Signs and verifies tokens against a shared [`KeyRing`].
pub struct TokenService {
    issuer: String,
    keys: Arc<KeyRing>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
}

impl TokenService {
    /// Create a service issuing tokens for `domain` (stamped as
    /// `iss = "https://<domain>"`).
    #[must_use]
    pub fn new(domain: &str, keys: Arc<KeyRing>, clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer: format!("https://{domain}"),
            keys,
            clock,
            policy: TokenPolicy::default(),
        }
    }

    /// Replace the verification policy.
    #[must_use]
    pub fn with_policy(mut self, policy: TokenPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Issuer stamped into every token.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The underlying key ring.
    #[must_use]
    pub fn key_ring(&self) -> &KeyRing {
        &self.keys
    }

    /// Sign `claims` as a plain token.
    ///
    /// Uses `signing_key` if given (no `kid` is emitted), otherwise the
    /// ring's current signing key.
    pub fn sign_plain(&self, claims: Claims, signing_key: Option<&[u8]>) -> Result<String> {
        let now = self.clock.now();
        let payload = self.encode_claims(claims, now)?;
        self.seal_envelope(Header::plain(), &payload, signing_key, now)
    }

    /// Verify a plain token and return its claims.
    pub fn verify_plain(&self, token: &str, signing_key: Option<&[u8]>) -> Result<Claims> {
        let now = self.clock.now();
        let (header, envelope) = self.open_envelope(token, signing_key)?;
        if header.is_encrypted() {
            return Err(Error::MalformedToken(
                "encrypted token presented for plain verification".to_string(),
            ));
        }

        let claims = decode_claims(&envelope.payload()?)?;
        self.check_expiry(&claims, now)?;
        Ok(claims)
    }

    /// Sign `claims` with an encrypted payload.
    ///
    /// Uses `encryption_key` if given, otherwise the ring's current
    /// encryption key; the signing key is resolved as in [`Self::sign_plain`].
    pub fn sign_encrypted(
        &self,
        claims: Claims,
        encryption_key: Option<&[u8]>,
        signing_key: Option<&[u8]>,
    ) -> Result<String> {
        let now = self.clock.now();
        let payload = self.encode_claims(claims, now)?;

        let sealed = match explicit(encryption_key) {
            Some(key) => crypto::seal(&payload, key),
            None => crypto::seal(&payload, self.keys.current_encryption_key(now)?.secret()),
        }
        .map_err(seal_error)?;

        self.seal_envelope(Header::encrypted(), &sealed, signing_key, now)
    }

    /// Verify an encrypted token and return its decrypted claims.
    ///
    /// With no explicit `encryption_key`, decryption tries the ring's current
    /// key and then, once, the previous key. If both fail the error from the
    /// current key is returned.
    pub fn verify_encrypted(
        &self,
        token: &str,
        encryption_key: Option<&[u8]>,
        signing_key: Option<&[u8]>,
    ) -> Result<Claims> {
        let now = self.clock.now();
        let (header, envelope) = self.open_envelope(token, signing_key)?;
        if header.enc.as_deref() != Some(ENC_A256GCM) {
            return Err(Error::MalformedToken(format!(
                "unsupported payload encryption: {:?}",
                header.enc
            )));
        }

        let sealed = envelope.payload()?;
        if sealed.len() < NONCE_LEN {
            return Err(Error::MalformedToken(
                "ciphertext shorter than nonce".to_string(),
            ));
        }

        let plaintext = match explicit(encryption_key) {
            Some(key) => crypto::open(&sealed, key).map_err(open_error)?,
            None => self.open_with_ring(&sealed, now)?,
        };

        let claims = decode_claims(&plaintext)?;
        self.check_expiry(&claims, now)?;
        Ok(claims)
    }

    fn encode_claims(&self, mut claims: Claims, now: DateTime<Utc>) -> Result<Vec<u8>> {
        claims.iss = Some(self.issuer.clone());
        claims.iat.get_or_insert(now.timestamp());
        serde_json::to_vec(&claims).map_err(|e| Error::MalformedClaims(e.to_string()))
    }

    /// Build `header64.payload64.signature64`.
    fn seal_envelope(
        &self,
        mut header: Header,
        payload: &[u8],
        signing_key: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let ring_key;
        let secret = if let Some(key) = explicit(signing_key) {
            key
        } else {
            ring_key = self.keys.current_signing_key(now)?;
            header.kid = Some(ring_key.id().to_string());
            ring_key.secret()
        };

        let header_json =
            serde_json::to_vec(&header).map_err(|e| Error::MalformedToken(e.to_string()))?;
        let signing_input = format!(
            "{}.{}",
            envelope::encode_segment(&header_json),
            envelope::encode_segment(payload)
        );
        let signature = crypto::sign(signing_input.as_bytes(), secret).map_err(Error::Crypto)?;

        debug!(kid = ?header.kid, encrypted = header.is_encrypted(), "Signed token");
        Ok(format!("{signing_input}.{}", envelope::encode_segment(&signature)))
    }

    /// Split the token, resolve the signing key, and check the signature.
    fn open_envelope<'t>(
        &self,
        token: &'t str,
        signing_key: Option<&[u8]>,
    ) -> Result<(Header, Envelope<'t>)> {
        let envelope = Envelope::split(token)?;
        let header = envelope.header()?;
        if header.alg != ALG_HS256 {
            return Err(Error::MalformedToken(format!(
                "unsupported algorithm: {}",
                header.alg
            )));
        }

        let ring_key;
        let secret = if let Some(key) = explicit(signing_key) {
            key
        } else {
            let kid = header
                .kid
                .as_deref()
                .ok_or_else(|| Error::MalformedToken("missing kid".to_string()))?;
            let id = Uuid::parse_str(kid)
                .map_err(|e| Error::MalformedToken(format!("invalid kid: {e}")))?;
            ring_key = self.keys.signing_key_by_id(id)?;
            ring_key.secret()
        };

        // An undecodable signature can never match
        let signature = envelope.signature().map_err(|_| Error::InvalidSignature)?;
        if !crypto::verify(envelope.signing_input().as_bytes(), &signature, secret) {
            return Err(Error::InvalidSignature);
        }

        Ok((header, envelope))
    }

    fn open_with_ring(&self, sealed: &[u8], now: DateTime<Utc>) -> Result<Vec<u8>> {
        let current = self.keys.current_encryption_key(now)?;
        let original = match crypto::open(sealed, current.secret()) {
            Ok(plaintext) => return Ok(plaintext),
            Err(e) => e,
        };

        let Ok(previous) = self.keys.previous_encryption_key() else {
            return Err(open_error(original));
        };
        let plaintext =
            crypto::open(sealed, previous.secret()).map_err(|_| open_error(original))?;

        debug!(kid = %previous.id(), "Decrypted token with previous encryption key");
        Ok(plaintext)
    }

    fn check_expiry(&self, claims: &Claims, now: DateTime<Utc>) -> Result<()> {
        match claims.exp {
            Some(_) if claims.is_expired(now) => Err(Error::Expired),
            None if self.policy.require_expiry => {
                Err(Error::MalformedClaims("missing exp claim".to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("keys", &self.keys)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// An empty explicit key means "use the ring".
fn explicit(key: Option<&[u8]>) -> Option<&[u8]> {
    key.filter(|k| !k.is_empty())
}

fn decode_claims(payload: &[u8]) -> Result<Claims> {
    serde_json::from_slice(payload).map_err(|e| Error::MalformedClaims(e.to_string()))
}

fn seal_error(e: CryptoError) -> Error {
    match e {
        CryptoError::Rng(msg) => Error::Generation(msg),
        other => Error::Crypto(other),
    }
}

fn open_error(e: CryptoError) -> Error {
    match e {
        CryptoError::Aead => Error::DecryptionFailed,
        CryptoError::Truncated => Error::MalformedToken(e.to_string()),
        other => Error::Crypto(other),
    }
}
