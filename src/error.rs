//! Error types for token issuance and verification

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::keys::store::StoreError;

/// Result type alias for the token core
pub type Result<T> = std::result::Result<T, Error>;

/// Token and key-rotation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token is structurally invalid (segment count, base64, header)
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// No key is known under the requested identifier
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Signature does not match the signing input
    #[error("Invalid signature")]
    InvalidSignature,

    /// Neither the current nor the previous encryption key could open the payload
    #[error("Decryption failed")]
    DecryptionFailed,

    /// The `exp` claim lies in the past
    #[error("Token has expired")]
    Expired,

    /// Payload is not well-formed JSON or a reserved claim has the wrong type
    #[error("Malformed claims: {0}")]
    MalformedClaims(String),

    /// The randomness source failed while minting a key or nonce
    #[error("Key generation failed: {0}")]
    Generation(String),

    /// A primitive rejected its inputs (e.g. an explicit key of the wrong length)
    #[error("Cryptographic failure: {0}")]
    Crypto(CryptoError),

    /// Key store failure
    #[error("Key store error while {context}: {source}")]
    Store {
        /// What the core was doing when the store failed
        context: &'static str,
        /// Underlying store error
        #[source]
        source: StoreError,
    },
}

impl Error {
    /// Wrap a key store error with context
    pub fn store(context: &'static str, source: StoreError) -> Self {
        Self::Store { context, source }
    }

    /// Whether the error means the caller presented a bad credential, as
    /// opposed to a server-side failure.
    ///
    /// HTTP layers map the former to `401` and the latter to `500`.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::KeyNotFound(_)
                | Self::InvalidSignature
                | Self::DecryptionFailed
                | Self::Expired
                | Self::MalformedClaims(_)
        )
    }
}
