//! Compact three-segment envelope: `header64.payload64.signature64`.
//!
//! Segments are unpadded base64url. The signature covers the exact bytes of
//! `header64.payload64` as they appear in the token, so parsing never
//! re-serializes anything before verification.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Signature algorithm identifier (HMAC-SHA256).
pub const ALG_HS256: &str = "HS256";
/// Payload encryption identifier (AES-256-GCM).
pub const ENC_A256GCM: &str = "A256GCM";
/// Token type.
pub const TYP_JWT: &str = "JWT";

/// Token header. Field order matches the wire layout of issued tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Signature algorithm.
    pub alg: String,
    /// Payload encryption, present only for encrypted tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,
    /// Id of the signing key, absent when signed with an explicit key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Token type. Not checked on decode.
    #[serde(default)]
    pub typ: String,
}

impl Header {
    /// Header for a signed, unencrypted token.
    #[must_use]
    pub fn plain() -> Self {
        Self {
            alg: ALG_HS256.to_string(),
            enc: None,
            kid: None,
            typ: TYP_JWT.to_string(),
        }
    }

    /// Header for a token with an AES-256-GCM encrypted payload.
    #[must_use]
    pub fn encrypted() -> Self {
        Self {
            enc: Some(ENC_A256GCM.to_string()),
            ..Self::plain()
        }
    }

    /// Whether the payload is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.enc.is_some()
    }
}

/// Base64url-encode one segment.
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A token split into its segments, borrowing from the original string.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'t> {
    token: &'t str,
    header64: &'t str,
    payload64: &'t str,
    signature64: &'t str,
}

impl<'t> Envelope<'t> {
    /// Split a token; anything other than exactly three segments is malformed.
    pub fn split(token: &'t str) -> Result<Self> {
        let mut parts = token.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(header64), Some(payload64), Some(signature64), None) => Ok(Self {
                token,
                header64,
                payload64,
                signature64,
            }),
            _ => Err(Error::MalformedToken(
                "expected three dot-separated segments".to_string(),
            )),
        }
    }

    /// The bytes covered by the signature: `header64.payload64`.
    #[must_use]
    pub fn signing_input(&self) -> &'t str {
        &self.token[..self.header64.len() + 1 + self.payload64.len()]
    }

    /// Decode and parse the header.
    pub fn header(&self) -> Result<Header> {
        let bytes = decode(self.header64, "header")?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::MalformedToken(format!("invalid header: {e}")))
    }

    /// Decode the payload segment (JSON claims or sealed ciphertext).
    pub fn payload(&self) -> Result<Vec<u8>> {
        decode(self.payload64, "payload")
    }

    /// Decode the signature segment.
    pub fn signature(&self) -> Result<Vec<u8>> {
        decode(self.signature64, "signature")
    }
}

fn decode(segment: &str, what: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| Error::MalformedToken(format!("invalid {what} encoding: {e}")))
}
