//! Token claims: reserved fields plus an open extension bag.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::{Error, Result};

/// Claim names with typed fields on [`Claims`].
pub const RESERVED_CLAIMS: [&str; 3] = ["iss", "iat", "exp"];

/// Claims carried in a token payload.
///
/// `iat` and `exp` are integer unix seconds; any other JSON representation
/// (floats, strings, `null`) fails to decode. Only an absent key means
/// "unset". Every other claim lands in `extra` unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer, stamped by the token service on signing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Issued-at (unix seconds).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "unix_seconds"
    )]
    pub iat: Option<i64>,
    /// Expiry (unix seconds). Absent means the token never expires unless
    /// the verifier's policy requires it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "unix_seconds"
    )]
    pub exp: Option<i64>,
    /// All other claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a custom claim. Reserved names are ignored; use the typed
    /// setters for those.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if RESERVED_CLAIMS.contains(&name.as_str()) {
            warn!(claim = %name, "Ignoring reserved claim set as custom claim");
            return self;
        }
        self.extra.insert(name, value.into());
        self
    }

    /// Set the `sub` claim.
    #[must_use]
    pub fn subject(self, sub: impl Into<String>) -> Self {
        self.with("sub", sub.into())
    }

    /// Expire at an absolute instant.
    #[must_use]
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.exp = Some(at.timestamp());
        self
    }

    /// Expire `ttl` after `now`.
    ///
    /// Fails with [`Error::MalformedClaims`] if the expiry falls outside the
    /// representable time range.
    pub fn expires_in(self, now: DateTime<Utc>, ttl: Duration) -> Result<Self> {
        let at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::MalformedClaims(format!("expiry out of range: now + {ttl}")))?;
        Ok(self.expires_at(at))
    }

    /// Look up a custom claim.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// The `sub` claim, if it is a string.
    #[must_use]
    pub fn sub(&self) -> Option<&str> {
        self.get("sub").and_then(Value::as_str)
    }

    /// Whether `exp` lies strictly before `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.exp.is_some_and(|exp| exp < now.timestamp())
    }
}

/// A present reserved timestamp must be an integer; `null` is not "unset".
fn unix_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    i64::deserialize(deserializer).map(Some)
}
