//! Audit logging for key lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with the event serialized as
//! JSON in the `audit` field, so the trail is queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `key.loaded` | The key ring selected a persisted key at startup |
//! | `key.minted` | A new key was generated and persisted |
//! | `key.evicted` | A superseded encryption key was deleted from the store |
//! | `key.rotation_failed` | Minting or persisting a replacement key failed |

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::KeyMaterial;

/// Which slot of the key ring an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyClass {
    /// HMAC signing keys
    Signing,
    /// AEAD encryption keys
    Encryption,
}

/// Structured audit event for a key lifecycle transition.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"key.minted"`).
    pub event: &'static str,
    /// Key class.
    pub class: KeyClass,
    /// Affected key id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<Uuid>,
    /// Expiry of the affected key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Human-readable reason for failure events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Construct a `key.loaded` event.
    #[must_use]
    pub fn loaded(class: KeyClass, key: &KeyMaterial) -> Self {
        Self {
            event: "key.loaded",
            class,
            kid: Some(key.id()),
            expires_at: Some(key.expires_at()),
            reason: None,
        }
    }

    /// Construct a `key.minted` event.
    #[must_use]
    pub fn minted(class: KeyClass, key: &KeyMaterial) -> Self {
        Self {
            event: "key.minted",
            class,
            kid: Some(key.id()),
            expires_at: Some(key.expires_at()),
            reason: None,
        }
    }

    /// Construct a `key.evicted` event.
    #[must_use]
    pub fn evicted(class: KeyClass, kid: Uuid) -> Self {
        Self {
            event: "key.evicted",
            class,
            kid: Some(kid),
            expires_at: None,
            reason: None,
        }
    }

    /// Construct a `key.rotation_failed` event.
    #[must_use]
    pub fn rotation_failed(class: KeyClass, reason: impl Into<String>) -> Self {
        Self {
            event: "key.rotation_failed",
            class,
            kid: None,
            expires_at: None,
            reason: Some(reason.into()),
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO sealed_token::keys::audit audit={"event":"key.minted","class":"signing",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "key audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_event_serializes_kid_and_class() {
        // GIVEN: a fresh key
        let key = KeyMaterial::generate(Utc::now()).unwrap();

        // WHEN: build and serialize a minted event
        let event = AuditEvent::minted(KeyClass::Encryption, &key);
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        // THEN: fields are present, secret is not
        assert_eq!(json["event"], "key.minted");
        assert_eq!(json["class"], "encryption");
        assert_eq!(json["kid"], key.id().to_string());
        assert!(json.get("reason").is_none());
        assert!(!json.to_string().contains("secret"));
    }

    #[test]
    fn failure_event_carries_reason_only() {
        let event = AuditEvent::rotation_failed(KeyClass::Signing, "store offline");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "key.rotation_failed");
        assert_eq!(json["reason"], "store offline");
        assert!(json.get("kid").is_none());
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&AuditEvent::evicted(KeyClass::Encryption, Uuid::new_v4()));
    }
}
