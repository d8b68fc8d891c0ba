//! Sealed Token
//!
//! Compact signed and encrypted bearer tokens backed by lazily rotated
//! symmetric keys.
//!
//! # Features
//!
//! - **Signed tokens**: `header.payload.signature`, HMAC-SHA256 over the
//!   first two segments, with the signing key id carried as `kid`
//! - **Encrypted tokens**: AES-256-GCM payload, authenticated by the same HMAC
//! - **Lazy rotation**: keys are minted on first use after expiry, persisted,
//!   then installed; no scheduler required
//! - **Graceful fallback**: tokens sealed under the previous encryption key
//!   stay readable for one rotation
//! - **Pluggable storage**: in-memory or sealed files on disk via [`keys::KeyStore`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout stays clean for tokens and claims
    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| Error::Config(format!("tracing already initialised: {e}")))?;
        }
        _ => {
            subscriber
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| Error::Config(format!("tracing already initialised: {e}")))?;
        }
    }

    Ok(())
}
