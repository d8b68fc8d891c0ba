//! Configuration management

use std::{env, path::Path, path::PathBuf, sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::keys::{FileKeyStore, InMemoryKeyStore, KEY_LEN, KeyRing, KeyStore};
use crate::token::{TokenPolicy, TokenService};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:` references.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Token issuer
    pub issuer: IssuerConfig,
    /// Key persistence
    pub key_store: KeyStoreConfig,
    /// Token issuance and verification policy
    pub tokens: TokenConfig,
}

/// Issuer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Domain stamped into every token as `iss = "https://<domain>"`
    pub domain: String,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
        }
    }
}

/// Where keys are persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreBackend {
    /// Process memory; keys are lost on exit
    #[default]
    Memory,
    /// Sealed JSON files on disk
    File,
}

/// Key store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Storage backend
    pub backend: KeyStoreBackend,
    /// Directory for the file backend (default `~/.sealed-token/keys`)
    pub path: Option<String>,
    /// Master key sealing secrets at rest: 32 bytes as unpadded base64url,
    /// or `env:VAR_NAME`
    pub master_key: Option<String>,
}

impl KeyStoreConfig {
    /// Resolve and decode the master key.
    pub fn resolve_master_key(&self) -> Result<Vec<u8>> {
        let raw = self.master_key.as_deref().ok_or_else(|| {
            Error::Config("key_store.master_key is required for the file backend".to_string())
        })?;

        let encoded = match raw.strip_prefix("env:") {
            Some(var_name) => env::var(var_name).map_err(|_| {
                Error::Config(format!("master key variable {var_name} is not set"))
            })?,
            None => raw.to_string(),
        };

        let key = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| Error::Config(format!("master key is not valid base64url: {e}")))?;
        if key.len() != KEY_LEN {
            return Err(Error::Config(format!(
                "master key must decode to {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(key)
    }

    /// Directory used by the file backend.
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(p) => Ok(PathBuf::from(expand_home(p))),
            None => dirs::home_dir()
                .map(|home| home.join(".sealed-token").join("keys"))
                .ok_or_else(|| Error::Config("cannot determine home directory".to_string())),
        }
    }

    /// Open the configured store.
    pub fn build(&self) -> Result<Arc<dyn KeyStore>> {
        match self.backend {
            KeyStoreBackend::Memory => Ok(Arc::new(InMemoryKeyStore::new())),
            KeyStoreBackend::File => {
                let store = FileKeyStore::new(self.resolve_path()?, self.resolve_master_key()?)
                    .map_err(|e| Error::store("opening key store", e))?;
                Ok(Arc::new(store))
            }
        }
    }
}

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Reject tokens that carry no `exp` claim
    pub require_expiry: bool,
    /// Lifetime given to tokens issued without an explicit TTL
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            require_expiry: false,
            default_ttl: Duration::from_secs(15 * 60),
        }
    }
}

impl TokenConfig {
    /// Verification policy derived from this section.
    #[must_use]
    pub const fn policy(&self) -> TokenPolicy {
        TokenPolicy {
            require_expiry: self.require_expiry,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("SEALED_TOKEN_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Must run before master_key `env:` references are resolved
        config.load_env_files();

        Ok(config)
    }

    /// Load the key ring from the configured store and wrap it in a token
    /// service.
    pub fn token_service(&self, clock: Arc<dyn Clock>) -> Result<TokenService> {
        let ring = KeyRing::load(self.key_store.build()?)?;
        Ok(TokenService::new(&self.issuer.domain, Arc::new(ring), clock)
            .with_policy(self.tokens.policy()))
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~')
        && let Some(home) = dirs::home_dir()
    {
        return path.replacen('~', &home.display().to_string(), 1);
    }
    path.to_string()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "900s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "15m", "1h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse "100ms", "30s", "15m", "1h", or bare seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    // "ms" before "s"/"m": both are suffixes of it
    let (digits, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
        let ms = ms.parse::<u64>().map_err(|e| format!("{s}: {e}"))?;
        return Ok(Duration::from_millis(ms));
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600)
    } else {
        (s, 1)
    };

    let n = digits.parse::<u64>().map_err(|e| format!("{s}: {e}"))?;
    n.checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("{s}: duration too large"))
}
