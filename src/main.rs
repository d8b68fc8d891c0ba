//! sealed-token - issue and verify signed or encrypted bearer tokens

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error};

use sealed_token::{
    Error, Result,
    cli::{Cli, Command},
    clock::{Clock, SystemClock},
    config::{Config, KeyStoreBackend, parse_duration},
    keys::KeyMaterial,
    setup_tracing,
    token::Claims,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Sign {
            claims,
            ttl,
            encrypt,
        } => run_sign(&config, &claims, ttl.as_deref(), encrypt),
        Command::Verify { token, encrypted } => run_verify(&config, &token, encrypted),
        Command::Keys => run_keys(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_sign(config: &Config, claims_json: &str, ttl: Option<&str>, encrypt: bool) -> Result<()> {
    if config.key_store.backend == KeyStoreBackend::Memory {
        eprintln!("⚠️  key_store.backend is memory: tokens cannot be verified by a later run");
    }

    let clock = Arc::new(SystemClock);
    let service = config.token_service(clock.clone())?;

    let ttl = match ttl {
        Some(s) => {
            parse_duration(s).map_err(|e| Error::Config(format!("invalid --ttl {s}: {e}")))?
        }
        None => config.tokens.default_ttl,
    };
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| Error::Config(format!("ttl out of range: {e}")))?;

    let claims: Claims = serde_json::from_str(claims_json)
        .map_err(|e| Error::MalformedClaims(format!("--claims: {e}")))?;
    let claims = claims.expires_in(clock.now(), ttl)?;

    let token = if encrypt {
        service.sign_encrypted(claims, None, None)?
    } else {
        service.sign_plain(claims, None)?
    };
    debug!(issuer = service.issuer(), encrypted = encrypt, "Issued token");

    println!("{token}");
    Ok(())
}

fn run_verify(config: &Config, token: &str, encrypted: bool) -> Result<()> {
    let service = config.token_service(Arc::new(SystemClock))?;

    let claims = if encrypted {
        service.verify_encrypted(token, None, None)?
    } else {
        service.verify_plain(token, None)?
    };

    let json = serde_json::to_string_pretty(&claims)
        .map_err(|e| Error::MalformedClaims(e.to_string()))?;
    println!("{json}");
    Ok(())
}

fn run_keys(config: &Config) -> Result<()> {
    let store = config.key_store.build()?;
    let signing = store
        .signing_keys()
        .map_err(|e| Error::store("listing signing keys", e))?;
    let encryption = store
        .encryption_keys()
        .map_err(|e| Error::store("listing encryption keys", e))?;

    let now = SystemClock.now();
    if signing.is_empty() && encryption.is_empty() {
        println!("No keys persisted.");
        return Ok(());
    }

    for (label, keys) in [("signing", signing), ("encryption", encryption)] {
        let mut keys: Vec<KeyMaterial> = keys.into_values().collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.expires_at()));

        println!("{label} keys ({}):", keys.len());
        for key in &keys {
            let state = if key.is_valid(now) {
                "active"
            } else {
                "expired"
            };
            println!("  {}  expires {}  [{state}]", key.id(), key.expires_at().to_rfc3339());
        }
    }
    Ok(())
}
