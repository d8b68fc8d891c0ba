//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Issue and verify signed or encrypted bearer tokens
#[derive(Parser, Debug)]
#[command(name = "sealed-token")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SEALED_TOKEN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "SEALED_TOKEN_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SEALED_TOKEN_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign a claim set and print the token
    Sign {
        /// Claims as a JSON object, e.g. '{"sub":"user-1"}'
        #[arg(long, default_value = "{}")]
        claims: String,

        /// Token lifetime (e.g. 30s, 15m, 1h); defaults to `tokens.default_ttl`
        #[arg(long)]
        ttl: Option<String>,

        /// Encrypt the payload (A256GCM)
        #[arg(long)]
        encrypt: bool,
    },

    /// Verify a token and print its claims as JSON
    Verify {
        /// The token to verify
        #[arg(required = true)]
        token: String,

        /// The token carries an encrypted payload
        #[arg(long)]
        encrypted: bool,
    },

    /// List persisted keys (ids and expiries only)
    Keys,
}
