//! Configuration for CommunityPatch
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::auth::{KeyFamily, KeyRing, KeySource, TokenError, MIN_SECRET_LEN};

/// CommunityPatch - hosting for community Jamf patch definitions
#[derive(Parser, Debug, Clone)]
#[command(name = "communitypatch-worker")]
#[command(about = "Background sweeps for the CommunityPatch definition service")]
pub struct Args {
    /// Public domain; tokens are issued by `contributors.<domain>` for `api.<domain>`
    #[arg(long, env = "DOMAIN_NAME", default_value = "communitypatch.local")]
    pub domain_name: String,

    /// Enable development mode (in-memory catalog fallback, dev signing key)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Shared secret for HS256 tokens (at least 32 characters)
    #[arg(long, env = "TOKEN_SECRET")]
    pub token_secret: Option<String>,

    /// PEM file holding the RS256 signing key
    #[arg(long, env = "TOKEN_PRIVATE_KEY_PATH")]
    pub token_private_key_path: Option<PathBuf>,

    /// PEM file holding the RS256 verification key
    #[arg(long, env = "TOKEN_PUBLIC_KEY_PATH")]
    pub token_public_key_path: Option<PathBuf>,

    /// Default API token lifetime in days
    #[arg(long, env = "TOKEN_TTL_DAYS", default_value = "365")]
    pub token_ttl_days: u32,

    /// Keep accepting HS256 tokens once an RSA key pair is configured
    #[arg(long, env = "ACCEPT_LEGACY_TOKENS", default_value = "true", action = ArgAction::Set)]
    pub accept_legacy_tokens: bool,

    /// Upper bound on a single store call in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "3000")]
    pub store_timeout_ms: u64,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "communitypatch")]
    pub mongodb_db: String,

    /// MongoDB collection holding catalog records
    #[arg(long, env = "MONGODB_COLLECTION", default_value = "catalog")]
    pub mongodb_collection: String,

    /// Directory holding definition blobs
    #[arg(long, env = "BLOB_ROOT", default_value = "./data/definitions")]
    pub blob_root: PathBuf,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Subject the email worker consumes
    #[arg(long, env = "EMAIL_TOPIC", default_value = "communitypatch.email")]
    pub email_topic: String,

    /// Seconds between subscription sync sweeps (0 disables)
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value = "900")]
    pub sync_interval_secs: u64,

    /// Seconds between reconciliation sweeps (0 disables)
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value = "3600")]
    pub reconcile_interval_secs: u64,

    /// Timeout for one definition fetch in milliseconds
    #[arg(long, env = "FETCH_TIMEOUT_MS", default_value = "3000")]
    pub fetch_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.token_ttl_days) * 24 * 60 * 60)
    }

    pub fn has_key_pair(&self) -> bool {
        self.token_private_key_path.is_some() && self.token_public_key_path.is_some()
    }

    /// Key family every token must belong to, if pinned
    pub fn required_family(&self) -> Option<KeyFamily> {
        if self.has_key_pair() && !self.accept_legacy_tokens {
            Some(KeyFamily::Asymmetric)
        } else {
            None
        }
    }

    /// Build the key ring (dev key when nothing is configured in dev mode)
    pub fn key_ring(&self) -> Result<KeyRing, TokenError> {
        let private = self.token_private_key_path.clone().map(KeySource::File);
        let public = self.token_public_key_path.clone().map(KeySource::File);
        if self.dev_mode && self.token_secret.is_none() && public.is_none() {
            return Ok(KeyRing::new_dev());
        }
        KeyRing::new(self.token_secret.clone(), private, public)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Some(secret) = &self.token_secret {
            if secret.len() < MIN_SECRET_LEN {
                return Err(format!(
                    "TOKEN_SECRET must be at least {} characters",
                    MIN_SECRET_LEN
                ));
            }
        }

        if !self.dev_mode && self.token_secret.is_none() && !self.has_key_pair() {
            return Err(
                "TOKEN_SECRET or an RSA key pair (TOKEN_PRIVATE_KEY_PATH, TOKEN_PUBLIC_KEY_PATH) is required in production mode"
                    .to_string(),
            );
        }

        if self.token_private_key_path.is_some() != self.token_public_key_path.is_some() {
            return Err(
                "TOKEN_PRIVATE_KEY_PATH and TOKEN_PUBLIC_KEY_PATH must be set together".to_string(),
            );
        }

        if self.token_ttl_days == 0 || self.token_ttl_days > 365 {
            return Err("TOKEN_TTL_DAYS must be between 1 and 365".to_string());
        }

        if self.store_timeout_ms == 0 || self.fetch_timeout_ms == 0 {
            return Err("STORE_TIMEOUT_MS and FETCH_TIMEOUT_MS must be positive".to_string());
        }

        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(format!("Unknown LOG_FORMAT '{}'", self.log_format));
        }

        Ok(())
    }
}
