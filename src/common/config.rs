//! Environment-based Configuration
//!
//! Settings come from environment variables (a `.env` file is loaded by the
//! binary through `dotenv`). Key material is only ever read from the
//! environment, never from arguments or files.
//!
//! # Environment Variables
//!
//! ## Network
//! - `UTXO_NETWORK` - "mainnet", "testnet", "signet" or "regtest" (default: "testnet")
//! - `UTXO_ESPLORA_URL` - Esplora API endpoint (default: mempool.space for the network)
//! - `UTXO_FEE_RATE` - Fee rate in sat/vB, decimals allowed (default: per network)
//!
//! ## Chain gateway
//! - `UTXO_MAX_RETRIES` - Attempts per fetch/broadcast (default: 3)
//! - `UTXO_RETRY_DELAY_MS` - Base backoff delay (default: 1000)
//! - `UTXO_HTTP_TIMEOUT_SECS` - Per-request timeout (default: 30)
//!
//! ## Keys (one of)
//! - `MNEMONIC` - BIP-39 phrase, derived at the BIP-86 path
//! - `PRIVATE_KEY` - WIF-encoded private key
//!
//! ## Logging
//! - `UTXO_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! - `UTXO_LOG_JSON` - Set to "1" for JSON output

use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::chain::gateway::RetryPolicy;
use crate::network::{Network, NetworkContext};
use crate::types::FeeRate;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("both MNEMONIC and PRIVATE_KEY are set; keep exactly one")]
    ConflictingKeys,
}

/// Where the spending key comes from
#[derive(Clone)]
pub enum KeySource {
    /// BIP-39 mnemonic phrase
    Mnemonic(String),
    /// WIF private key
    Wif(String),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Mnemonic(_) => write!(f, "Mnemonic(<redacted>)"),
            KeySource::Wif(_) => write!(f, "Wif(<redacted>)"),
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct ToolboxConfig {
    /// Network environment
    pub network: Network,

    /// Esplora API endpoint
    pub esplora_url: String,

    /// Default fee rate
    pub fee_rate: FeeRate,

    /// Attempts per gateway call
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,

    /// HTTP request timeout in seconds
    pub http_timeout_secs: u64,

    /// Spending key, if configured
    pub key_source: Option<KeySource>,

    /// Log level
    pub log_level: String,

    /// JSON log output
    pub log_json: bool,
}

impl ToolboxConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network: Network = var("UTXO_NETWORK")
            .unwrap_or_else(|| "testnet".to_string())
            .parse()?;

        let esplora_url = var("UTXO_ESPLORA_URL")
            .unwrap_or_else(|| network.default_esplora_url().to_string())
            .trim_end_matches('/')
            .to_string();

        let fee_rate = match var("UTXO_FEE_RATE") {
            Some(raw) => raw
                .parse::<FeeRate>()
                .map_err(|e| ConfigError::InvalidValue("UTXO_FEE_RATE".to_string(), e.to_string()))?,
            None => NetworkContext::new(network).default_fee_rate,
        };

        let max_retries = parse_or("UTXO_MAX_RETRIES", var("UTXO_MAX_RETRIES"), 3u32)?;
        if max_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "UTXO_MAX_RETRIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let retry_delay_ms = parse_or("UTXO_RETRY_DELAY_MS", var("UTXO_RETRY_DELAY_MS"), 1000u64)?;
        let http_timeout_secs =
            parse_or("UTXO_HTTP_TIMEOUT_SECS", var("UTXO_HTTP_TIMEOUT_SECS"), 30u64)?;

        let mnemonic = var("MNEMONIC").filter(|v| !v.trim().is_empty());
        let wif = var("PRIVATE_KEY").filter(|v| !v.trim().is_empty());
        let key_source = match (mnemonic, wif) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingKeys),
            (Some(phrase), None) => Some(KeySource::Mnemonic(phrase.trim().to_string())),
            (None, Some(key)) => Some(KeySource::Wif(key.trim().to_string())),
            (None, None) => None,
        };

        let log_level = var("UTXO_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_json = var("UTXO_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        Ok(Self {
            network,
            esplora_url,
            fee_rate,
            max_retries,
            retry_delay_ms,
            http_timeout_secs,
            key_source,
            log_level,
            log_json,
        })
    }

    /// Network parameters for component constructors
    pub fn network_context(&self) -> NetworkContext {
        NetworkContext::new(self.network)
            .with_esplora_url(&self.esplora_url)
            .with_fee_rate(self.fee_rate)
    }

    /// Retry policy for the chain gateway
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// The configured key source, or an error naming the variables to set
    pub fn require_key_source(&self) -> Result<&KeySource, ConfigError> {
        self.key_source
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("MNEMONIC or PRIVATE_KEY".to_string()))
    }

    /// Print configuration summary (hiding sensitive values)
    pub fn print_summary(&self) {
        println!("=== UTXO Toolbox Configuration ===");
        println!("Network: {}", self.network);
        println!("Esplora API: {}", self.esplora_url);
        println!("Fee Rate: {}", self.fee_rate);
        println!(
            "Retries: {} (base delay {} ms)",
            self.max_retries, self.retry_delay_ms
        );
        println!(
            "Key Source: {}",
            match &self.key_source {
                Some(KeySource::Mnemonic(_)) => "mnemonic",
                Some(KeySource::Wif(_)) => "WIF",
                None => "none (read-only)",
            }
        );
        println!("Log Level: {}", self.log_level);
        println!("==================================");
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("not a number: {}", value))
        }),
        None => Ok(default),
    }
}
