//! Common Error Types for the UTXO Toolbox
//!
//! Every module has its own error enum; this rolls them up for callers that
//! drive whole episodes (the service and the CLI).

use thiserror::Error;

use crate::builder::BuildError;
use crate::chain::{GatewayError, SourceError};
use crate::selection::SelectionError;
use crate::signer::{SignerError, SigningError};
use crate::types::ValueError;
use crate::wallet::WalletError;

/// Root error type for the toolbox
#[derive(Debug, Error)]
pub enum ToolboxError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Amount arithmetic
    #[error(transparent)]
    Value(#[from] ValueError),

    /// Coin selection
    #[error("selection failed: {0}")]
    Selection(#[from] SelectionError),

    /// Transaction shape validation
    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    /// Signing pass
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Key material
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),

    /// Wallet construction
    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    /// Chain access after retries
    #[error("chain error: {0}")]
    Gateway(#[from] GatewayError),

    /// Raw data source failure (explorer extras bypass the gateway)
    #[error("data source error: {0}")]
    Source(#[from] SourceError),
}

impl ToolboxError {
    /// Only chain unavailability is worth retrying at the episode level
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolboxError::Gateway(GatewayError::ChainUnavailable { .. }) => true,
            ToolboxError::Source(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Internal faults that indicate a bug rather than bad input
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolboxError::Build(BuildError::InvariantViolation(_)))
    }

    /// Stable error code for reports and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            ToolboxError::Config(_) => "CONFIG_ERROR",
            ToolboxError::Logging(_) => "LOGGING_ERROR",
            ToolboxError::Value(ValueError::NegativeAmount { .. }) => "NEGATIVE_AMOUNT",
            ToolboxError::Value(_) => "VALUE_ERROR",
            ToolboxError::Selection(e) => match e {
                SelectionError::NoUtxosAvailable => "NO_UTXOS_AVAILABLE",
                SelectionError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
                SelectionError::DuplicateOutput(_) => "DUPLICATE_OUTPUT",
                SelectionError::Value(_) => "VALUE_ERROR",
            },
            ToolboxError::Build(e) => match e {
                BuildError::Value(_) => "VALUE_ERROR",
                BuildError::DustOutput { .. } => "DUST_OUTPUT",
                BuildError::InvalidFee(_) => "INVALID_FEE",
                BuildError::InvalidSplitCount { .. } => "INVALID_SPLIT_COUNT",
                BuildError::NoUtxosAvailable => "NO_UTXOS_AVAILABLE",
                BuildError::DuplicateOutput(_) => "DUPLICATE_OUTPUT",
                BuildError::TooManyInputs { .. } | BuildError::TooManyOutputs { .. } => {
                    "TOO_LARGE"
                }
                BuildError::InvalidAddress(_) => "INVALID_ADDRESS",
                BuildError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            },
            ToolboxError::Signing(_) => "SIGNING_FAILED",
            ToolboxError::Signer(_) => "SIGNER_ERROR",
            ToolboxError::Wallet(_) => "WALLET_ERROR",
            ToolboxError::Gateway(e) => match e {
                GatewayError::ChainUnavailable { .. } => "CHAIN_UNAVAILABLE",
                GatewayError::MalformedResponse(_) => "MALFORMED_RESPONSE",
                GatewayError::Rejected(_) => "REJECTED",
                GatewayError::WaitTimedOut { .. } => "WAIT_TIMEOUT",
            },
            ToolboxError::Source(_) => "DATA_SOURCE_ERROR",
        }
    }
}

/// Result type alias using ToolboxError
pub type Result<T> = std::result::Result<T, ToolboxError>;
