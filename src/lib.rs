//! UTXO Toolbox - Taproot UTXO Management
//!
//! Builds, signs and broadcasts single-key Taproot transactions from the
//! outputs an Esplora explorer reports for a wallet.
//!
//! ## Pipeline
//!
//! 1. **Chain gateway** - fetches outputs and broadcasts, retrying transient failures
//! 2. **Coin selection** - largest-first accumulation until target plus fee is covered
//! 3. **Fee estimation** - linear virtual-size model
//! 4. **Transaction builder** - redeem, send, merge and split shapes
//! 5. **Signing** - BIP-341 key-path signatures, verified before use
//!
//! The [`service::UtxoService`] runs whole episodes on top of these.

pub mod builder;
pub mod chain;
pub mod common;
pub mod fee;
pub mod network;
pub mod selection;
pub mod service;
pub mod signer;
pub mod types;
pub mod wallet;

// Re-exports: errors and config
pub use common::{Result, ToolboxConfig, ToolboxError};

// Re-exports: value model
pub use types::{Amount, FeeRate, UnspentOutput, ValueError};

// Re-exports: core engine
pub use builder::{BuildError, TransactionShape, TxBuilder, UnsignedTransaction};
pub use fee::{estimate_fee, estimate_virtual_size};
pub use network::{Network, NetworkContext};
pub use selection::{select, Selection, SelectionError};
pub use signer::{sign, SignedTransaction, Signer, SignerError, SigningError, SingleKeySigner};

// Re-exports: chain access
pub use chain::{ChainDataSource, ChainGateway, EsploraClient, GatewayError, RetryPolicy, SourceError};

// Re-exports: wallets and episodes
pub use service::{BalanceSummary, EpisodeReport, UtxoService};
pub use wallet::{OwnedOutputSource, TaprootWallet, WalletError};
