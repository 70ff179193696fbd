//! Chain Data Source
//!
//! The narrow interface the toolbox needs from a block explorer. Every
//! failure is classified by the implementation so the gateway can decide
//! whether to retry without inspecting messages.

use async_trait::async_trait;
use bitcoin::{Address, ScriptBuf, Txid};

use crate::types::UnspentOutput;

/// Classified data source failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Timeouts, connection failures, 5xx, mempool chain limits
    #[error("transient failure: {0}")]
    Transient(String),

    /// The request itself was refused (bad address, invalid transaction)
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The response could not be understood
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Block explorer access
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    /// Unspent outputs locked to `address`. No outputs is an empty list.
    async fn fetch_utxos(&self, address: &Address) -> Result<Vec<UnspentOutput>, SourceError>;

    /// Submit a raw transaction (hex), returning its txid
    async fn broadcast(&self, tx_hex: &str) -> Result<Txid, SourceError>;

    /// Raw transaction hex
    async fn get_tx_hex(&self, txid: &Txid) -> Result<String, SourceError>;

    /// Locking script of the output of `txid` paying `address`
    async fn get_script_pubkey(
        &self,
        txid: &Txid,
        address: &Address,
    ) -> Result<ScriptBuf, SourceError>;
}
