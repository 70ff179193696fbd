//! Unspent Outputs
//!
//! The spendable unit handed out by the chain gateway and consumed by the
//! coin selector and transaction builders.

use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};
use serde::Serialize;
use std::cmp::Ordering;

use crate::types::amount::{self, ValueError};

/// Upper bound (exclusive) of the "small" value bucket
pub const SMALL_UTXO_THRESHOLD: Amount = Amount::from_sat(1_000);

/// Upper bound (exclusive) of the "medium" value bucket
pub const LARGE_UTXO_THRESHOLD: Amount = Amount::from_sat(100_000);

/// An unspent transaction output owned by the wallet.
///
/// Identity is the `(txid, vout)` outpoint. Instances are never mutated after
/// being fetched; they are only selected or discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnspentOutput {
    /// Transaction id and output index
    pub outpoint: OutPoint,
    /// Value in satoshis
    pub amount: Amount,
    /// Whether the creating transaction is confirmed
    pub confirmed: bool,
    /// Confirmation height, if confirmed
    pub block_height: Option<u64>,
    /// Locking script of the output
    pub script_pubkey: ScriptBuf,
}

impl UnspentOutput {
    /// Create a confirmed output
    pub fn new(txid: Txid, vout: u32, amount: Amount, script_pubkey: ScriptBuf) -> Self {
        Self {
            outpoint: OutPoint::new(txid, vout),
            amount,
            confirmed: true,
            block_height: None,
            script_pubkey,
        }
    }

    /// Set confirmation status
    pub fn with_status(mut self, confirmed: bool, block_height: Option<u64>) -> Self {
        self.confirmed = confirmed;
        self.block_height = block_height;
        self
    }

    pub fn txid(&self) -> Txid {
        self.outpoint.txid
    }

    pub fn vout(&self) -> u32 {
        self.outpoint.vout
    }
}

/// Largest amount first; equal amounts by ascending `(txid, vout)`
pub fn largest_first(a: &UnspentOutput, b: &UnspentOutput) -> Ordering {
    b.amount
        .cmp(&a.amount)
        .then_with(|| a.outpoint.cmp(&b.outpoint))
}

/// Basic sanity check for a fetched output
pub fn validate_utxo(utxo: &UnspentOutput) -> bool {
    utxo.amount > Amount::ZERO && !utxo.script_pubkey.is_empty()
}

/// Confirmed outputs only
pub fn filter_confirmed(utxos: &[UnspentOutput]) -> Vec<UnspentOutput> {
    utxos.iter().filter(|u| u.confirmed).cloned().collect()
}

/// Unconfirmed outputs only
pub fn filter_unconfirmed(utxos: &[UnspentOutput]) -> Vec<UnspentOutput> {
    utxos.iter().filter(|u| !u.confirmed).cloned().collect()
}

/// Outputs worth strictly more than `limit`
pub fn filter_above_value(utxos: &[UnspentOutput], limit: Amount) -> Vec<UnspentOutput> {
    utxos
        .iter()
        .filter(|u| u.amount > limit)
        .cloned()
        .collect()
}

/// Total value of a set of outputs
pub fn total_balance(utxos: &[UnspentOutput]) -> Result<Amount, ValueError> {
    amount::sum(utxos.iter().map(|u| u.amount))
}

/// Outputs grouped by value range
#[derive(Debug, Clone, Default)]
pub struct UtxoBuckets {
    /// Below 1,000 sats
    pub small: Vec<UnspentOutput>,
    /// 1,000 to 99,999 sats
    pub medium: Vec<UnspentOutput>,
    /// 100,000 sats and up
    pub large: Vec<UnspentOutput>,
}

impl UtxoBuckets {
    pub fn counts(&self) -> BucketCounts {
        BucketCounts {
            small: self.small.len(),
            medium: self.medium.len(),
            large: self.large.len(),
        }
    }
}

/// Bucket sizes, for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub small: usize,
    pub medium: usize,
    pub large: usize,
}

/// Split outputs into small / medium / large buckets
pub fn group_by_value(utxos: &[UnspentOutput]) -> UtxoBuckets {
    let mut buckets = UtxoBuckets::default();

    for utxo in utxos {
        if utxo.amount < SMALL_UTXO_THRESHOLD {
            buckets.small.push(utxo.clone());
        } else if utxo.amount < LARGE_UTXO_THRESHOLD {
            buckets.medium.push(utxo.clone());
        } else {
            buckets.large.push(utxo.clone());
        }
    }

    buckets
}
