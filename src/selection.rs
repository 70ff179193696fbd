//! Coin Selection
//!
//! Greedy largest-first selection. Taking the biggest outputs first keeps the
//! input count (and so the fee) low; it can leave the wallet fragmented into
//! small outputs, which the merge episode exists to clean up.

use bitcoin::{Amount, OutPoint};
use std::collections::HashSet;

use crate::fee::estimate_fee;
use crate::types::amount::{self, ValueError};
use crate::types::utxo::largest_first;
use crate::types::{FeeRate, UnspentOutput};

/// Selection errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no UTXOs available")]
    NoUtxosAvailable,

    #[error("insufficient funds: need {required} sats, have {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("duplicate output in candidate set: {0}")]
    DuplicateOutput(OutPoint),

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Outcome of a successful selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Chosen outputs, largest first
    pub chosen: Vec<UnspentOutput>,
    /// Sum of the chosen outputs
    pub total: Amount,
    /// Estimated fee for `chosen.len()` inputs
    pub fee: Amount,
}

impl Selection {
    /// Value left over after target and fee
    pub fn excess(&self, target: Amount) -> Result<Amount, ValueError> {
        amount::subtract(self.total, amount::add(target, self.fee)?)
    }
}

/// Select outputs covering `target` plus the fee for spending them.
///
/// The order of `available` does not matter: candidates are sorted by
/// descending amount with ties broken by ascending `(txid, vout)`.
pub fn select(
    available: &[UnspentOutput],
    target: Amount,
    fee_rate: FeeRate,
    output_count: usize,
) -> Result<Selection, SelectionError> {
    if available.is_empty() {
        return Err(SelectionError::NoUtxosAvailable);
    }

    let mut seen = HashSet::with_capacity(available.len());
    for utxo in available {
        if !seen.insert(utxo.outpoint) {
            return Err(SelectionError::DuplicateOutput(utxo.outpoint));
        }
    }

    let mut sorted: Vec<&UnspentOutput> = available.iter().collect();
    sorted.sort_by(|a, b| largest_first(a, b));

    let mut chosen: Vec<UnspentOutput> = Vec::new();
    let mut total = Amount::ZERO;
    let mut fee = Amount::ZERO;

    for utxo in sorted {
        chosen.push(utxo.clone());
        total = amount::add(total, utxo.amount)?;
        fee = estimate_fee(chosen.len(), output_count, fee_rate)?;

        if total >= amount::add(target, fee)? {
            tracing::debug!(
                inputs = chosen.len(),
                total = total.to_sat(),
                fee = fee.to_sat(),
                target = target.to_sat(),
                "selection satisfied"
            );
            return Ok(Selection { chosen, total, fee });
        }
    }

    Err(SelectionError::InsufficientFunds {
        required: amount::add(target, fee)?.to_sat(),
        available: total.to_sat(),
    })
}
