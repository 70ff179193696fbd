//! Core value types: amounts, fee rates, unspent outputs, unit helpers.

pub mod amount;
pub mod units;
pub mod utxo;

pub use amount::{FeeRate, ValueError};
pub use bitcoin::Amount;
pub use utxo::{
    filter_confirmed, filter_above_value, filter_unconfirmed, group_by_value, total_balance,
    validate_utxo, BucketCounts, UnspentOutput, UtxoBuckets,
};
