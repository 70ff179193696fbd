//! Fee Estimation
//!
//! Linear virtual-size model for single-key Taproot spends. The constants are
//! calibrated estimates, not measured per transaction:
//!
//! - input: 41 non-witness bytes + ~66 witness bytes / 4, rounded up to 68
//! - output: 8 value bytes + script length + P2TR-sized script, ~31 vbytes
//! - overhead: version, locktime, segwit marker/flag and counts, ~10 vbytes

use bitcoin::Amount;

use crate::types::{FeeRate, ValueError};

/// Estimated virtual size of one key-path input (vbytes)
pub const PER_INPUT_VBYTES: u64 = 68;

/// Estimated virtual size of one output (vbytes)
pub const PER_OUTPUT_VBYTES: u64 = 31;

/// Fixed transaction overhead (vbytes)
pub const TX_OVERHEAD_VBYTES: u64 = 10;

/// Estimate the virtual size of a transaction
pub fn estimate_virtual_size(input_count: usize, output_count: usize) -> u64 {
    input_count as u64 * PER_INPUT_VBYTES
        + output_count as u64 * PER_OUTPUT_VBYTES
        + TX_OVERHEAD_VBYTES
}

/// Estimate the fee for a transaction, rounded up to the next satoshi
pub fn estimate_fee(
    input_count: usize,
    output_count: usize,
    fee_rate: FeeRate,
) -> Result<Amount, ValueError> {
    fee_rate.fee_for_vsize(estimate_virtual_size(input_count, output_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(sat_per_vb: u64) -> FeeRate {
        FeeRate::from_sat_per_vb(sat_per_vb).unwrap()
    }

    #[test]
    fn test_virtual_size() {
        assert_eq!(estimate_virtual_size(1, 2), 68 + 62 + 10);
        assert_eq!(estimate_virtual_size(2, 2), 136 + 62 + 10);
        assert_eq!(estimate_virtual_size(0, 0), TX_OVERHEAD_VBYTES);
    }

    #[test]
    fn test_estimate_fee() {
        assert_eq!(estimate_fee(1, 2, rate(10)).unwrap().to_sat(), 1400);
        assert_eq!(estimate_fee(2, 2, rate(10)).unwrap().to_sat(), 2080);
    }

    #[test]
    fn test_fee_scales_with_inputs() {
        let fee_1 = estimate_fee(1, 2, rate(10)).unwrap();
        let fee_2 = estimate_fee(2, 2, rate(10)).unwrap();
        assert_eq!((fee_2 - fee_1).to_sat(), PER_INPUT_VBYTES * 10);
    }

    #[test]
    fn test_fractional_rate_rounds_up() {
        let half: FeeRate = "0.5".parse().unwrap();
        assert_eq!(estimate_fee(1, 0, half).unwrap().to_sat(), 39);
        // 109 vbytes * 0.5 = 54.5 -> 55

        assert_eq!(estimate_fee(1, 1, half).unwrap().to_sat(), 55);
    }
}
