//! Value Model
//!
//! Checked satoshi arithmetic and fee rates. Amounts are `bitcoin::Amount`
//! (an unsigned satoshi count); nothing in here touches floating point.

use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value arithmetic errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("negative amount: {minuend} - {subtrahend} sats")]
    NegativeAmount { minuend: u64, subtrahend: u64 },

    #[error("amount overflow")]
    Overflow,

    #[error("fee rate must be strictly positive")]
    ZeroFeeRate,

    #[error("invalid fee rate: {0}")]
    InvalidFeeRate(String),
}

/// `a + b`, failing on overflow
pub fn add(a: Amount, b: Amount) -> Result<Amount, ValueError> {
    a.checked_add(b).ok_or(ValueError::Overflow)
}

/// `a - b`, failing with `NegativeAmount` when `b > a`
pub fn subtract(a: Amount, b: Amount) -> Result<Amount, ValueError> {
    a.checked_sub(b).ok_or(ValueError::NegativeAmount {
        minuend: a.to_sat(),
        subtrahend: b.to_sat(),
    })
}

/// Sum of a sequence of amounts
pub fn sum<I>(amounts: I) -> Result<Amount, ValueError>
where
    I: IntoIterator<Item = Amount>,
{
    amounts.into_iter().try_fold(Amount::ZERO, add)
}

/// `a * n`, failing on overflow
pub fn multiply(a: Amount, n: u64) -> Result<Amount, ValueError> {
    a.checked_mul(n).ok_or(ValueError::Overflow)
}

/// Fee rate in satoshis per virtual byte.
///
/// Stored as sat/kvB so rates like `1.5 sat/vB` stay exact. Always > 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeeRate {
    sat_per_kvb: u64,
}

impl FeeRate {
    /// 1 sat/vB, the default relay floor
    pub const MIN_RELAY: FeeRate = FeeRate { sat_per_kvb: 1000 };

    /// Create from a whole sat/vB rate
    pub fn from_sat_per_vb(rate: u64) -> Result<Self, ValueError> {
        let sat_per_kvb = rate.checked_mul(1000).ok_or(ValueError::Overflow)?;
        Self::from_sat_per_kvb(sat_per_kvb)
    }

    /// Create from a sat/kvB rate
    pub fn from_sat_per_kvb(sat_per_kvb: u64) -> Result<Self, ValueError> {
        if sat_per_kvb == 0 {
            return Err(ValueError::ZeroFeeRate);
        }
        Ok(Self { sat_per_kvb })
    }

    pub fn sat_per_kvb(self) -> u64 {
        self.sat_per_kvb
    }

    /// Rate rounded up to whole sat/vB
    pub fn sat_per_vb_ceil(self) -> u64 {
        self.sat_per_kvb.div_ceil(1000)
    }

    /// Fee for `vsize` virtual bytes, rounded up to the next satoshi
    pub fn fee_for_vsize(self, vsize: u64) -> Result<Amount, ValueError> {
        let millisats = vsize
            .checked_mul(self.sat_per_kvb)
            .ok_or(ValueError::Overflow)?;
        Ok(Amount::from_sat(millisats.div_ceil(1000)))
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.sat_per_kvb / 1000;
        let frac = self.sat_per_kvb % 1000;
        if frac == 0 {
            write!(f, "{} sat/vB", whole)
        } else {
            let digits = format!("{:03}", frac);
            write!(f, "{}.{} sat/vB", whole, digits.trim_end_matches('0'))
        }
    }
}

impl FromStr for FeeRate {
    type Err = ValueError;

    /// Parses a decimal sat/vB rate with at most three fractional digits
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ValueError::InvalidFeeRate(s.to_string());

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || frac.len() > 3 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let frac: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<3}", frac).parse().map_err(|_| invalid())?
        };

        let sat_per_kvb = whole
            .checked_mul(1000)
            .and_then(|v| v.checked_add(frac))
            .ok_or(ValueError::Overflow)?;
        Self::from_sat_per_kvb(sat_per_kvb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sats(n: u64) -> Amount {
        Amount::from_sat(n)
    }

    #[test]
    fn test_subtract_negative_is_error() {
        assert_eq!(subtract(sats(1000), sats(546)).unwrap(), sats(454));
        assert_eq!(
            subtract(sats(500), sats(546)),
            Err(ValueError::NegativeAmount {
                minuend: 500,
                subtrahend: 546
            })
        );
    }

    #[test]
    fn test_sum_and_overflow() {
        assert_eq!(sum([sats(1), sats(2), sats(3)]).unwrap(), sats(6));
        assert_eq!(sum(Vec::<Amount>::new()).unwrap(), Amount::ZERO);
        assert_eq!(add(Amount::MAX, sats(1)), Err(ValueError::Overflow));
        assert_eq!(multiply(sats(3333), 3).unwrap(), sats(9999));
    }

    #[test]
    fn test_fee_rate_rounds_up() {
        let rate: FeeRate = "1.5".parse().unwrap();
        assert_eq!(rate.sat_per_kvb(), 1500);
        // 141 * 1.5 = 211.5 -> 212
        assert_eq!(rate.fee_for_vsize(141).unwrap(), sats(212));
        assert_eq!(rate.sat_per_vb_ceil(), 2);

        let whole = FeeRate::from_sat_per_vb(10).unwrap();
        assert_eq!(whole.fee_for_vsize(140).unwrap(), sats(1400));
    }

    #[test]
    fn test_fee_rate_must_be_positive() {
        assert_eq!(FeeRate::from_sat_per_vb(0), Err(ValueError::ZeroFeeRate));
        assert!("0".parse::<FeeRate>().is_err());
        assert!("abc".parse::<FeeRate>().is_err());
        assert!("1.2345".parse::<FeeRate>().is_err());
        assert!(".5".parse::<FeeRate>().is_err());
    }

    #[test]
    fn test_fee_rate_display() {
        assert_eq!(FeeRate::from_sat_per_vb(20).unwrap().to_string(), "20 sat/vB");
        assert_eq!("2.25".parse::<FeeRate>().unwrap().to_string(), "2.25 sat/vB");
    }
}
