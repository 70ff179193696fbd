//! Unit Conversion Utilities
//!
//! Helpers for Bitcoin unit conversions and formatting. Parsing is exact:
//! BTC strings go through `bitcoin::Denomination`, never through `f64`.

use bitcoin::{Amount, Denomination};

/// Satoshis per Bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Format as a BTC string (e.g., "0.00100000")
pub fn sats_to_btc_string(amount: Amount) -> String {
    let sats = amount.to_sat();
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

/// Convert satoshis to human-readable string
/// e.g., 100000 -> "100,000 sats (0.00100000 BTC)"
pub fn sats_to_display(amount: Amount) -> String {
    format!(
        "{} sats ({} BTC)",
        format_with_commas(amount.to_sat()),
        sats_to_btc_string(amount)
    )
}

/// Format number with thousands separators
fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Parse a BTC amount from string (at most 8 decimal places)
pub fn parse_btc(s: &str) -> Option<Amount> {
    Amount::from_str_in(s.trim(), Denomination::Bitcoin).ok()
}

/// Parse satoshi amount from string
pub fn parse_sats(s: &str) -> Option<Amount> {
    s.trim()
        .replace([',', '_'], "")
        .parse()
        .ok()
        .map(Amount::from_sat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sats_to_btc() {
        assert_eq!(sats_to_btc_string(Amount::ZERO), "0.00000000");
        assert_eq!(sats_to_btc_string(Amount::from_sat(1)), "0.00000001");
        assert_eq!(sats_to_btc_string(Amount::from_sat(100_000_000)), "1.00000000");
        assert_eq!(sats_to_btc_string(Amount::from_sat(123_456_789)), "1.23456789");
    }

    #[test]
    fn test_parse_btc() {
        assert_eq!(parse_btc("0.00000001"), Some(Amount::from_sat(1)));
        assert_eq!(parse_btc("1"), Some(Amount::from_sat(100_000_000)));
        assert_eq!(parse_btc("0.5"), Some(Amount::from_sat(50_000_000)));
        assert_eq!(parse_btc("0.000000001"), None);
    }

    #[test]
    fn test_display_format() {
        let display = sats_to_display(Amount::from_sat(1_000_000));
        assert!(display.contains("1,000,000"));
        assert!(display.contains("0.01000000 BTC"));
    }

    #[test]
    fn test_parse_sats() {
        assert_eq!(parse_sats("1000"), Some(Amount::from_sat(1000)));
        assert_eq!(parse_sats("1,000,000"), Some(Amount::from_sat(1_000_000)));
        assert_eq!(parse_sats("1_000_000"), Some(Amount::from_sat(1_000_000)));
        assert_eq!(parse_sats("  42  "), Some(Amount::from_sat(42)));
        assert_eq!(parse_sats("invalid"), None);
    }
}
