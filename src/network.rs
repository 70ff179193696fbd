//! Network Context
//!
//! Explicit, read-only network parameters handed to every component
//! constructor. There is no process-wide "current network".

use std::fmt;
use std::str::FromStr;

use crate::common::config::ConfigError;
use crate::types::FeeRate;

/// Default Esplora endpoint for Bitcoin mainnet.
pub const MAINNET_ESPLORA: &str = "https://mempool.space/api";

/// Default Esplora endpoint for Bitcoin testnet.
pub const TESTNET_ESPLORA: &str = "https://mempool.space/testnet/api";

/// Default Esplora endpoint for Bitcoin signet.
pub const SIGNET_ESPLORA: &str = "https://mempool.space/signet/api";

/// Default Esplora endpoint for a local regtest stack.
pub const REGTEST_ESPLORA: &str = "http://127.0.0.1:3002";

/// Supported Bitcoin networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    /// Convert to the `bitcoin` crate's `Network` type.
    pub fn to_bitcoin_network(self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }

    /// Default Esplora API for this network
    pub fn default_esplora_url(self) -> &'static str {
        match self {
            Network::Mainnet => MAINNET_ESPLORA,
            Network::Testnet => TESTNET_ESPLORA,
            Network::Signet => SIGNET_ESPLORA,
            Network::Regtest => REGTEST_ESPLORA,
        }
    }

    /// Default fee rate in sat/vB
    pub fn default_fee_rate(self) -> u64 {
        match self {
            Network::Mainnet => 10,
            Network::Testnet | Network::Signet => 20,
            Network::Regtest => 1,
        }
    }

    /// Block explorer base URL (for printing links)
    pub fn explorer_url(self) -> &'static str {
        match self {
            Network::Mainnet => "https://mempool.space",
            Network::Testnet => "https://mempool.space/testnet",
            Network::Signet => "https://mempool.space/signet",
            Network::Regtest => "http://127.0.0.1:3002",
        }
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(ConfigError::InvalidValue(
                "UTXO_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Signet => write!(f, "signet"),
            Network::Regtest => write!(f, "regtest"),
        }
    }
}

/// Network parameters shared read-only by every component of an episode
#[derive(Debug, Clone)]
pub struct NetworkContext {
    pub network: Network,
    /// Esplora API base URL, without trailing slash
    pub esplora_url: String,
    /// Fee rate used when the caller does not give one
    pub default_fee_rate: FeeRate,
}

impl NetworkContext {
    /// Context with the network's default endpoint and fee rate
    pub fn new(network: Network) -> Self {
        Self {
            network,
            esplora_url: network.default_esplora_url().to_string(),
            default_fee_rate: default_rate(network),
        }
    }

    pub fn mainnet() -> Self {
        Self::new(Network::Mainnet)
    }

    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    /// Override the Esplora endpoint
    pub fn with_esplora_url(mut self, url: &str) -> Self {
        self.esplora_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Override the default fee rate
    pub fn with_fee_rate(mut self, fee_rate: FeeRate) -> Self {
        self.default_fee_rate = fee_rate;
        self
    }

    pub fn bitcoin_network(&self) -> bitcoin::Network {
        self.network.to_bitcoin_network()
    }

    /// Explorer link for a transaction
    pub fn tx_url(&self, txid: &str) -> String {
        format!("{}/tx/{}", self.network.explorer_url(), txid)
    }
}

fn default_rate(network: Network) -> FeeRate {
    // every network default is a positive constant
    FeeRate::from_sat_per_vb(network.default_fee_rate()).unwrap_or(FeeRate::MIN_RELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("TESTNET".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("signet".parse::<Network>().unwrap(), Network::Signet);
        assert!("litecoin".parse::<Network>().is_err());
    }

    #[test]
    fn test_bitcoin_network_mapping() {
        assert_eq!(Network::Mainnet.to_bitcoin_network(), bitcoin::Network::Bitcoin);
        assert_eq!(Network::Testnet.to_bitcoin_network(), bitcoin::Network::Testnet);
        assert_eq!(Network::Regtest.to_bitcoin_network(), bitcoin::Network::Regtest);
    }

    #[test]
    fn test_context_defaults() {
        let ctx = NetworkContext::testnet();
        assert_eq!(ctx.esplora_url, TESTNET_ESPLORA);
        assert_eq!(ctx.default_fee_rate, FeeRate::from_sat_per_vb(20).unwrap());

        let ctx = NetworkContext::mainnet().with_esplora_url("http://localhost:3000/");
        assert_eq!(ctx.esplora_url, "http://localhost:3000");
        assert_eq!(ctx.default_fee_rate.sat_per_vb_ceil(), 10);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Network::Mainnet.to_string(), "mainnet");
        assert_eq!(Network::Signet.to_string(), "signet");
    }
}
