//! Taproot Wallet
//!
//! A single-key P2TR wallet loaded from a WIF key or a BIP-39 mnemonic.
//! Builders only see it through `OwnedOutputSource`.

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::{Address, NetworkKind, PrivateKey, ScriptBuf, XOnlyPublicKey};
use secp256k1::SECP256K1;
use std::str::FromStr;

use crate::common::config::KeySource;
use crate::network::NetworkContext;
use crate::signer::{Signer, SingleKeySigner};

/// BIP-86 derivation path for the first receive address
pub const HD_PATH: &str = "m/86'/0'/0'/0/0";

/// What the transaction builders need to know about the spending wallet
pub trait OwnedOutputSource {
    /// Locking script of the wallet's outputs
    fn output_script(&self) -> ScriptBuf;

    /// Receive/change address
    fn address(&self) -> &Address;

    /// Internal x-only key
    fn public_key(&self) -> XOnlyPublicKey;
}

/// Wallet errors
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("invalid WIF private key: {0}")]
    InvalidWif(String),

    #[error("private key is for {found:?}, expected {expected:?}")]
    NetworkMismatch {
        expected: NetworkKind,
        found: NetworkKind,
    },

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),
}

/// Single-key Taproot wallet
pub struct TaprootWallet {
    signer: SingleKeySigner,
    address: Address,
}

impl TaprootWallet {
    /// Wrap an existing signer
    pub fn from_signer(signer: SingleKeySigner, ctx: &NetworkContext) -> Self {
        let address = Address::p2tr(SECP256K1, signer.public_key(), None, ctx.bitcoin_network());
        Self { signer, address }
    }

    /// Load from a WIF private key; the key's network must match `ctx`
    pub fn from_wif(wif: &str, ctx: &NetworkContext) -> Result<Self, WalletError> {
        let key = PrivateKey::from_wif(wif.trim()).map_err(|e| WalletError::InvalidWif(e.to_string()))?;

        let expected = NetworkKind::from(ctx.bitcoin_network());
        if key.network != expected {
            return Err(WalletError::NetworkMismatch {
                expected,
                found: key.network,
            });
        }

        Ok(Self::from_signer(SingleKeySigner::from_secret_key(key.inner), ctx))
    }

    /// Derive from a BIP-39 mnemonic at `HD_PATH` (empty passphrase)
    pub fn from_mnemonic(phrase: &str, ctx: &NetworkContext) -> Result<Self, WalletError> {
        let mnemonic = bip39::Mnemonic::parse_normalized(phrase.trim())
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        let seed = mnemonic.to_seed("");

        let master = Xpriv::new_master(ctx.bitcoin_network(), &seed)
            .map_err(|e| WalletError::Derivation(e.to_string()))?;
        let path =
            DerivationPath::from_str(HD_PATH).map_err(|e| WalletError::Derivation(e.to_string()))?;
        let child = master
            .derive_priv(SECP256K1, &path)
            .map_err(|e| WalletError::Derivation(e.to_string()))?;

        Ok(Self::from_signer(SingleKeySigner::from_secret_key(child.private_key), ctx))
    }

    /// Load from whichever key source is configured
    pub fn from_key_source(source: &KeySource, ctx: &NetworkContext) -> Result<Self, WalletError> {
        match source {
            KeySource::Mnemonic(phrase) => Self::from_mnemonic(phrase, ctx),
            KeySource::Wif(wif) => Self::from_wif(wif, ctx),
        }
    }

    pub fn signer(&self) -> &SingleKeySigner {
        &self.signer
    }
}

impl OwnedOutputSource for TaprootWallet {
    fn output_script(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    fn address(&self) -> &Address {
        &self.address
    }

    fn public_key(&self) -> XOnlyPublicKey {
        self.signer.public_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-86 test vector mnemonic
    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_bip86_vector() {
        let wallet = TaprootWallet::from_mnemonic(MNEMONIC, &NetworkContext::mainnet()).unwrap();
        assert_eq!(
            wallet.address().to_string(),
            "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr"
        );
        assert_eq!(
            hex::encode(wallet.public_key().serialize()),
            "cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115"
        );
    }

    #[test]
    fn test_output_script_matches_signer() {
        let wallet = TaprootWallet::from_mnemonic(MNEMONIC, &NetworkContext::testnet()).unwrap();
        assert!(wallet.address().to_string().starts_with("tb1p"));
        assert_eq!(wallet.output_script(), wallet.signer().owner_script());
    }

    #[test]
    fn test_wif_network_checked() {
        let secret = [0x11u8; 32];
        let key = PrivateKey::new(
            bitcoin::secp256k1::SecretKey::from_slice(&secret).unwrap(),
            bitcoin::Network::Testnet,
        );
        let wif = key.to_wif();

        let wallet = TaprootWallet::from_wif(&wif, &NetworkContext::testnet()).unwrap();
        let direct = TaprootWallet::from_signer(
            SingleKeySigner::from_bytes(&secret).unwrap(),
            &NetworkContext::testnet(),
        );
        assert_eq!(wallet.address(), direct.address());

        assert!(matches!(
            TaprootWallet::from_wif(&wif, &NetworkContext::mainnet()),
            Err(WalletError::NetworkMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_key_material() {
        let ctx = NetworkContext::testnet();
        assert!(matches!(
            TaprootWallet::from_wif("not-a-key", &ctx),
            Err(WalletError::InvalidWif(_))
        ));
        assert!(matches!(
            TaprootWallet::from_mnemonic("abandon abandon", &ctx),
            Err(WalletError::InvalidMnemonic(_))
        ));
        assert!(TaprootWallet::from_key_source(&KeySource::Mnemonic(MNEMONIC.into()), &ctx).is_ok());
    }
}
