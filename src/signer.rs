//! Taproot Signing
//!
//! The `Signer` trait abstracts key custody: the signing pass only ever asks
//! for a Schnorr signature over a sighash, bound to the script being spent.
//! `SingleKeySigner` holds one secret key and spends P2TR outputs through the
//! key path (BIP-86 tweak, no script tree).

use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, TapTweak, TweakedKeypair};
use bitcoin::secp256k1::{schnorr, Message, SecretKey};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::{
    consensus, taproot, Amount, Script, ScriptBuf, Transaction, TxOut, Txid, Witness,
    XOnlyPublicKey,
};
use secp256k1::SECP256K1;

use crate::builder::UnsignedTransaction;

/// Produces Schnorr signatures for Taproot key-path spends
#[cfg_attr(test, mockall::automock)]
pub trait Signer: Send + Sync {
    /// Internal (untweaked) x-only public key
    fn public_key(&self) -> XOnlyPublicKey;

    /// Sign a BIP-341 sighash for an input locked by `owner_script`
    fn sign(&self, sighash: &[u8; 32], owner_script: &Script) -> Result<[u8; 64], SignerError>;
}

/// Signer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("script is not a key-path output of this signer")]
    ScriptMismatch,

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Single-key signer
pub struct SingleKeySigner {
    keypair: Keypair,
}

impl SingleKeySigner {
    /// Create from a secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        Self {
            keypair: Keypair::from_secret_key(SECP256K1, &secret_key),
        }
    }

    /// Create from secret key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignerError> {
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Create from a seed (deterministic, for tests and throwaway keys)
    pub fn from_seed(seed: &[u8]) -> Result<Self, SignerError> {
        use sha2::{Digest, Sha256};

        let hash: [u8; 32] = Sha256::digest(seed).into();
        Self::from_bytes(&hash)
    }

    /// Key-path output script (P2TR, no script tree) for this key
    pub fn owner_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr(SECP256K1, self.public_key(), None)
    }

    fn tweaked_keypair(&self) -> TweakedKeypair {
        self.keypair.tap_tweak(SECP256K1, None)
    }
}

impl Signer for SingleKeySigner {
    fn public_key(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    fn sign(&self, sighash: &[u8; 32], owner_script: &Script) -> Result<[u8; 64], SignerError> {
        if owner_script != self.owner_script().as_script() {
            return Err(SignerError::ScriptMismatch);
        }

        let msg = Message::from_digest(*sighash);
        let keypair = self.tweaked_keypair().to_inner();
        let sig = SECP256K1.sign_schnorr_no_aux_rand(&msg, &keypair);
        Ok(sig.serialize())
    }
}

// ============================================================================
// Signing Pass
// ============================================================================

/// Signing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("signing failed at input {input_index}: {reason}")]
    SigningFailed { input_index: usize, reason: String },
}

/// A finalized, broadcastable transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub txid: Txid,
    /// Implicit fee (inputs minus outputs)
    pub fee: Amount,
}

impl SignedTransaction {
    /// Raw consensus bytes
    pub fn raw(&self) -> Vec<u8> {
        consensus::encode::serialize(&self.tx)
    }

    /// Raw transaction as lowercase hex
    pub fn to_hex(&self) -> String {
        consensus::encode::serialize_hex(&self.tx)
    }

    /// Measured virtual size
    pub fn vsize(&self) -> u64 {
        self.tx.vsize() as u64
    }
}

/// Sign every input of `unsigned` through the key path.
///
/// Each signature is checked against the output key in the input's owner
/// script before it is accepted. The first failure aborts the pass.
pub fn sign<S: Signer + ?Sized>(
    unsigned: &UnsignedTransaction,
    signer: &S,
) -> Result<SignedTransaction, SigningError> {
    let fee = unsigned.fee().map_err(|e| SigningError::SigningFailed {
        input_index: 0,
        reason: e.to_string(),
    })?;

    let mut tx = unsigned.to_transaction();
    let prevouts: Vec<TxOut> = unsigned.inputs.iter().map(|i| i.prevout()).collect();

    let witnesses = {
        let mut cache = SighashCache::new(&tx);
        let mut witnesses = Vec::with_capacity(unsigned.inputs.len());

        for (index, input) in unsigned.inputs.iter().enumerate() {
            let fail = |reason: String| SigningError::SigningFailed {
                input_index: index,
                reason,
            };

            let sighash = cache
                .taproot_key_spend_signature_hash(
                    index,
                    &Prevouts::All(&prevouts),
                    TapSighashType::Default,
                )
                .map_err(|e| fail(e.to_string()))?;
            let digest = sighash.to_byte_array();

            let sig_bytes = signer
                .sign(&digest, &input.owner_script)
                .map_err(|e| fail(e.to_string()))?;

            let signature = verify_key_spend(&digest, &sig_bytes, &input.owner_script).map_err(fail)?;

            witnesses.push(Witness::p2tr_key_spend(&taproot::Signature {
                signature,
                sighash_type: TapSighashType::Default,
            }));
        }
        witnesses
    };

    for (txin, witness) in tx.input.iter_mut().zip(witnesses) {
        txin.witness = witness;
    }

    let txid = tx.compute_txid();
    tracing::debug!(
        %txid,
        inputs = tx.input.len(),
        outputs = tx.output.len(),
        vsize = tx.vsize(),
        "transaction signed"
    );

    Ok(SignedTransaction { tx, txid, fee })
}

/// Check a signature against the output key of a P2TR script
fn verify_key_spend(
    digest: &[u8; 32],
    sig_bytes: &[u8; 64],
    owner_script: &Script,
) -> Result<schnorr::Signature, String> {
    if !owner_script.is_p2tr() {
        return Err("owner script is not P2TR".to_string());
    }
    // OP_1 OP_PUSHBYTES_32 <output key>
    let output_key = XOnlyPublicKey::from_slice(&owner_script.as_bytes()[2..34])
        .map_err(|e| format!("bad output key: {}", e))?;

    let signature = schnorr::Signature::from_slice(sig_bytes)
        .map_err(|e| format!("bad signature encoding: {}", e))?;

    SECP256K1
        .verify_schnorr(&signature, &Message::from_digest(*digest), &output_key)
        .map_err(|_| "signature does not verify against owner script".to_string())?;

    Ok(signature)
}
