//! Transaction Builder
//!
//! Turns selected outputs into unsigned transactions of one of four shapes:
//!
//! | Shape  | Inputs | Outputs                                   |
//! |--------|--------|-------------------------------------------|
//! | redeem | 1      | 1 to the owner, `amount - 546`            |
//! | send   | 1      | 1 to a recipient, `amount - fee`          |
//! | merge  | N      | 1 to the change address, `sum - 546`      |
//! | split  | 1      | `count` equal shares plus optional change |
//!
//! Everything here is pure. Value and shape violations are reported before
//! any signing or network call.

use bitcoin::{
    absolute::LockTime, address::NetworkUnchecked, transaction::Version, Address, Amount,
    ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use std::collections::HashSet;

use crate::network::NetworkContext;
use crate::types::amount::{self, ValueError};
use crate::types::UnspentOutput;
use crate::wallet::OwnedOutputSource;

/// Smallest output value the builders will create (sats)
pub const DUST_LIMIT: Amount = Amount::from_sat(546);

/// Fixed fee reserve deducted by redeem, merge and split
pub const DEFAULT_CHANGE_SIZE: Amount = Amount::from_sat(546);

/// Largest split fan-out
pub const MAX_SPLIT_COUNT: usize = 100;

/// Smallest share worth splitting into; advisory, not enforced by `build_split`
pub const MIN_SPLIT_SIZE: Amount = Amount::from_sat(1_000);

pub const MAX_INPUTS: usize = 1_000;
pub const MAX_OUTPUTS: usize = 1_000;

/// Builder errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("output of {amount} is below the dust limit of {limit}")]
    DustOutput { amount: Amount, limit: Amount },

    #[error("invalid fee: {0}")]
    InvalidFee(String),

    #[error("invalid split count {count}, must be 1..={max}")]
    InvalidSplitCount { count: usize, max: usize },

    #[error("no UTXOs to spend")]
    NoUtxosAvailable,

    #[error("output {0} appears more than once")]
    DuplicateOutput(bitcoin::OutPoint),

    #[error("too many inputs: {count} > {max}")]
    TooManyInputs { count: usize, max: usize },

    #[error("too many outputs: {count} > {max}")]
    TooManyOutputs { count: usize, max: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

/// The four supported transaction shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionShape {
    Redeem { change_size: Amount },
    Send { fee: Amount, recipient: Address },
    Merge { change: Address },
    Split { count: usize, change: Address },
}

impl TransactionShape {
    pub fn name(&self) -> &'static str {
        match self {
            TransactionShape::Redeem { .. } => "redeem",
            TransactionShape::Send { .. } => "send",
            TransactionShape::Merge { .. } => "merge",
            TransactionShape::Split { .. } => "split",
        }
    }
}

/// An input together with the script that locks it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedInput {
    pub utxo: UnspentOutput,
    pub owner_script: ScriptBuf,
}

impl UnsignedInput {
    /// The spent output as committed to by the sighash
    pub fn prevout(&self) -> TxOut {
        TxOut {
            value: self.utxo.amount,
            script_pubkey: self.owner_script.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedOutput {
    pub address: Address,
    pub amount: Amount,
}

/// Unsigned transaction template.
///
/// Always satisfies `sum(inputs) >= sum(outputs)`; the difference is the fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub shape: TransactionShape,
    pub inputs: Vec<UnsignedInput>,
    pub outputs: Vec<UnsignedOutput>,
}

impl UnsignedTransaction {
    pub fn input_total(&self) -> Result<Amount, ValueError> {
        amount::sum(self.inputs.iter().map(|i| i.utxo.amount))
    }

    pub fn output_total(&self) -> Result<Amount, ValueError> {
        amount::sum(self.outputs.iter().map(|o| o.amount))
    }

    /// Implicit fee
    pub fn fee(&self) -> Result<Amount, ValueError> {
        amount::subtract(self.input_total()?, self.output_total()?)
    }

    /// Consensus transaction with empty witnesses
    pub fn to_transaction(&self) -> Transaction {
        let input = self
            .inputs
            .iter()
            .map(|i| TxIn {
                previous_output: i.utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect();

        let output = self
            .outputs
            .iter()
            .map(|o| TxOut {
                value: o.amount,
                script_pubkey: o.address.script_pubkey(),
            })
            .collect();

        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        }
    }
}

/// Builds unsigned transactions for one network
pub struct TxBuilder {
    ctx: NetworkContext,
}

impl TxBuilder {
    pub fn new(ctx: NetworkContext) -> Self {
        Self { ctx }
    }

    pub fn network(&self) -> &NetworkContext {
        &self.ctx
    }

    /// Parse an address and require it to belong to this network
    pub fn validate_address(&self, address: &str) -> Result<Address, BuildError> {
        address
            .trim()
            .parse::<Address<NetworkUnchecked>>()
            .map_err(|e| BuildError::InvalidAddress(e.to_string()))?
            .require_network(self.ctx.bitcoin_network())
            .map_err(|e| BuildError::InvalidAddress(e.to_string()))
    }

    /// Spend one output back to the owner, less the fixed fee reserve
    pub fn build_redeem<O: OwnedOutputSource + ?Sized>(
        &self,
        output: &UnspentOutput,
        owner: &O,
    ) -> Result<UnsignedTransaction, BuildError> {
        let destination = self.check_address(owner.address())?;
        let value = amount::subtract(output.amount, DEFAULT_CHANGE_SIZE)?;
        check_dust(value)?;

        self.finish(
            TransactionShape::Redeem {
                change_size: DEFAULT_CHANGE_SIZE,
            },
            vec![input(output, owner)],
            vec![UnsignedOutput {
                address: destination,
                amount: value,
            }],
        )
    }

    /// Spend one output to `recipient`, paying exactly `fee`
    pub fn build_send<O: OwnedOutputSource + ?Sized>(
        &self,
        output: &UnspentOutput,
        owner: &O,
        fee: Amount,
        recipient: &Address,
    ) -> Result<UnsignedTransaction, BuildError> {
        if fee == Amount::ZERO {
            return Err(BuildError::InvalidFee("fee must be positive".to_string()));
        }
        if fee >= output.amount {
            return Err(BuildError::InvalidFee(format!(
                "fee {} consumes the whole output of {}",
                fee, output.amount
            )));
        }

        let recipient = self.check_address(recipient)?;
        let value = amount::subtract(output.amount, fee)?;
        check_dust(value)?;

        self.finish(
            TransactionShape::Send {
                fee,
                recipient: recipient.clone(),
            },
            vec![input(output, owner)],
            vec![UnsignedOutput {
                address: recipient,
                amount: value,
            }],
        )
    }

    /// Consolidate `outputs` into a single output to `change`
    pub fn build_merge<O: OwnedOutputSource + ?Sized>(
        &self,
        outputs: &[UnspentOutput],
        owner: &O,
        change: &Address,
    ) -> Result<UnsignedTransaction, BuildError> {
        if outputs.is_empty() {
            return Err(BuildError::NoUtxosAvailable);
        }
        if outputs.len() > MAX_INPUTS {
            return Err(BuildError::TooManyInputs {
                count: outputs.len(),
                max: MAX_INPUTS,
            });
        }

        let mut seen = HashSet::with_capacity(outputs.len());
        for utxo in outputs {
            if !seen.insert(utxo.outpoint) {
                return Err(BuildError::DuplicateOutput(utxo.outpoint));
            }
        }

        let change = self.check_address(change)?;
        let total = amount::sum(outputs.iter().map(|u| u.amount))?;
        let value = amount::subtract(total, DEFAULT_CHANGE_SIZE)?;
        check_dust(value)?;

        self.finish(
            TransactionShape::Merge {
                change: change.clone(),
            },
            outputs.iter().map(|u| input(u, owner)).collect(),
            vec![UnsignedOutput {
                address: change,
                amount: value,
            }],
        )
    }

    /// Split one output into `count` equal shares to `change`.
    ///
    /// What is left after the shares and the fee reserve becomes one more
    /// output when it reaches the dust limit; otherwise it goes to the fee.
    ///
    /// Succeeds only when the floor-division leftover covers the fee reserve.
    /// The leftover is always below `count`, and `MAX_SPLIT_COUNT` is below
    /// `DEFAULT_CHANGE_SIZE`, so with the current constants this always
    /// returns `InvalidFee`. Use [`TxBuilder::build_even_split`] to split.
    pub fn build_split<O: OwnedOutputSource + ?Sized>(
        &self,
        output: &UnspentOutput,
        owner: &O,
        count: usize,
        change: &Address,
    ) -> Result<UnsignedTransaction, BuildError> {
        if count == 0 || count > MAX_SPLIT_COUNT {
            return Err(BuildError::InvalidSplitCount {
                count,
                max: MAX_SPLIT_COUNT,
            });
        }

        let change = self.check_address(change)?;
        let share = Amount::from_sat(output.amount.to_sat() / count as u64);
        check_dust(share)?;

        let shares_total = amount::multiply(share, count as u64)?;
        let leftover = amount::subtract(output.amount, shares_total)?;
        let remainder = amount::subtract(leftover, DEFAULT_CHANGE_SIZE).map_err(|_| {
            BuildError::InvalidFee(format!(
                "splitting {} into {} x {} leaves {} for a fee reserve of {}",
                output.amount, count, share, leftover, DEFAULT_CHANGE_SIZE
            ))
        })?;

        let mut outputs = shares(&change, share, count);
        if remainder >= DUST_LIMIT {
            outputs.push(UnsignedOutput {
                address: change.clone(),
                amount: remainder,
            });
        }

        self.finish(
            TransactionShape::Split { count, change },
            vec![input(output, owner)],
            outputs,
        )
    }

    /// Split one output into `count` equal shares after setting aside the
    /// fee reserve. Rounding leftovers join the fee, so there is never a
    /// remainder output.
    pub fn build_even_split<O: OwnedOutputSource + ?Sized>(
        &self,
        output: &UnspentOutput,
        owner: &O,
        count: usize,
        change: &Address,
    ) -> Result<UnsignedTransaction, BuildError> {
        if count == 0 || count > MAX_SPLIT_COUNT {
            return Err(BuildError::InvalidSplitCount {
                count,
                max: MAX_SPLIT_COUNT,
            });
        }

        let change = self.check_address(change)?;
        let spendable = amount::subtract(output.amount, DEFAULT_CHANGE_SIZE)?;
        let share = Amount::from_sat(spendable.to_sat() / count as u64);
        check_dust(share)?;

        let outputs = shares(&change, share, count);
        self.finish(
            TransactionShape::Split { count, change },
            vec![input(output, owner)],
            outputs,
        )
    }

    fn check_address(&self, address: &Address) -> Result<Address, BuildError> {
        self.validate_address(&address.to_string())
    }

    fn finish(
        &self,
        shape: TransactionShape,
        inputs: Vec<UnsignedInput>,
        outputs: Vec<UnsignedOutput>,
    ) -> Result<UnsignedTransaction, BuildError> {
        if outputs.len() > MAX_OUTPUTS {
            return Err(BuildError::TooManyOutputs {
                count: outputs.len(),
                max: MAX_OUTPUTS,
            });
        }

        let tx = UnsignedTransaction {
            shape,
            inputs,
            outputs,
        };

        let fee = tx.fee().map_err(|e| {
            BuildError::InvariantViolation(format!("{} transaction: {}", tx.shape.name(), e))
        })?;

        tracing::debug!(
            shape = tx.shape.name(),
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            fee = fee.to_sat(),
            "built unsigned transaction"
        );

        Ok(tx)
    }
}

fn input<O: OwnedOutputSource + ?Sized>(utxo: &UnspentOutput, owner: &O) -> UnsignedInput {
    UnsignedInput {
        utxo: utxo.clone(),
        owner_script: owner.output_script(),
    }
}

fn shares(address: &Address, share: Amount, count: usize) -> Vec<UnsignedOutput> {
    (0..count)
        .map(|_| UnsignedOutput {
            address: address.clone(),
            amount: share,
        })
        .collect()
}

fn check_dust(value: Amount) -> Result<(), BuildError> {
    if value < DUST_LIMIT {
        return Err(BuildError::DustOutput {
            amount: value,
            limit: DUST_LIMIT,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::SingleKeySigner;
    use crate::wallet::TaprootWallet;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn wallet() -> TaprootWallet {
        TaprootWallet::from_signer(
            SingleKeySigner::from_seed(b"builder tests").unwrap(),
            &NetworkContext::testnet(),
        )
    }

    fn builder() -> TxBuilder {
        TxBuilder::new(NetworkContext::testnet())
    }

    fn utxo(tag: u8, sats: u64) -> UnspentOutput {
        UnspentOutput::new(
            Txid::from_byte_array([tag; 32]),
            0,
            Amount::from_sat(sats),
            wallet().output_script(),
        )
    }

    fn recipient() -> Address {
        let other = TaprootWallet::from_signer(
            SingleKeySigner::from_seed(b"recipient").unwrap(),
            &NetworkContext::testnet(),
        );
        other.address().clone()
    }

    fn amounts(tx: &UnsignedTransaction) -> Vec<u64> {
        tx.outputs.iter().map(|o| o.amount.to_sat()).collect()
    }

    #[test]
    fn test_redeem() {
        let wallet = wallet();
        let tx = builder().build_redeem(&utxo(1, 10_000), &wallet).unwrap();

        assert_eq!(amounts(&tx), vec![9_454]);
        assert_eq!(tx.outputs[0].address, *wallet.address());
        assert_eq!(tx.fee().unwrap(), DEFAULT_CHANGE_SIZE);
        assert_eq!(tx.inputs[0].owner_script, wallet.output_script());
    }

    #[test]
    fn test_redeem_dust() {
        let err = builder().build_redeem(&utxo(1, 1_000), &wallet()).unwrap_err();
        assert_eq!(
            err,
            BuildError::DustOutput {
                amount: Amount::from_sat(454),
                limit: DUST_LIMIT
            }
        );

        // cannot even cover the reserve
        let err = builder().build_redeem(&utxo(1, 500), &wallet()).unwrap_err();
        assert!(matches!(err, BuildError::Value(ValueError::NegativeAmount { .. })));
    }

    #[test]
    fn test_send() {
        let tx = builder()
            .build_send(&utxo(1, 50_000), &wallet(), Amount::from_sat(1_200), &recipient())
            .unwrap();

        assert_eq!(amounts(&tx), vec![48_800]);
        assert_eq!(tx.outputs[0].address, recipient());
        assert_eq!(tx.fee().unwrap().to_sat(), 1_200);
    }

    #[test]
    fn test_send_fee_validation() {
        let b = builder();
        let w = wallet();
        let out = utxo(1, 5_000);

        assert!(matches!(
            b.build_send(&out, &w, Amount::ZERO, &recipient()),
            Err(BuildError::InvalidFee(_))
        ));
        assert!(matches!(
            b.build_send(&out, &w, Amount::from_sat(5_000), &recipient()),
            Err(BuildError::InvalidFee(_))
        ));
        assert!(matches!(
            b.build_send(&out, &w, Amount::from_sat(4_600), &recipient()),
            Err(BuildError::DustOutput { .. })
        ));
    }

    #[test]
    fn test_send_rejects_other_network() {
        let mainnet = TaprootWallet::from_signer(
            SingleKeySigner::from_seed(b"recipient").unwrap(),
            &NetworkContext::mainnet(),
        );
        let err = builder()
            .build_send(&utxo(1, 50_000), &wallet(), Amount::from_sat(500), mainnet.address())
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidAddress(_)));
    }

    #[test]
    fn test_merge() {
        let wallet = wallet();
        let outputs = vec![utxo(1, 20_000), utxo(2, 7_000), utxo(3, 600)];
        let tx = builder()
            .build_merge(&outputs, &wallet, wallet.address())
            .unwrap();

        assert_eq!(tx.inputs.len(), 3);
        assert_eq!(amounts(&tx), vec![27_600 - 546]);
        assert_eq!(tx.fee().unwrap(), DEFAULT_CHANGE_SIZE);
    }

    #[test]
    fn test_merge_validation() {
        let wallet = wallet();
        let b = builder();

        assert_eq!(
            b.build_merge(&[], &wallet, wallet.address()),
            Err(BuildError::NoUtxosAvailable)
        );
        assert!(matches!(
            b.build_merge(&[utxo(1, 5_000), utxo(1, 5_000)], &wallet, wallet.address()),
            Err(BuildError::DuplicateOutput(_))
        ));
        assert!(matches!(
            b.build_merge(&[utxo(1, 600), utxo(2, 400)], &wallet, wallet.address()),
            Err(BuildError::DustOutput { .. })
        ));
    }

    #[test]
    fn test_split_leftover_short_of_reserve() {
        let wallet = wallet();
        // 3 x 3333 leaves 1 sat against a 546 sat reserve
        let err = builder()
            .build_split(&utxo(1, 10_000), &wallet, 3, wallet.address())
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidFee(_)));
    }

    #[test]
    fn test_split_never_covers_reserve() {
        let wallet = wallet();
        let b = builder();

        for sats in [60_000, 100_000, 123_457, 1_000_000] {
            for count in 1..=MAX_SPLIT_COUNT {
                let result = b.build_split(&utxo(1, sats), &wallet, count, wallet.address());
                assert!(
                    matches!(result, Err(BuildError::InvalidFee(_))),
                    "{sats} sats into {count}"
                );
            }
        }
    }

    #[test]
    fn test_split_validation() {
        let wallet = wallet();
        let b = builder();

        for count in [0, MAX_SPLIT_COUNT + 1] {
            assert_eq!(
                b.build_split(&utxo(1, 1_000_000), &wallet, count, wallet.address()),
                Err(BuildError::InvalidSplitCount {
                    count,
                    max: MAX_SPLIT_COUNT
                })
            );
        }
        assert_eq!(
            b.build_split(&utxo(1, 1_000), &wallet, 2, wallet.address()),
            Err(BuildError::DustOutput {
                amount: Amount::from_sat(500),
                limit: DUST_LIMIT
            })
        );
    }

    #[test]
    fn test_even_split() {
        let wallet = wallet();
        let tx = builder()
            .build_even_split(&utxo(1, 10_000), &wallet, 3, wallet.address())
            .unwrap();

        // (10000 - 546) / 3 = 3151, rounding dust joins the fee
        assert_eq!(amounts(&tx), vec![3_151, 3_151, 3_151]);
        assert_eq!(tx.fee().unwrap().to_sat(), 547);
        assert!(matches!(tx.shape, TransactionShape::Split { count: 3, .. }));

        let tx = builder()
            .build_even_split(&utxo(2, 100_000), &wallet, MAX_SPLIT_COUNT, wallet.address())
            .unwrap();
        assert_eq!(tx.outputs.len(), 100);
        assert!(tx.outputs.iter().all(|o| o.amount.to_sat() == 994));
        assert_eq!(tx.fee().unwrap().to_sat(), 600);
    }

    #[test]
    fn test_even_split_dust() {
        let wallet = wallet();
        assert!(matches!(
            builder().build_even_split(&utxo(1, 1_500), &wallet, 2, wallet.address()),
            Err(BuildError::DustOutput { .. })
        ));
    }

    #[test]
    fn test_builders_are_deterministic() {
        let wallet = wallet();
        let outputs = vec![utxo(3, 9_000), utxo(1, 12_000), utxo(2, 5_000)];

        let a = builder().build_merge(&outputs, &wallet, wallet.address()).unwrap();
        let b = builder().build_merge(&outputs, &wallet, wallet.address()).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            bitcoin::consensus::encode::serialize(&a.to_transaction()),
            bitcoin::consensus::encode::serialize(&b.to_transaction())
        );
    }

    #[test]
    fn test_validate_address() {
        let b = builder();
        let addr = recipient().to_string();
        assert_eq!(b.validate_address(&addr).unwrap().to_string(), addr);
        assert!(matches!(
            b.validate_address("bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr"),
            Err(BuildError::InvalidAddress(_))
        ));
        assert!(matches!(
            b.validate_address("definitely not an address"),
            Err(BuildError::InvalidAddress(_))
        ));
    }
}
