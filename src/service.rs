//! UTXO Episodes
//!
//! One episode is fetch → select → build → sign → (broadcast). Nothing is
//! kept between episodes; every run starts from a fresh UTXO fetch.

use bitcoin::{Address, Amount};
use serde::Serialize;
use tracing::{info, warn};

use crate::builder::{TxBuilder, UnsignedTransaction, DEFAULT_CHANGE_SIZE, MIN_SPLIT_SIZE};
use crate::chain::{ChainDataSource, ChainGateway};
use crate::common::error::Result;
use crate::common::logging::{generate_correlation_id, log_transaction_event, TransactionLog};
use crate::fee::estimate_fee;
use crate::network::NetworkContext;
use crate::selection::{self, SelectionError};
use crate::signer::{self, SignedTransaction};
use crate::types::utxo::largest_first;
use crate::types::{
    filter_confirmed, filter_above_value, filter_unconfirmed, group_by_value, total_balance,
    validate_utxo, BucketCounts, FeeRate, UnspentOutput,
};
use crate::wallet::{OwnedOutputSource, TaprootWallet};

/// Balance of one address
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSummary {
    pub address: String,
    pub total_sats: u64,
    pub confirmed_sats: u64,
    pub unconfirmed_sats: u64,
    pub utxo_count: usize,
    pub buckets: BucketCounts,
}

/// Outcome of a spending episode
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeReport {
    pub episode_id: String,
    pub kind: &'static str,
    pub txid: String,
    pub hex: String,
    pub fee_sats: u64,
    pub vsize: u64,
    pub inputs: usize,
    pub outputs: usize,
    pub broadcast: bool,
}

/// Runs episodes against one network
pub struct UtxoService<S> {
    ctx: NetworkContext,
    gateway: ChainGateway<S>,
    builder: TxBuilder,
    fee_rate: FeeRate,
    dry_run: bool,
}

impl<S: ChainDataSource> UtxoService<S> {
    /// Service using the context's default fee rate
    pub fn new(ctx: NetworkContext, gateway: ChainGateway<S>) -> Self {
        Self {
            builder: TxBuilder::new(ctx.clone()),
            fee_rate: ctx.default_fee_rate,
            ctx,
            gateway,
            dry_run: false,
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: FeeRate) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Sign but never broadcast
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    pub fn builder(&self) -> &TxBuilder {
        &self.builder
    }

    pub fn gateway(&self) -> &ChainGateway<S> {
        &self.gateway
    }

    /// Balance and value distribution of `address`
    pub async fn balance(&self, address: &Address) -> Result<BalanceSummary> {
        let utxos = self.gateway.fetch_utxos(address).await?;
        let confirmed = filter_confirmed(&utxos);
        let unconfirmed = filter_unconfirmed(&utxos);

        Ok(BalanceSummary {
            address: address.to_string(),
            total_sats: total_balance(&utxos)?.to_sat(),
            confirmed_sats: total_balance(&confirmed)?.to_sat(),
            unconfirmed_sats: total_balance(&unconfirmed)?.to_sat(),
            utxo_count: utxos.len(),
            buckets: group_by_value(&utxos).counts(),
        })
    }

    /// Confirmed, well-formed outputs of the wallet
    pub async fn spendable(&self, wallet: &TaprootWallet) -> Result<Vec<UnspentOutput>> {
        let utxos = self.gateway.fetch_utxos(wallet.address()).await?;
        let fetched = utxos.len();

        let spendable: Vec<UnspentOutput> = filter_confirmed(&utxos)
            .into_iter()
            .filter(validate_utxo)
            .collect();

        if spendable.len() < fetched {
            info!(
                fetched,
                spendable = spendable.len(),
                "skipping unconfirmed or unusable outputs"
            );
        }
        Ok(spendable)
    }

    /// Spend the largest output back to the wallet
    pub async fn redeem(&self, wallet: &TaprootWallet) -> Result<EpisodeReport> {
        let episode_id = generate_correlation_id();
        let utxos = self.spendable(wallet).await?;
        let output = largest(&utxos)?;

        let result = self
            .builder
            .build_redeem(&output, wallet)
            .map_err(Into::into)
            .and_then(|unsigned| self.sign(&unsigned, wallet));

        self.complete(&episode_id, "redeem", result).await
    }

    /// Pay the largest output worth more than `limit` to `recipient`.
    ///
    /// The fee is the measured size of a signed redeem of the same output
    /// times the fee rate.
    pub async fn send(
        &self,
        wallet: &TaprootWallet,
        recipient: &str,
        limit: Amount,
    ) -> Result<EpisodeReport> {
        let episode_id = generate_correlation_id();
        let recipient = self.builder.validate_address(recipient)?;

        let utxos = self.spendable(wallet).await?;
        let output = largest(&filter_above_value(&utxos, limit))?;

        let result = self.size_send_fee(&output, wallet).and_then(|fee| {
            info!(episode = %episode_id, fee = fee.to_sat(), rate = %self.fee_rate, "send fee sized");
            let unsigned = self.builder.build_send(&output, wallet, fee, &recipient)?;
            self.sign(&unsigned, wallet)
        });

        self.complete(&episode_id, "send", result).await
    }

    /// Consolidate outputs into one.
    ///
    /// With a target, only as many outputs as selection needs to cover it
    /// are merged; otherwise every spendable output is.
    pub async fn merge(
        &self,
        wallet: &TaprootWallet,
        target: Option<Amount>,
    ) -> Result<EpisodeReport> {
        let episode_id = generate_correlation_id();
        let utxos = self.spendable(wallet).await?;
        if utxos.is_empty() {
            return Err(SelectionError::NoUtxosAvailable.into());
        }

        let mut chosen = match target {
            Some(target) => selection::select(&utxos, target, self.fee_rate, 1)?.chosen,
            None => utxos,
        };
        chosen.sort_by(largest_first);

        let estimated = estimate_fee(chosen.len(), 1, self.fee_rate)?;
        if estimated > DEFAULT_CHANGE_SIZE {
            warn!(
                episode = %episode_id,
                inputs = chosen.len(),
                estimated = estimated.to_sat(),
                reserve = DEFAULT_CHANGE_SIZE.to_sat(),
                "merge fee reserve is below the estimated fee"
            );
        }

        let result = self
            .builder
            .build_merge(&chosen, wallet, wallet.address())
            .map_err(Into::into)
            .and_then(|unsigned| self.sign(&unsigned, wallet));

        self.complete(&episode_id, "merge", result).await
    }

    /// Split the largest output into `count` equal outputs to the wallet
    pub async fn split(&self, wallet: &TaprootWallet, count: usize) -> Result<EpisodeReport> {
        let episode_id = generate_correlation_id();
        let utxos = self.spendable(wallet).await?;
        let output = largest(&utxos)?;

        let result = self
            .builder
            .build_even_split(&output, wallet, count, wallet.address())
            .map_err(Into::into)
            .and_then(|unsigned| {
                if let Some(first) = unsigned.outputs.first() {
                    if first.amount < MIN_SPLIT_SIZE {
                        warn!(
                            episode = %episode_id,
                            share = first.amount.to_sat(),
                            "split shares are below the recommended minimum"
                        );
                    }
                }
                self.sign(&unsigned, wallet)
            });

        self.complete(&episode_id, "split", result).await
    }

    fn sign(
        &self,
        unsigned: &UnsignedTransaction,
        wallet: &TaprootWallet,
    ) -> Result<SignedTransaction> {
        Ok(signer::sign(unsigned, wallet.signer())?)
    }

    /// Sign a throwaway redeem of `output` and price its real size
    fn size_send_fee(&self, output: &UnspentOutput, wallet: &TaprootWallet) -> Result<Amount> {
        let probe = self.builder.build_redeem(output, wallet)?;
        let signed = self.sign(&probe, wallet)?;
        Ok(self.fee_rate.fee_for_vsize(signed.vsize())?)
    }

    /// Broadcast (unless dry-run), log and report
    async fn complete(
        &self,
        episode_id: &str,
        kind: &'static str,
        signed: Result<SignedTransaction>,
    ) -> Result<EpisodeReport> {
        let outcome = match signed {
            Ok(signed) => self.publish(signed).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok((signed, broadcast)) => {
                let txid = signed.txid.to_string();
                log_transaction_event(TransactionLog {
                    kind,
                    episode_id,
                    txid: Some(&txid),
                    fee_sats: signed.fee.to_sat(),
                    inputs: signed.tx.input.len(),
                    outputs: signed.tx.output.len(),
                    broadcast,
                    error: None,
                });
                if broadcast {
                    info!(episode = %episode_id, url = %self.ctx.tx_url(&txid), "transaction broadcast");
                }

                Ok(EpisodeReport {
                    episode_id: episode_id.to_string(),
                    kind,
                    hex: signed.to_hex(),
                    fee_sats: signed.fee.to_sat(),
                    vsize: signed.vsize(),
                    inputs: signed.tx.input.len(),
                    outputs: signed.tx.output.len(),
                    broadcast,
                    txid,
                })
            }
            Err(e) => {
                let message = e.to_string();
                log_transaction_event(TransactionLog {
                    kind,
                    episode_id,
                    txid: None,
                    fee_sats: 0,
                    inputs: 0,
                    outputs: 0,
                    broadcast: false,
                    error: Some(&message),
                });
                Err(e)
            }
        }
    }

    async fn publish(&self, signed: SignedTransaction) -> Result<(SignedTransaction, bool)> {
        if self.dry_run {
            return Ok((signed, false));
        }
        self.gateway.broadcast(&signed).await?;
        Ok((signed, true))
    }
}

fn largest(utxos: &[UnspentOutput]) -> Result<UnspentOutput> {
    utxos
        .iter()
        .min_by(|a, b| largest_first(a, b))
        .cloned()
        .ok_or_else(|| SelectionError::NoUtxosAvailable.into())
}
