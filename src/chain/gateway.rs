//! Chain Gateway
//!
//! Retry/backoff wrapper around a `ChainDataSource`. Only failures the source
//! classified as transient are retried; the wait before attempt `n + 1` is
//! `base_delay * n`. Waits can be cut short through a shutdown channel.

use bitcoin::{Address, ScriptBuf, Txid};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::source::{ChainDataSource, SourceError};
use crate::common::logging::{log_chain_event, ChainCall};
use crate::signer::SignedTransaction;
use crate::types::UnspentOutput;

/// Broadcast rejections meaning the node already has this transaction
const ALREADY_KNOWN: &[&str] = &[
    "txn-already-known",
    "txn-already-in-mempool",
    "transaction already in block chain",
];

/// Gateway errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("chain unavailable after {attempts} attempt(s)")]
    ChainUnavailable { attempts: u32 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("no outputs at {address} after {waited_ms} ms")]
    WaitTimedOut { address: String, waited_ms: u64 },
}

/// Retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, at least 1
    pub max_retries: u32,
    /// Delay unit; grows linearly with the attempt number
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Retrying access to a chain data source
pub struct ChainGateway<S> {
    source: S,
    policy: RetryPolicy,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<S: ChainDataSource> ChainGateway<S> {
    pub fn new(source: S, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            shutdown: None,
        }
    }

    /// Abort pending backoff waits once `true` is sent on the channel
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Spendable outputs of `address`
    pub async fn fetch_utxos(&self, address: &Address) -> Result<Vec<UnspentOutput>, GatewayError> {
        let target = address.to_string();
        self.with_retry("fetch_utxos", &target, move || self.source.fetch_utxos(address))
            .await
    }

    /// Poll `address` every `poll` until it has outputs, for at most `timeout`.
    ///
    /// Calls that stay unavailable after their retries only cost a poll;
    /// rejections and malformed payloads end the wait.
    pub async fn wait_for_utxos(
        &self,
        address: &Address,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Vec<UnspentOutput>, GatewayError> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            match self.fetch_utxos(address).await {
                Ok(utxos) if !utxos.is_empty() => {
                    info!(%address, polls, count = utxos.len(), "outputs appeared");
                    return Ok(utxos);
                }
                Ok(_) => debug!(%address, polls, "no outputs yet"),
                Err(GatewayError::ChainUnavailable { attempts }) => {
                    warn!(%address, polls, attempts, "chain unavailable while waiting for outputs")
                }
                Err(e) => return Err(e),
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(GatewayError::WaitTimedOut {
                    address: address.to_string(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }

            if !self.backoff(poll.min(timeout - elapsed)).await {
                warn!(%address, polls, "wait for outputs cancelled by shutdown");
                return Err(GatewayError::ChainUnavailable { attempts: polls });
            }
        }
    }

    /// Broadcast a signed transaction, returning the txid the network reports.
    ///
    /// An "already known" rejection counts as success once the explorer
    /// serves the signed txid; an earlier attempt got through.
    pub async fn broadcast(&self, signed: &SignedTransaction) -> Result<Txid, GatewayError> {
        let hex = signed.to_hex();
        let hex = hex.as_str();
        let target = signed.txid.to_string();
        let txid = match self
            .with_retry("broadcast", &target, move || self.source.broadcast(hex))
            .await
        {
            Ok(txid) => txid,
            Err(GatewayError::Rejected(msg)) if ALREADY_KNOWN.iter().any(|r| msg.contains(r)) => {
                if self.get_tx_hex(&signed.txid).await.is_err() {
                    return Err(GatewayError::Rejected(msg));
                }
                info!(txid = %signed.txid, "transaction already known to the network");
                signed.txid
            }
            Err(e) => return Err(e),
        };

        if txid != signed.txid {
            return Err(GatewayError::MalformedResponse(format!(
                "broadcast returned {} for {}",
                txid, signed.txid
            )));
        }
        Ok(txid)
    }

    /// Raw transaction hex
    pub async fn get_tx_hex(&self, txid: &Txid) -> Result<String, GatewayError> {
        let target = txid.to_string();
        self.with_retry("get_tx_hex", &target, move || self.source.get_tx_hex(txid))
            .await
    }

    /// Locking script of the output of `txid` paying `address`
    pub async fn get_script_pubkey(
        &self,
        txid: &Txid,
        address: &Address,
    ) -> Result<ScriptBuf, GatewayError> {
        let target = txid.to_string();
        self.with_retry("get_script_pubkey", &target, move || {
            self.source.get_script_pubkey(txid, address)
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        target: &str,
        mut call: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.policy.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let err = match call().await {
                Ok(value) => {
                    debug!(operation, resource = target, attempt, "chain call succeeded");
                    log_chain_event(ChainCall {
                        operation,
                        target,
                        attempts: attempt,
                        error: None,
                    });
                    return Ok(value);
                }
                Err(SourceError::Transient(msg)) => msg,
                Err(SourceError::Permanent(msg)) => {
                    return Err(self.fail(operation, target, attempt, GatewayError::Rejected(msg)))
                }
                Err(SourceError::Malformed(msg)) => {
                    return Err(self.fail(
                        operation,
                        target,
                        attempt,
                        GatewayError::MalformedResponse(msg),
                    ))
                }
            };

            let unavailable = GatewayError::ChainUnavailable { attempts: attempt };
            if attempt >= max_attempts {
                return Err(self.fail(operation, target, attempt, unavailable));
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                operation,
                resource = target,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient chain failure, retrying"
            );

            if !self.backoff(delay).await {
                warn!(operation, resource = target, attempt, "retry cancelled by shutdown");
                return Err(self.fail(operation, target, attempt, unavailable));
            }
        }
    }

    fn fail(&self, operation: &str, target: &str, attempts: u32, err: GatewayError) -> GatewayError {
        let message = err.to_string();
        log_chain_event(ChainCall {
            operation,
            target,
            attempts,
            error: Some(&message),
        });
        err
    }

    /// Sleep for `delay`; false if shutdown was signalled first
    async fn backoff(&self, delay: Duration) -> bool {
        let Some(shutdown) = &self.shutdown else {
            tokio::time::sleep(delay).await;
            return true;
        };

        let mut shutdown = shutdown.clone();
        if *shutdown.borrow() {
            return false;
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = shutdown.changed() => match changed {
                    Ok(()) if *shutdown.borrow() => return false,
                    Ok(()) => continue,
                    // sender gone, nobody can cancel any more
                    Err(_) => {
                        (&mut sleep).await;
                        return true;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::source::MockChainDataSource;
    use bitcoin::hashes::Hash;
    use bitcoin::key::{Keypair, XOnlyPublicKey};
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};
    use secp256k1::SECP256K1;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn address() -> Address {
        let keypair = Keypair::from_seckey_slice(SECP256K1, &[7u8; 32]).unwrap();
        let (xonly, _) = XOnlyPublicKey::from_keypair(&keypair);
        Address::p2tr(SECP256K1, xonly, None, bitcoin::Network::Testnet)
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    fn utxo() -> UnspentOutput {
        UnspentOutput::new(
            Txid::from_byte_array([9u8; 32]),
            0,
            Amount::from_sat(10_000),
            address().script_pubkey(),
        )
    }

    fn signed() -> SignedTransaction {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([9u8; 32]), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::from_slice(&[vec![1u8; 64]]),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(9_000),
                script_pubkey: address().script_pubkey(),
            }],
        };
        SignedTransaction {
            txid: tx.compute_txid(),
            tx,
            fee: Amount::from_sat(1_000),
        }
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut source = MockChainDataSource::new();
        source.expect_fetch_utxos().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SourceError::Transient("ETIMEDOUT".into()))
            } else {
                Ok(vec![utxo()])
            }
        });

        let gateway = ChainGateway::new(source, fast_policy(3));
        let utxos = gateway.fetch_utxos(&address()).await.unwrap();

        assert_eq!(utxos.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let mut source = MockChainDataSource::new();
        source
            .expect_fetch_utxos()
            .times(3)
            .returning(|_| Err(SourceError::Transient("503".into())));

        let gateway = ChainGateway::new(source, fast_policy(3));
        let err = gateway.fetch_utxos(&address()).await.unwrap_err();
        assert_eq!(err, GatewayError::ChainUnavailable { attempts: 3 });
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let mut source = MockChainDataSource::new();
        source
            .expect_fetch_utxos()
            .times(1)
            .returning(|_| Err(SourceError::Permanent("invalid address".into())));

        let gateway = ChainGateway::new(source, fast_policy(3));
        let err = gateway.fetch_utxos(&address()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_malformed_not_retried() {
        let mut source = MockChainDataSource::new();
        source
            .expect_fetch_utxos()
            .times(1)
            .returning(|_| Err(SourceError::Malformed("missing value".into())));

        let gateway = ChainGateway::new(source, fast_policy(3));
        let err = gateway.fetch_utxos(&address()).await.unwrap_err();
        assert_eq!(err, GatewayError::MalformedResponse("missing value".into()));
    }

    #[tokio::test]
    async fn test_empty_result_is_ok() {
        let mut source = MockChainDataSource::new();
        source.expect_fetch_utxos().times(1).returning(|_| Ok(vec![]));

        let gateway = ChainGateway::new(source, fast_policy(3));
        assert!(gateway.fetch_utxos(&address()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_backoff() {
        let (tx, rx) = watch::channel(false);

        let mut source = MockChainDataSource::new();
        source
            .expect_fetch_utxos()
            .times(1)
            .returning(|_| Err(SourceError::Transient("ENOTFOUND".into())));

        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
        };
        let gateway = ChainGateway::new(source, policy).with_shutdown(rx);

        let started = Instant::now();
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).ok();
            // keep the sender alive until the gateway has observed it
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let err = gateway.fetch_utxos(&address()).await.unwrap_err();
        assert_eq!(err, GatewayError::ChainUnavailable { attempts: 1 });
        assert!(started.elapsed() < Duration::from_secs(5));
        cancel.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_tx_hex_passthrough() {
        let mut source = MockChainDataSource::new();
        source
            .expect_get_tx_hex()
            .times(1)
            .returning(|_| Ok("0200".to_string()));

        let gateway = ChainGateway::new(source, fast_policy(1));
        let hex = gateway
            .get_tx_hex(&Txid::from_byte_array([1u8; 32]))
            .await
            .unwrap();
        assert_eq!(hex, "0200");
    }

    #[tokio::test]
    async fn test_get_script_pubkey_passthrough() {
        let mut source = MockChainDataSource::new();
        source
            .expect_get_script_pubkey()
            .times(1)
            .returning(|_, addr| Ok(addr.script_pubkey()));

        let gateway = ChainGateway::new(source, fast_policy(1));
        let script = gateway
            .get_script_pubkey(&Txid::from_byte_array([1u8; 32]), &address())
            .await
            .unwrap();
        assert_eq!(script, address().script_pubkey());
    }

    #[tokio::test]
    async fn test_double_spend_rejected_once() {
        let mut source = MockChainDataSource::new();
        source.expect_broadcast().times(1).returning(|_| {
            Err(SourceError::Permanent(
                "HTTP 400: sendrawtransaction RPC error: txn-mempool-conflict".into(),
            ))
        });
        source.expect_get_tx_hex().times(0);

        let gateway = ChainGateway::new(source, fast_policy(3));
        let err = gateway.broadcast(&signed()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(ref m) if m.contains("txn-mempool-conflict")));
    }

    #[tokio::test]
    async fn test_already_known_after_lost_response_is_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut source = MockChainDataSource::new();
        source.expect_broadcast().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SourceError::Transient("connection reset".into()))
            } else {
                Err(SourceError::Permanent("HTTP 400: txn-already-known".into()))
            }
        });
        source
            .expect_get_tx_hex()
            .times(1)
            .returning(|_| Ok("02000000".to_string()));

        let tx = signed();
        let gateway = ChainGateway::new(source, fast_policy(3));
        assert_eq!(gateway.broadcast(&tx).await.unwrap(), tx.txid);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_already_known_but_unknown_txid_stays_rejected() {
        let mut source = MockChainDataSource::new();
        source
            .expect_broadcast()
            .times(1)
            .returning(|_| Err(SourceError::Permanent("HTTP 400: txn-already-in-mempool".into())));
        source
            .expect_get_tx_hex()
            .times(1)
            .returning(|_| Err(SourceError::Permanent("Transaction not found".into())));

        let gateway = ChainGateway::new(source, fast_policy(3));
        let err = gateway.broadcast(&signed()).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected("HTTP 400: txn-already-in-mempool".into())
        );
    }

    #[tokio::test]
    async fn test_wait_for_utxos_returns_once_funded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut source = MockChainDataSource::new();
        source.expect_fetch_utxos().times(4).returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 2 => Ok(vec![]),
                1 => Err(SourceError::Transient("503".into())),
                _ => Ok(vec![utxo()]),
            }
        });

        let gateway = ChainGateway::new(source, fast_policy(1));
        let utxos = gateway
            .wait_for_utxos(&address(), Duration::from_secs(5), Duration::from_millis(2))
            .await
            .unwrap();

        assert_eq!(utxos.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_for_utxos_times_out() {
        let mut source = MockChainDataSource::new();
        source.expect_fetch_utxos().returning(|_| Ok(vec![]));

        let gateway = ChainGateway::new(source, fast_policy(1));
        let err = gateway
            .wait_for_utxos(&address(), Duration::from_millis(30), Duration::from_millis(5))
            .await
            .unwrap_err();

        match err {
            GatewayError::WaitTimedOut { address: addr, waited_ms } => {
                assert_eq!(addr, address().to_string());
                assert!(waited_ms >= 30);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_for_utxos_stops_on_rejection() {
        let mut source = MockChainDataSource::new();
        source
            .expect_fetch_utxos()
            .times(1)
            .returning(|_| Err(SourceError::Permanent("HTTP 400: invalid address".into())));

        let gateway = ChainGateway::new(source, fast_policy(3));
        let err = gateway
            .wait_for_utxos(&address(), Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }
}
