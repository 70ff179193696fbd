//! Esplora API Client
//!
//! `ChainDataSource` over the Esplora REST API (mempool.space, blockstream.info
//! or a self-hosted instance).

use async_trait::async_trait;
use bitcoin::{Address, ScriptBuf, Txid};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::source::{ChainDataSource, SourceError};
use crate::network::NetworkContext;
use crate::types::{Amount, UnspentOutput};

/// Rejection reasons that clear up on their own once the mempool drains.
/// A mempool conflict is a double-spend and stays permanent.
const TRANSIENT_REJECTIONS: &[&str] = &["too-long-mempool-chain"];

/// Esplora HTTP client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    /// Create a new client with custom URL and per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Permanent(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client for the context's endpoint
    pub fn from_context(ctx: &NetworkContext, timeout: Duration) -> Result<Self, SourceError> {
        Self::new(&ctx.esplora_url, timeout)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, path: &str) -> Result<String, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await.map_err(request_error)?;
        read_body(resp).await
    }
}

#[async_trait]
impl ChainDataSource for EsploraClient {
    async fn fetch_utxos(&self, address: &Address) -> Result<Vec<UnspentOutput>, SourceError> {
        let body = self.get_text(&format!("/address/{}/utxo", address)).await?;
        parse_utxo_list(&body, &address.script_pubkey())
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<Txid, SourceError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self
            .client
            .post(&url)
            .body(tx_hex.to_string())
            .send()
            .await
            .map_err(request_error)?;

        let body = read_body(resp).await?;
        body.trim()
            .parse::<Txid>()
            .map_err(|_| SourceError::Malformed(format!("broadcast returned non-txid: {}", body)))
    }

    async fn get_tx_hex(&self, txid: &Txid) -> Result<String, SourceError> {
        let body = self.get_text(&format!("/tx/{}/hex", txid)).await?;
        let hex = body.trim();
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SourceError::Malformed(format!("tx {} hex is not hex", txid)));
        }
        Ok(hex.to_string())
    }

    async fn get_script_pubkey(
        &self,
        txid: &Txid,
        address: &Address,
    ) -> Result<ScriptBuf, SourceError> {
        let body = self.get_text(&format!("/tx/{}", txid)).await?;
        find_script_pubkey(&body, &address.to_string())
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: Option<String>,
    vout: Option<u32>,
    value: Option<u64>,
    #[serde(default)]
    status: EsploraStatus,
}

#[derive(Debug, Default, Deserialize)]
struct EsploraStatus {
    #[serde(default)]
    confirmed: bool,
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    vout: Vec<EsploraTxOut>,
}

#[derive(Debug, Deserialize)]
struct EsploraTxOut {
    scriptpubkey: String,
    scriptpubkey_address: Option<String>,
}

/// Parse a `/address/{addr}/utxo` response.
///
/// Every output gets `script_pubkey`, the queried address's script.
pub fn parse_utxo_list(
    body: &str,
    script_pubkey: &ScriptBuf,
) -> Result<Vec<UnspentOutput>, SourceError> {
    let entries: Vec<EsploraUtxo> = serde_json::from_str(body)
        .map_err(|e| SourceError::Malformed(format!("utxo list: {}", e)))?;

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let missing = |field: &str| SourceError::Malformed(format!("utxo {} missing {}", i, field));
            let txid = entry.txid.ok_or_else(|| missing("txid"))?;
            let vout = entry.vout.ok_or_else(|| missing("vout"))?;
            let value = entry.value.ok_or_else(|| missing("value"))?;

            let txid: Txid = txid
                .parse()
                .map_err(|_| SourceError::Malformed(format!("utxo {} has bad txid {}", i, txid)))?;

            Ok(UnspentOutput::new(txid, vout, Amount::from_sat(value), script_pubkey.clone())
                .with_status(entry.status.confirmed, entry.status.block_height))
        })
        .collect()
}

/// Find the script of the first output in a `/tx/{txid}` response paying `address`
pub fn find_script_pubkey(body: &str, address: &str) -> Result<ScriptBuf, SourceError> {
    let tx: EsploraTx = serde_json::from_str(body)
        .map_err(|e| SourceError::Malformed(format!("transaction: {}", e)))?;

    let out = tx
        .vout
        .into_iter()
        .find(|o| o.scriptpubkey_address.as_deref() == Some(address))
        .ok_or_else(|| SourceError::Permanent(format!("no output pays {}", address)))?;

    ScriptBuf::from_hex(&out.scriptpubkey)
        .map_err(|e| SourceError::Malformed(format!("scriptpubkey: {}", e)))
}

// ============================================================================
// Failure Classification
// ============================================================================

fn request_error(e: reqwest::Error) -> SourceError {
    // timeouts, DNS and connection failures are all worth another attempt
    SourceError::Transient(e.to_string())
}

async fn read_body(resp: reqwest::Response) -> Result<String, SourceError> {
    let status = resp.status();
    let body = resp.text().await.map_err(request_error)?;

    if status.is_success() {
        Ok(body)
    } else {
        Err(classify_status(status, &body))
    }
}

/// Classify a non-success HTTP response
pub fn classify_status(status: StatusCode, body: &str) -> SourceError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || TRANSIENT_REJECTIONS.iter().any(|r| body.contains(r))
    {
        SourceError::Transient(message)
    } else {
        SourceError::Permanent(message)
    }
}
