//! UTXO Toolbox CLI
//!
//! Usage:
//!   utxo-toolbox address
//!   utxo-toolbox balance [--address <addr>]
//!   utxo-toolbox redeem
//!   utxo-toolbox send --to <addr> --min-value <sats>
//!   utxo-toolbox merge [--target <sats>]
//!   utxo-toolbox split --count <n>
//!   utxo-toolbox wait [--address <addr>] [--timeout <secs>] [--poll <secs>]
//!   utxo-toolbox tx <txid> [--address <addr>]
//!
//! Global flags: `--dry-run` signs without broadcasting, `--fee-rate` overrides
//! the configured sat/vB rate, `--json` prints machine-readable output.
//! Keys and endpoints come from the environment (see `common::config`).

use bitcoin::{Amount, Txid};
use std::time::Duration;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;

use utxo_toolbox::common::{init_from_config, ToolboxConfig};
use utxo_toolbox::types::units::{parse_btc, parse_sats, sats_to_display};
use utxo_toolbox::{
    BalanceSummary, ChainGateway, EpisodeReport, EsploraClient, FeeRate, NetworkContext,
    OwnedOutputSource, Result, TaprootWallet, UtxoService,
};

#[derive(Parser)]
#[command(name = "utxo-toolbox")]
#[command(about = "Taproot UTXO redeem, send, merge and split over Esplora")]
struct Cli {
    /// Sign but do not broadcast
    #[arg(long, global = true)]
    dry_run: bool,

    /// Fee rate in sat/vB (overrides UTXO_FEE_RATE)
    #[arg(long, global = true)]
    fee_rate: Option<FeeRate>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print the loaded configuration first
    #[arg(long, global = true)]
    show_config: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the wallet's Taproot address
    Address,

    /// Show balance and UTXO distribution
    Balance {
        /// Address to inspect (default: the wallet's own)
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Spend the largest UTXO back to the wallet
    Redeem,

    /// Send the largest UTXO worth more than --min-value to an address
    Send {
        /// Recipient address
        #[arg(short, long)]
        to: String,

        /// Exclusive lower bound on the UTXO value (sats, or BTC with a "btc" suffix)
        #[arg(short, long, default_value = "0", value_parser = parse_amount)]
        min_value: Amount,
    },

    /// Consolidate UTXOs into one output
    Merge {
        /// Only merge enough UTXOs to cover this amount (sats, or BTC with a "btc" suffix)
        #[arg(short, long, value_parser = parse_amount)]
        target: Option<Amount>,
    },

    /// Split the largest UTXO into equal outputs
    Split {
        /// Number of outputs (1-100)
        #[arg(short, long)]
        count: usize,
    },

    /// Wait until an address has UTXOs
    Wait {
        /// Address to watch (default: the wallet's own)
        #[arg(short, long)]
        address: Option<String>,

        /// Give up after this many seconds
        #[arg(short, long, default_value = "300")]
        timeout: u64,

        /// Seconds between polls
        #[arg(short, long, default_value = "5")]
        poll: u64,
    },

    /// Show a transaction's raw hex and the script it pays to an address
    Tx {
        txid: Txid,

        /// Address whose output script to look up
        #[arg(short, long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(code = e.error_code(), error = %e, "command failed");
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ToolboxConfig::from_env()?;
    init_from_config(&config)?;

    if cli.show_config {
        config.print_summary();
    }

    let mut ctx = config.network_context();
    if let Some(rate) = cli.fee_rate {
        ctx = ctx.with_fee_rate(rate);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling pending retries");
            shutdown_tx.send(true).ok();
        }
    });

    let source = EsploraClient::from_context(&ctx, config.http_timeout())?;
    let gateway = ChainGateway::new(source, config.retry_policy()).with_shutdown(shutdown_rx);
    let service = UtxoService::new(ctx.clone(), gateway).with_dry_run(cli.dry_run);

    tracing::info!(
        network = %ctx.network,
        esplora = %ctx.esplora_url,
        fee_rate = %service.fee_rate(),
        dry_run = cli.dry_run,
        "utxo toolbox starting"
    );

    match cli.command {
        Commands::Address => {
            let wallet = load_wallet(&config, &ctx)?;
            if cli.json {
                print_json(&serde_json::json!({
                    "network": ctx.network.to_string(),
                    "address": wallet.address().to_string(),
                    "internal_key": hex::encode(wallet.public_key().serialize()),
                }));
            } else {
                println!("Network:      {}", ctx.network);
                println!("Address:      {}", wallet.address());
                println!("Internal key: {}", hex::encode(wallet.public_key().serialize()));
            }
        }
        Commands::Balance { address } => {
            let address = match address {
                Some(addr) => service.builder().validate_address(&addr)?,
                None => load_wallet(&config, &ctx)?.address().clone(),
            };
            let balance = service.balance(&address).await?;
            if cli.json {
                print_json(&balance);
            } else {
                print_balance(&balance);
            }
        }
        Commands::Redeem => {
            let wallet = load_wallet(&config, &ctx)?;
            let report = service.redeem(&wallet).await?;
            print_report(&report, &ctx, cli.json);
        }
        Commands::Send { to, min_value } => {
            let wallet = load_wallet(&config, &ctx)?;
            let report = service.send(&wallet, &to, min_value).await?;
            print_report(&report, &ctx, cli.json);
        }
        Commands::Merge { target } => {
            let wallet = load_wallet(&config, &ctx)?;
            let report = service.merge(&wallet, target).await?;
            print_report(&report, &ctx, cli.json);
        }
        Commands::Split { count } => {
            let wallet = load_wallet(&config, &ctx)?;
            let report = service.split(&wallet, count).await?;
            print_report(&report, &ctx, cli.json);
        }
        Commands::Wait {
            address,
            timeout,
            poll,
        } => {
            let address = match address {
                Some(addr) => service.builder().validate_address(&addr)?,
                None => load_wallet(&config, &ctx)?.address().clone(),
            };
            let utxos = service
                .gateway()
                .wait_for_utxos(
                    &address,
                    Duration::from_secs(timeout),
                    Duration::from_secs(poll.max(1)),
                )
                .await?;
            if cli.json {
                let entries: Vec<_> = utxos
                    .iter()
                    .map(|u| {
                        serde_json::json!({
                            "txid": u.txid().to_string(),
                            "vout": u.vout(),
                            "value": u.amount.to_sat(),
                            "confirmed": u.confirmed,
                        })
                    })
                    .collect();
                print_json(&entries);
            } else {
                println!("{} UTXO(s) at {}", utxos.len(), address);
                for utxo in &utxos {
                    println!(
                        "  {}  {}{}",
                        utxo.outpoint,
                        sats_to_display(utxo.amount),
                        if utxo.confirmed { "" } else { "  (unconfirmed)" }
                    );
                }
            }
        }
        Commands::Tx { txid, address } => {
            let hex = service.gateway().get_tx_hex(&txid).await?;
            let script = match address {
                Some(addr) => {
                    let addr = service.builder().validate_address(&addr)?;
                    Some(service.gateway().get_script_pubkey(&txid, &addr).await?)
                }
                None => None,
            };
            if cli.json {
                print_json(&serde_json::json!({
                    "txid": txid.to_string(),
                    "hex": hex,
                    "script_pubkey": script.map(|s| s.to_hex_string()),
                }));
            } else {
                println!("TXID: {}", txid);
                if let Some(script) = script {
                    println!("Script: {}", script.to_hex_string());
                }
                println!("{}", hex);
            }
        }
    }

    Ok(())
}

fn parse_amount(s: &str) -> std::result::Result<Amount, String> {
    let lower = s.trim().to_lowercase();
    let parsed = match lower.strip_suffix("btc") {
        Some(btc) => parse_btc(btc),
        None => parse_sats(lower.trim_end_matches("sats")),
    };
    parsed.ok_or_else(|| format!("invalid amount: {}", s))
}

fn load_wallet(config: &ToolboxConfig, ctx: &NetworkContext) -> Result<TaprootWallet> {
    let source = config.require_key_source()?;
    Ok(TaprootWallet::from_key_source(source, ctx)?)
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}

fn print_balance(balance: &BalanceSummary) {
    println!("=== Balance ===");
    println!("Address:     {}", balance.address);
    println!("Total:       {}", sats_to_display(Amount::from_sat(balance.total_sats)));
    println!("Confirmed:   {}", sats_to_display(Amount::from_sat(balance.confirmed_sats)));
    println!("Unconfirmed: {}", sats_to_display(Amount::from_sat(balance.unconfirmed_sats)));
    println!(
        "UTXOs:       {} (small {}, medium {}, large {})",
        balance.utxo_count, balance.buckets.small, balance.buckets.medium, balance.buckets.large
    );
}

fn print_report(report: &EpisodeReport, ctx: &NetworkContext, json: bool) {
    if json {
        print_json(report);
        return;
    }

    println!("=== {} ===", report.kind);
    println!("Episode: {}", report.episode_id);
    println!("TXID:    {}", report.txid);
    println!("Inputs:  {}  Outputs: {}", report.inputs, report.outputs);
    println!("Size:    {} vB", report.vsize);
    println!("Fee:     {}", sats_to_display(Amount::from_sat(report.fee_sats)));
    if report.broadcast {
        println!("Broadcast: {}", ctx.tx_url(&report.txid));
    } else {
        println!("Dry run, not broadcast. Raw transaction:");
        println!("{}", report.hex);
    }
}
