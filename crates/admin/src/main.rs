//! Quorum Admin
//!
//! Operator CLI for a ledger roster. Every answer it prints comes from a
//! proof verified against the roster's collective key.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quorum_ledger::{InstanceId, LedgerRpc, VerifiedState};
use quorum_network::{PublicKey, WebSocketDialer};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::AdminConfig;

/// Quorum ledger admin
#[derive(Parser, Debug)]
#[command(name = "quorum-admin")]
#[command(about = "Inspect a BFT ledger through verified proofs", long_about = None)]
struct Args {
    /// Ledger description: chain ID, roster and client settings (JSON)
    #[arg(long, default_value = "./ledger.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the roster, its collective key and signing threshold
    Roster,
    /// Fetch and verify the chain configuration
    Show,
    /// Fetch and verify the state of an instance
    Proof {
        /// Hex-encoded instance ID
        instance: String,
        /// Read at this height instead of the latest block
        #[arg(long)]
        height: Option<u64>,
    },
    /// Fetch the latest counters of signers
    Counters {
        /// Base58-encoded signer public keys
        #[arg(required = true)]
        signers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AdminConfig::load(&args.config)?;
    tracing::info!("Loaded roster of {} members from {:?}", config.roster.len(), args.config);

    // Nothing is dialed until the first request
    let rpc = LedgerRpc::connect(
        Arc::new(config.roster.clone()),
        config.chain_id()?,
        Arc::new(WebSocketDialer::new()),
        config.connection.clone(),
        config.rpc.clone(),
    );
    let output = run(&rpc, &config, args.command).await?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn roster(config: &AdminConfig) -> serde_json::Value {
    json!({
        "collective_key": config.roster.collective_key().to_string(),
        "threshold": config.roster.threshold(),
        "max_faulty": config.roster.max_faulty(),
        "servers": config.roster.list(),
    })
}

async fn run(rpc: &LedgerRpc, config: &AdminConfig, command: Command) -> Result<serde_json::Value> {
    match command {
        Command::Roster => Ok(roster(config)),
        Command::Show => {
            let chain = rpc.get_chain_config().await.context("fetching chain config")?;
            Ok(json!({
                "block_interval_ms": chain.block_interval_ms,
                "max_block_size": chain.max_block_size,
                "roster": chain.roster,
                "leader": rpc.connection().leader().to_string(),
            }))
        }
        Command::Proof { instance, height } => {
            let key: InstanceId = instance.parse().context("instance must be 32 hex-encoded bytes")?;
            let state = match height {
                Some(height) => rpc.get_proof_at(&key, height).await,
                None => rpc.get_proof(&key).await,
            }
            .with_context(|| format!("fetching proof for {}", key))?;
            Ok(describe(&state))
        }
        Command::Counters { signers } => {
            let signers = signers
                .iter()
                .map(|s| s.parse::<PublicKey>())
                .collect::<Result<Vec<_>, _>>()?;
            let counters = rpc.get_signer_counters(&signers).await.context("fetching counters")?;
            let entries: Vec<_> = signers
                .iter()
                .map(|s| json!({ "signer": s, "counter": counters.get(s).copied().unwrap_or(0) }))
                .collect();
            Ok(serde_json::Value::Array(entries))
        }
    }
}

fn describe(state: &VerifiedState) -> serde_json::Value {
    let time = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(state.timestamp as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    match &state.state {
        Some(body) => json!({
            "instance": state.key,
            "present": true,
            "height": state.height,
            "time": time,
            "contract_id": body.contract_id,
            "policy_id": hex::encode(body.policy_id),
            "version": body.version,
            "value": hex::encode(&body.value),
        }),
        None => json!({
            "instance": state.key,
            "present": false,
            "height": state.height,
            "time": time,
        }),
    }
}
