//! BridgeWatch CLI: watch bridge core contracts across chains.
//!
//! # Commands
//! ```text
//! bridgewatch run     --config bridgewatch.yaml
//! bridgewatch status  --config bridgewatch.yaml
//! bridgewatch inspect --chain terra --from 4810000 --to 4810100
//! bridgewatch chains
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use bridgewatch_core::{BlockRange, ChainRegistry};

mod logging;
mod notifier;
mod service;
mod settings;

use settings::Settings;

#[derive(Parser)]
#[command(
    name = "bridgewatch",
    about = "Multi-chain bridge message watcher",
    long_about = "
BridgeWatch follows the bridge core contract on every enabled chain, stores
each observed message and redemption, and checkpoints its progress per chain.

ENVIRONMENT VARIABLES:
  BRIDGEWATCH_NETWORK   mainnet | testnet
  BRIDGEWATCH_CHAINS    comma-separated chains to run (e.g. ethereum,terra)
  <CHAIN>_RPC           RPC endpoint per chain (e.g. ETHEREUM_RPC)
  RUST_LOG              log filter, replaces logging.level
",
    version
)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, global = true, env = "BRIDGEWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one watcher per enabled chain until Ctrl-C
    Run,

    /// Print each chain's checkpoint and resume block
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan a block range once and print block → message keys
    Inspect {
        #[arg(long)]
        chain: String,
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
    },

    /// List the chain registry
    Chains,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    logging::init(&settings.logging);

    match cli.command {
        Commands::Run => service::run(settings).await,
        Commands::Status { json } => cmd_status(&settings, json).await,
        Commands::Inspect { chain, from, to } => cmd_inspect(&settings, &chain, from, to).await,
        Commands::Chains => cmd_chains(&settings.registry()?),
    }
}

async fn cmd_status(settings: &Settings, json: bool) -> Result<()> {
    let registry = settings.registry()?;
    let store = service::build_store(settings).await?;

    let mut rows = Vec::new();
    for chain in registry.iter() {
        let checkpoint = store.load_checkpoint(&chain.name).await?;
        let resume = store
            .resume_block(&chain.name, chain.initial_block(registry.network()))
            .await?;
        rows.push(serde_json::json!({
            "chain": chain.name,
            "chainId": chain.chain_id,
            "enabled": settings.chains.contains(&chain.name),
            "lastBlock": checkpoint.as_ref().map(|c| c.last_block),
            "lastSequence": checkpoint.as_ref().and_then(|c| c.last_sequence),
            "updatedAt": checkpoint.as_ref().map(|c| c.updated_at.to_rfc3339()),
            "resumeBlock": resume,
        }));
    }
    store.stop().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "{:<12} {:>5} {:>8} {:>12} {:>12} {:>10}",
        "CHAIN", "ID", "ENABLED", "LAST BLOCK", "RESUME", "LAST SEQ"
    );
    for row in &rows {
        let cell = |key: &str| match &row[key] {
            serde_json::Value::Null => "-".to_string(),
            v => v.to_string(),
        };
        println!(
            "{:<12} {:>5} {:>8} {:>12} {:>12} {:>10}",
            row["chain"].as_str().unwrap_or_default(),
            cell("chainId"),
            cell("enabled"),
            cell("lastBlock"),
            cell("resumeBlock"),
            cell("lastSequence"),
        );
    }
    Ok(())
}

async fn cmd_inspect(settings: &Settings, chain: &str, from: u64, to: u64) -> Result<()> {
    if from > to {
        anyhow::bail!("--from ({from}) must not exceed --to ({to})");
    }
    let registry = settings.registry()?;
    let config = registry
        .get(chain)
        .with_context(|| format!("chain '{chain}' is not in the registry"))?;
    let extractor = service::build_extractor(config)?;

    let blocks = extractor
        .messages_for_blocks(BlockRange { from, to })
        .await
        .with_context(|| format!("scanning {chain} [{from}, {to}]"))?;

    let out: serde_json::Map<String, serde_json::Value> = blocks
        .iter()
        .map(|(key, messages)| (key.to_string(), serde_json::json!(messages)))
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn cmd_chains(registry: &ChainRegistry) -> Result<()> {
    println!("Network: {:?}", registry.network());
    println!(
        "{:<12} {:>5} {:<15} {:>12} {:<5} {}",
        "CHAIN", "ID", "FAMILY", "INITIAL", "RPC", "CORE CONTRACT"
    );
    for chain in registry.iter() {
        let initial = chain
            .initial_block(registry.network())
            .map_or_else(|| "-".to_string(), |b| b.to_string());
        println!(
            "{:<12} {:>5} {:<15} {:>12} {:<5} {}",
            chain.name,
            chain.chain_id,
            chain.family.to_string(),
            initial,
            if chain.rpc_url.is_some() { "yes" } else { "no" },
            chain.core_contract.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
