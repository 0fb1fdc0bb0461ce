//! Pair sniper CLI

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::Address;
use ethers::utils::format_units;
use morpheus::WatchExit;
use neo::{open_ledger, Neo};
use sniper_config::SniperConfig;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "neo")]
#[command(about = "Watch DEX pairs and trade each one at most once", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = "sniper.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch every configured target until each is terminal or Ctrl-C
    Run,
    /// Print every ledger record
    Status,
    /// Reset a TRADED or FAILED_TERMINAL pair back to UNTRADED
    Rearm {
        /// Pair address
        pair: String,

        /// Also reset a PENDING pair (only after checking the chain by hand)
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(config: &SniperConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.monitoring.log_level.as_str()));
    if config.monitoring.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: &Path) -> Result<SniperConfig> {
    SniperConfig::from_file_with_env(path)
        .with_context(|| format!("loading config from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config);

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Status => status(&config).await,
        Commands::Rearm { pair, force } => rearm(&config, &pair, force).await,
    }
}

async fn run(config: SniperConfig) -> Result<()> {
    info!(
        environment = %config.environment,
        chain = %config.chain.name,
        "Starting pair sniper with {} target(s)",
        config.targets.len()
    );
    let neo = Neo::connect(config).context("invalid configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Ctrl-C received, stopping watchers; executions in flight will finish");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let summaries = neo.run(shutdown_rx).await.context("sniper run failed")?;

    let mut failed = 0;
    for summary in &summaries {
        match &summary.result {
            Ok(WatchExit::Executed(report)) => {
                info!("{}: executed in {} attempt(s): {:?}", summary.target, report.attempts, report.outcome)
            }
            Ok(exit) => info!("{}: {:?}", summary.target, exit),
            Err(e) => {
                failed += 1;
                error!("{}: {}", summary.target, e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} watcher(s) ended with an error", failed);
    }
    Ok(())
}

async fn status(config: &SniperConfig) -> Result<()> {
    let ledger = open_ledger(config)
        .await
        .with_context(|| format!("opening ledger {}", config.ledger.path.display()))?;
    let records = ledger.snapshot().await;

    println!("\n{}", "=".repeat(70));
    println!("  POSITIONS ({})", config.ledger.path.display());
    println!("{}\n", "=".repeat(70));

    if records.is_empty() {
        println!("No positions recorded.");
        return Ok(());
    }

    for record in records {
        println!("{:?}  {}", record.pair, record.state);
        if let Some(tx_hash) = record.tx_hash {
            println!("    tx:     {:?}", tx_hash);
        }
        if let (Some(amount_in), Some(amount_out)) = (record.amount_in, record.amount_out) {
            println!("    amount: {} in, {} out (base units)", amount_in, amount_out);
        }
        if let Some(price) = record.executed_price {
            let price = format_units(price, 18u32).unwrap_or_else(|_| price.to_string());
            println!("    price:  {}", price);
        }
        if let Some(reason) = &record.failure_reason {
            println!("    reason: {}", reason);
        }
    }
    Ok(())
}

async fn rearm(config: &SniperConfig, pair: &str, force: bool) -> Result<()> {
    let pair: Address = pair
        .trim()
        .parse()
        .with_context(|| format!("'{}' is not a pair address", pair))?;
    let ledger = open_ledger(config)
        .await
        .with_context(|| format!("opening ledger {}", config.ledger.path.display()))?;

    let record = ledger.rearm(pair, force).await.context("re-arm refused")?;
    println!("{:?} is now {}", record.pair, record.state);
    Ok(())
}
