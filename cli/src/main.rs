//! ContractFill CLI: manage and replay contract-state readers.
//!
//! # Commands
//! ```text
//! contractfill --config reader.json setup
//! contractfill --config reader.json upgrade
//! contractfill --config reader.json reset
//! contractfill --config reader.json replay --blocks blocks.jsonl [--chain-state chain.json]
//! contractfill info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::info;

use contractfill_core::{
    init_tracing, BroadcastRelay, Filler, FillerConfig, HandlerFactory, LogConfig,
};

mod chain;
mod cmd_replay;

#[derive(Parser)]
#[command(
    name = "contractfill",
    about = "ContractFill CLI: fork-safe contract-state filler",
    long_about = "
ContractFill CLI: mirror the state of on-chain contracts into a database,
rolling back reversible blocks on forks.

ENVIRONMENT VARIABLES:
  RUST_LOG   Overrides the log level of the reader configuration
",
    version
)]
struct Cli {
    /// Reader configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database: `memory` or a SQLite file path
    #[arg(long, global = true, default_value = "contractfill.db")]
    database: String,

    /// Chain-state fixture (JSON) used while initializing contract modules
    #[arg(long, global = true)]
    chain_state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tables, views and procedures and initialize every contract module
    Setup,

    /// Recreate views and procedures of every contract module
    Upgrade,

    /// Delete all rows of the configured contracts and the reader checkpoint
    Reset,

    /// Apply a recorded block stream (one JSON message per line)
    Replay {
        /// JSON-lines file of `{"type": "block" | "fork", ...}` messages
        #[arg(long)]
        blocks: PathBuf,
        /// Print committed notifications to stdout as JSON lines
        #[arg(long)]
        emit_notifications: bool,
    },

    /// Show build info and the available contract modules
    Info,
}

fn factory() -> HandlerFactory {
    contractfill_atomicassets::register(HandlerFactory::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (upgrade, delete_data, replay) = match cli.command {
        Commands::Info => return cmd_info(),
        Commands::Setup => (false, false, None),
        Commands::Upgrade => (true, false, None),
        Commands::Reset => (false, true, None),
        Commands::Replay {
            blocks,
            emit_notifications,
        } => (false, false, Some((blocks, emit_notifications))),
    };

    let mut config = load_config(cli.config.as_deref())?;
    init_tracing(&log_config(&config.log)).context("initialise logging")?;
    config.upgrade |= upgrade;
    config.delete_data |= delete_data;

    if let Some((blocks, emit_notifications)) = replay {
        let (filler, printer) =
            build_filler(config, &cli.database, cli.chain_state.as_deref(), emit_notifications)
                .await?;
        return cmd_replay::run(filler, printer, &blocks).await;
    }

    let (mut filler, _) = build_filler(config, &cli.database, cli.chain_state.as_deref(), false).await?;
    filler.prepare().await.context("prepare reader")?;
    println!(
        "reader '{}' prepared: next block {}, {} reversible block(s), {} job(s)",
        filler.config().reader,
        filler.next_block(),
        filler.reversible_blocks().len(),
        filler.jobs().len()
    );
    filler.shutdown();
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<FillerConfig> {
    let path = path.context("--config is required for this command")?;
    FillerConfig::from_file(path).with_context(|| format!("load config '{}'", path.display()))
}

/// `RUST_LOG` replaces the configured level when set.
fn log_config(configured: &LogConfig) -> LogConfig {
    match std::env::var("RUST_LOG") {
        Ok(level) if !level.trim().is_empty() => LogConfig {
            level,
            components: Default::default(),
            json: configured.json,
        },
        _ => configured.clone(),
    }
}

async fn build_filler(
    config: FillerConfig,
    database: &str,
    chain_state: Option<&std::path::Path>,
    emit_notifications: bool,
) -> Result<(Filler, Option<JoinHandle<()>>)> {
    let db = contractfill_storage::open(database)
        .await
        .with_context(|| format!("open database '{database}'"))?;
    let chain = match chain_state {
        Some(path) => chain::load(path)?,
        None => chain::empty(),
    };

    let (relay, rx) = BroadcastRelay::new(config.notification_capacity);
    let printer = emit_notifications.then(|| tokio::spawn(cmd_replay::print_notifications(rx)));
    info!(database, reader = %config.reader, "opening reader");

    let filler = Filler::from_factory(config, &factory(), db, Arc::new(chain), Arc::new(relay))
        .context("build reader")?;
    Ok((filler, printer))
}

fn cmd_info() -> Result<()> {
    let defaults = FillerConfig::default();
    println!("ContractFill v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Contract modules:");
    for name in factory().names() {
        println!("  {name}");
    }
    println!();
    println!("Defaults:");
    println!("  Insert chunk size:      {} rows", defaults.insert_chunk_size);
    println!("  Reconcile threshold:    {} rows", defaults.reconcile_threshold);
    println!("  Job tick:               {} ms", defaults.job_tick_ms);
    println!(
        "  Block retries:          {} (backoff {} ms, doubled per attempt, max 60 s)",
        defaults.max_block_retries, defaults.retry_backoff_ms
    );
    println!("  Notification capacity:  {}", defaults.notification_capacity);
    println!("  Storage backends:       memory, SQLite");
    Ok(())
}
