//! shareindex CLI: run the share-registry indexer and manage its state.
//!
//! Usage:
//! ```bash
//! shareindex run
//! shareindex rescan 19000000 19001000
//! shareindex status
//! shareindex reset
//! shareindex info
//! ```

mod settings;

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use shareindex_core::checkpoint::CheckpointManager;
use shareindex_core::indexer::IndexerConfig;
use shareindex_core::IndexStore;
use shareindex_evm::{IndexerBuilder, JsonRpcClient, RpcClientConfig, ShareIndexer};
use shareindex_storage::SqliteStorage;

use settings::Settings;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run().await,
        "rescan" => cmd_rescan(&args[2..]).await,
        "status" => cmd_status().await,
        "reset" => cmd_reset().await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("shareindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("shareindex {}", env!("CARGO_PKG_VERSION"));
    println!("Event indexer for on-chain share registries\n");
    println!("USAGE:");
    println!("    shareindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run                 Catch up, then follow the chain until Ctrl-C");
    println!("    rescan <from> [to]  Re-process a block range (idempotent)");
    println!("    status              Show the stored checkpoint and row counts");
    println!("    reset               Forget the checkpoint; the next run starts at START_BLOCK");
    println!("    info                Show configuration defaults");
    println!("    version             Print version");
    println!("    help                Print this help");
}

fn cmd_info() {
    let defaults = IndexerConfig::default();
    println!("ShareIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default start block: {}", defaults.start_block);
    println!("  Default confirmation depth: {} blocks", defaults.confirmation_depth);
    println!("  Default batch size: {} logs/commit", defaults.batch_size);
    println!("  Default max block range: {} blocks/eth_getLogs", defaults.max_block_range);
    println!(
        "  Default checkpoint interval: every {}s in live mode",
        defaults.checkpoint_interval.as_secs()
    );
    println!("  Default database: {}", settings::DEFAULT_DATABASE_URL);
    println!("  Storage backends: memory, SQLite");
    println!("  Events: TokenLinked, CorporateActionRecorded, Issued, Transfer, SplitExecuted");
}

async fn cmd_run() -> Result<()> {
    init_tracing();
    let indexer = build_indexer().await?;

    indexer.start().await.context("indexer failed to start")?;
    info!(status = %indexer.status(), "running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");
    indexer.stop().await.context("indexer failed to stop cleanly")?;
    Ok(())
}

async fn cmd_rescan(args: &[String]) -> Result<()> {
    let from = match args.first() {
        Some(raw) => raw.parse::<u64>().with_context(|| format!("invalid <from> '{raw}'"))?,
        None => bail!("usage: shareindex rescan <from> [to]"),
    };
    let to = match args.get(1) {
        Some(raw) => Some(raw.parse::<u64>().with_context(|| format!("invalid [to] '{raw}'"))?),
        None => None,
    };
    if let Some(to) = to {
        if to < from {
            bail!("<to> ({to}) is below <from> ({from})");
        }
    }

    init_tracing();
    let indexer = build_indexer().await?;
    let report = indexer.rescan(from, to).await.context("rescan failed")?;

    println!("Rescanned blocks {}..={}", report.from, report.to);
    println!("  Logs fetched: {}", report.logs);
    println!("  Batches committed: {}", report.batches);
    if report.failed_pairs > 0 {
        println!("  Failed fetches: {} (checkpoint held)", report.failed_pairs);
    }
    println!("  Checkpoint: {}", display_block(report.checkpoint));
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let store = open_store(&settings::database_url()).await?;
    let version = IndexerConfig::default().indexer_version;
    let checkpoint = CheckpointManager::new(store.clone(), version);

    println!("Database: {}", settings::database_url());
    println!(
        "  Last indexed block: {}",
        display_block(checkpoint.last_indexed_block().await?)
    );
    if let Some(version) = checkpoint.stored_version().await? {
        println!("  Written by: shareindex {version}");
    }
    println!("  Raw events: {}", store.raw_events().await?.len());
    println!("  Transactions: {}", store.transactions().await?.len());
    println!("  Corporate actions: {}", store.corporate_actions().await?.len());
    println!("  Shareholders: {}", store.balances().await?.len());
    Ok(())
}

async fn cmd_reset() -> Result<()> {
    init_tracing();
    let url = settings::database_url();
    let store = open_store(&url).await?;
    let checkpoint = CheckpointManager::new(store, IndexerConfig::default().indexer_version);
    let previous = checkpoint.last_indexed_block().await?;
    checkpoint.reset().await.context("failed to delete checkpoint")?;
    info!(database = %url, previous = ?previous, "checkpoint reset");
    println!("Checkpoint reset (was {})", display_block(previous));
    Ok(())
}

async fn build_indexer() -> Result<ShareIndexer<JsonRpcClient, SqliteStorage>> {
    let settings = Settings::from_env()?;
    let config = IndexerConfig::from_env().context("invalid indexer configuration")?;
    let store = open_store(&settings.database_url).await?;
    let client = JsonRpcClient::new(
        settings.rpc_http_url.clone(),
        settings.rpc_ws_url.clone(),
        RpcClientConfig::default(),
    )?;

    info!(
        rpc = %settings.rpc_http_url,
        ws = ?settings.rpc_ws_url,
        database = %settings.database_url,
        "configuration loaded"
    );
    Ok(IndexerBuilder::from_config(config).build(client, store, settings.contracts)?)
}

async fn open_store(url: &str) -> Result<Arc<SqliteStorage>> {
    let store = SqliteStorage::open(url)
        .await
        .with_context(|| format!("failed to open database '{url}'"))?;
    Ok(Arc::new(store))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn display_block(block: Option<u64>) -> String {
    block.map_or_else(|| "none".to_string(), |b| b.to_string())
}
