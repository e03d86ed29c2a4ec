//! teraindex — read-only indexer for Bitcoin SV blocks and subtrees.
//!
//! Ingests block and subtree announcements from the overlay, stores
//! transactions content-addressed, builds per-subtree search indexes and
//! merkle trees, and commits block metadata with reorg handling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use teraindex_core::{display_hex, Hash32};
use teraindex_indexer::assembler::{BlockAssembler, BlockOutcome};
use teraindex_indexer::chain::HeaderChain;
use teraindex_indexer::config::Config;
use teraindex_indexer::extract::{NoopExtractor, TermExtractor};
use teraindex_indexer::fetcher::HttpFetcher;
use teraindex_indexer::messages::{overlay_channels, OverlayChannels, CHANNEL_CAPACITY};
use teraindex_indexer::processor::{SubtreeBuildResult, SubtreeProcessor};
use teraindex_indexer::storage::MetadataStore;
use teraindex_store::{ContentStore, MemoryStore, SledStore, TermCache};

#[derive(Parser)]
#[command(name = "teraindex")]
#[command(version, about = "Content-addressed indexer for Bitcoin SV subtrees", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "teraindex.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexer service
    Run,

    /// Show stored chain state
    Status,

    /// Initialize the metadata database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://teraindex.db")]
        database_url: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug)?;

    info!("teraindex starting, version {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(&cli.config).await?,
        Commands::Status => show_status(&cli.config).await?,
        Commands::InitDb { database_url } => init_database(&database_url).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging.
fn init_logging(debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("teraindex=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("teraindex=info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    Ok(())
}

fn load_config(config_path: &str) -> Result<Config> {
    if std::path::Path::new(config_path).exists() {
        Config::from_file(config_path)
    } else {
        info!(
            config = config_path,
            "config file not found, using defaults"
        );
        Ok(Config::default())
    }
}

fn open_content_store(config: &Config) -> Result<Arc<dyn ContentStore>> {
    match config.content_store.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sled" => Ok(Arc::new(SledStore::open(&config.content_store.path)?)),
        other => anyhow::bail!("unknown content store backend '{other}' (use 'sled' or 'memory')"),
    }
}

/// Main indexer service: wire up the pipeline and drive the event loop.
async fn run_indexer(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;

    let store = open_content_store(&config)?;
    let metadata = MetadataStore::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await?;
    metadata.run_migrations().await?;

    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    let cache = Arc::new(TermCache::new(config.cache.term_cache_size));
    // Concrete extractors (addresses, OP_RETURN protocols, ...) register
    // here; the default build indexes nothing.
    let extractor: Arc<dyn TermExtractor> = Arc::new(NoopExtractor);

    let chain = Arc::new(HeaderChain::new());
    let processor = SubtreeProcessor::new(store.clone(), fetcher, extractor, cache);
    let assembler = BlockAssembler::new(
        store.clone(),
        metadata.clone(),
        chain.clone(),
        config.chain.finality_depth,
    );

    // The overlay transport subscribes to the topics for this network and
    // feeds announcements through these senders.
    let (_senders, channels) = overlay_channels(CHANNEL_CAPACITY);
    info!(
        network = config.overlay.network,
        port = config.overlay.listen_port,
        peers = config.overlay.bootstrap_peers.len(),
        "overlay channels ready"
    );

    run_event_loop(processor, assembler, chain, channels).await?;

    store.close().await?;
    metadata.close().await;

    Ok(())
}

/// Single-threaded message loop: one announcement runs to completion before
/// the next is taken. A failed subtree or block is logged and dropped; the
/// overlay re-announces.
async fn run_event_loop(
    processor: SubtreeProcessor,
    assembler: BlockAssembler,
    chain: Arc<HeaderChain>,
    mut channels: OverlayChannels,
) -> Result<()> {
    let mut pending: HashMap<Hash32, SubtreeBuildResult> = HashMap::new();
    let mut status_interval = tokio::time::interval(Duration::from_secs(300));
    status_interval.tick().await; // consume the immediate first tick

    info!("indexer running, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }

            _ = status_interval.tick() => {
                info!(
                    height = chain.height(),
                    pending_subtrees = pending.len(),
                    "status"
                );
            }

            Some(announcement) = channels.subtrees.recv() => {
                let msg = match announcement.parse() {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(peer = announcement.peer_id, error = %e, "bad subtree announcement");
                        continue;
                    }
                };
                match processor.process_subtree(&msg).await {
                    Ok(result) => {
                        pending.insert(msg.merkle_root, result);
                    }
                    Err(e) => {
                        warn!(
                            subtree = %display_hex(&msg.merkle_root),
                            error = %format!("{e:#}"),
                            "subtree failed, awaiting re-announcement"
                        );
                    }
                }
            }

            Some(announcement) = channels.blocks.recv() => {
                let msg = match announcement.parse() {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(peer = announcement.peer_id, error = %e, "bad block announcement");
                        continue;
                    }
                };
                match assembler.handle_block(&msg, &mut pending).await {
                    Ok(BlockOutcome::Committed { .. }) => {}
                    Ok(BlockOutcome::Deferred { missing }) => {
                        warn!(
                            block = %display_hex(&msg.hash),
                            missing = missing.len(),
                            "block deferred, subtrees not yet processed"
                        );
                    }
                    Err(e) => {
                        warn!(
                            block = %display_hex(&msg.hash),
                            error = %format!("{e:#}"),
                            "block failed, awaiting re-announcement"
                        );
                    }
                }
            }

            Some(_) = channels.status.recv() => {
                // Node status beacons are not used by the pipeline.
            }
        }
    }

    Ok(())
}

/// Show stored chain state.
async fn show_status(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;

    let metadata = MetadataStore::new(&config.database.url, None, None)
        .await
        .context("Failed to connect to database")?;
    metadata.run_migrations().await?;

    let stats = metadata.stats().await?;

    println!("\n=== teraindex status ===\n");
    println!("Blocks:   {} ({} orphaned)", stats.block_count, stats.orphan_count);
    println!("Subtrees: {}", stats.subtree_count);

    match metadata.latest_main().await? {
        Some(block) => {
            println!("\nLatest main-chain block:");
            println!("  Height:      {}", block.height);
            println!("  Hash:        {}", display_hex(&block.block_hash));
            println!("  Merkle root: {}", display_hex(&block.merkle_root));
            println!("  Txs:         {}", block.tx_count);
            println!(
                "  Timestamp:   {}",
                chrono::DateTime::from_timestamp(block.timestamp, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string())
            );
        }
        None => println!("\nNo blocks committed yet."),
    }

    println!();
    metadata.close().await;

    Ok(())
}

/// Initialize the metadata database.
async fn init_database(database_url: &str) -> Result<()> {
    info!(url = database_url, "initializing database");

    let metadata = MetadataStore::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;
    metadata.run_migrations().await?;
    metadata
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = metadata.stats().await?;
    info!(
        blocks = stats.block_count,
        subtrees = stats.subtree_count,
        "database initialized"
    );

    metadata.close().await;
    Ok(())
}
