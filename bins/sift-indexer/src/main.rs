//! Sift indexer binary.
//!
//! Ingests resolved blocks from a feed file into the RocksDB-backed
//! cluster index, running the merge and save phases per block, and keeps
//! polling the feed until stopped.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use sift_core::constants::{DEFAULT_DRAIN_CHUNK, DEFAULT_SPILL_THRESHOLD};
use sift_node::{BlockImportService, FileBlockSource, IndexerConfig, IngestPipeline};
use sift_store::Store;
use tracing::{error, info};

/// Sift address-clustering indexer.
#[derive(Parser, Debug)]
#[command(
    name = "sift-indexer",
    version,
    about = "Address clustering and balance index over resolved blocks"
)]
struct Args {
    /// Data directory for the index database
    #[arg(long, default_value = None)]
    data_dir: Option<PathBuf>,

    /// Newline-delimited JSON file of resolved blocks
    #[arg(long)]
    blocks: PathBuf,

    /// Staged operations held in memory before spilling to disk
    #[arg(long, default_value_t = DEFAULT_SPILL_THRESHOLD)]
    spill_threshold: usize,

    /// Overflow rows replayed per write while draining a spilled batch
    #[arg(long, default_value_t = DEFAULT_DRAIN_CHUNK)]
    drain_chunk: usize,

    /// Seconds between polls of the feed once caught up
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Import up to the current feed tip, then exit
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    fn into_config(self) -> (IndexerConfig, PathBuf, bool, String) {
        let defaults = IndexerConfig::default();
        let config = IndexerConfig {
            data_dir: self.data_dir.unwrap_or(defaults.data_dir.clone()),
            spill_threshold: self.spill_threshold,
            drain_chunk: self.drain_chunk,
            poll_interval_secs: self.poll_interval,
            log_level: self.log_level,
            ..defaults
        };
        (config, self.blocks, self.once, self.log_format)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, blocks_path, once, log_format) = args.into_config();

    init_logging(&config.log_level, &log_format);

    info!("Sift Indexer v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("blocks: {:?}", blocks_path);

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data_dir: {}", e);
        process::exit(1);
    }

    let source = match FileBlockSource::load(&blocks_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to load block feed: {}", e);
            process::exit(1);
        }
    };

    let store = match Store::open(config.db_path()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open index database: {}", e);
            process::exit(1);
        }
    };

    let importer =
        match BlockImportService::new(store, config.spill_threshold, config.drain_chunk) {
            Ok(i) => i,
            Err(e) => {
                error!("failed to initialize import service: {}", e);
                process::exit(1);
            }
        };

    let mut pipeline = IngestPipeline::new(source, importer, &config);

    if once {
        match pipeline.catch_up().await {
            Ok(imported) => {
                info!(imported, "caught up with feed tip");
                info!("Sift indexer shutdown complete");
            }
            Err(e) => {
                error!("import failed: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    info!("Sift indexer running (Ctrl+C to stop)");

    let shutdown_signal = async {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("failed to install Ctrl+C handler");
        }
        info!("received Ctrl+C, shutting down...");
    };

    tokio::select! {
        result = pipeline.run() => {
            if let Err(e) = result {
                error!("pipeline exited with error: {}", e);
                process::exit(1);
            }
        }
        _ = shutdown_signal => {
            info!("shutdown signal received");
        }
    }

    info!("Sift indexer shutdown complete");
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output (suitable for log
/// aggregation pipelines). Any other value defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
