//! Indexer configuration.
//!
//! Provides [`IndexerConfig`] with defaults for the data directory, write
//! batch thresholds, and the ingestion pipeline. Values can be customized
//! programmatically or from the command line.

use std::path::PathBuf;

use sift_core::constants::{
    DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_DRAIN_CHUNK, DEFAULT_PIPELINE_DEPTH,
    DEFAULT_SPILL_THRESHOLD,
};

/// Configuration for an indexer instance.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Staged operations held in memory before spilling to the overflow log.
    pub spill_threshold: usize,
    /// Overflow rows replayed per atomic write while draining.
    pub drain_chunk: usize,
    /// Blocks buffered between the fetcher and the importer.
    pub pipeline_depth: usize,
    /// Recently imported blocks kept in memory.
    pub block_cache_capacity: usize,
    /// Seconds to wait for new blocks once caught up with the tip.
    pub poll_interval_secs: u64,
    /// Log level filter string (e.g. "info", "debug", "sift_node=trace").
    pub log_level: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sift");

        Self {
            data_dir,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            drain_chunk: DEFAULT_DRAIN_CHUNK,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            block_cache_capacity: DEFAULT_BLOCK_CACHE_CAPACITY,
            poll_interval_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl IndexerConfig {
    /// Path to the RocksDB index data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("indexdata")
    }
}
