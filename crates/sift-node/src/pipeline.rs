//! Ingestion pipeline: fetch blocks ahead of the importer.
//!
//! A fetcher task streams blocks from the upstream source through a
//! bounded channel while the importer applies them, so fetch latency and
//! import work overlap. Heights already held in the block cache (from an
//! earlier attempt that failed or was interrupted) are re-served without
//! a source round trip. Upstream failures that are retryable back off
//! exponentially; anything else stops the pipeline.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use sift_core::constants::{RETRY_BACKOFF_INITIAL_MS, RETRY_BACKOFF_MAX_MS};
use sift_core::error::SiftError;
use sift_core::source::BlockSource;

use crate::cache::BlockCache;
use crate::config::IndexerConfig;
use crate::import::BlockImportService;

/// Drives block ingestion from a source into the import service.
pub struct IngestPipeline<S: BlockSource + Send + Sync + 'static> {
    source: Arc<S>,
    importer: BlockImportService,
    cache: Arc<Mutex<BlockCache>>,
    depth: usize,
    poll_interval: Duration,
}

impl<S: BlockSource + Send + Sync + 'static> IngestPipeline<S> {
    pub fn new(source: Arc<S>, importer: BlockImportService, config: &IndexerConfig) -> Self {
        Self {
            source,
            importer,
            cache: Arc::new(Mutex::new(BlockCache::new(config.block_cache_capacity))),
            depth: config.pipeline_depth.max(1),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// Recently imported blocks.
    pub fn cache(&self) -> Arc<Mutex<BlockCache>> {
        self.cache.clone()
    }

    /// Import everything from the current position up to the source tip.
    ///
    /// Returns the number of blocks imported; zero means the index is
    /// caught up.
    pub async fn catch_up(&mut self) -> Result<u64, SiftError> {
        let tip = self.source.tip_height().await?;
        let next = self.importer.next_height()?;
        if next > tip {
            return Ok(0);
        }
        debug!(next, tip, "catching up with source");

        let (sender, mut receiver) = mpsc::channel(self.depth);
        let source = self.source.clone();
        let cache = self.cache.clone();
        let fetcher = tokio::spawn(async move {
            for height in next..=tip {
                let cached = cache.lock().get(height).cloned();
                let result = match cached {
                    Some(block) => Ok(block),
                    None => source.block_at(height).await,
                };
                let failed = result.is_err();
                if sender.send(result).await.is_err() || failed {
                    break;
                }
            }
        });

        let mut imported = 0;
        while let Some(result) = receiver.recv().await {
            let block = result?;
            self.cache.lock().insert(block.clone());
            self.importer.import_block(&block)?;
            imported += 1;
        }
        let _ = fetcher.await;
        Ok(imported)
    }

    /// Run until an unrecoverable error: catch up, then poll for new
    /// blocks, backing off on retryable source failures.
    pub async fn run(mut self) -> Result<(), SiftError> {
        let initial = Duration::from_millis(RETRY_BACKOFF_INITIAL_MS);
        let max = Duration::from_millis(RETRY_BACKOFF_MAX_MS);
        let mut backoff = initial;
        info!(next = self.importer.next_height()?, "ingestion pipeline started");
        loop {
            match self.catch_up().await {
                Ok(0) => {
                    backoff = initial;
                    sleep(self.poll_interval).await;
                }
                Ok(imported) => {
                    backoff = initial;
                    debug!(imported, "caught up with source tip");
                }
                Err(SiftError::Source(e)) if e.is_retryable() => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "source failure, retrying");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(max);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The import service, for inspection after a catch-up.
    pub fn importer(&self) -> &BlockImportService {
        &self.importer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::source::MemoryBlockSource;
    use sift_core::types::{Address, Block, CoinRef, Hash256, ResolvedTransaction};
    use sift_store::Store;

    fn addr(seed: u8) -> Address {
        Address::from_bytes(vec![seed; 20])
    }

    fn block(height: u64, txs: Vec<ResolvedTransaction>) -> Block {
        Block { height, hash: Hash256::digest(&height.to_le_bytes()), transactions: txs }
    }

    fn reward(seed: u8, value: u64) -> ResolvedTransaction {
        ResolvedTransaction {
            txid: Hash256::digest(&[seed]),
            inputs: vec![],
            outputs: vec![CoinRef::addressed(addr(seed), value)],
        }
    }

    fn pipeline(
        source: MemoryBlockSource,
    ) -> (Arc<Store>, IngestPipeline<MemoryBlockSource>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("index")).unwrap());
        let importer = BlockImportService::new(store.clone(), 1024, 256).unwrap();
        let config = IndexerConfig::default();
        (store, IngestPipeline::new(Arc::new(source), importer, &config), dir)
    }

    #[tokio::test]
    async fn catch_up_imports_every_block_to_the_tip() {
        let mut source = MemoryBlockSource::new(vec![]);
        for h in 0..5 {
            source.push(block(h, vec![reward(h as u8 + 1, 10)]));
        }
        let (store, mut pipeline, _dir) = pipeline(source);

        assert_eq!(pipeline.catch_up().await.unwrap(), 5);
        assert_eq!(pipeline.importer().last_saved_height().unwrap(), Some(4));
        assert_eq!(store.address_balance(&addr(3)).unwrap(), 10);
    }

    #[tokio::test]
    async fn catch_up_when_already_at_tip_is_a_no_op() {
        let mut source = MemoryBlockSource::new(vec![]);
        source.push(block(0, vec![reward(1, 10)]));
        let (_store, mut pipeline, _dir) = pipeline(source);

        assert_eq!(pipeline.catch_up().await.unwrap(), 1);
        assert_eq!(pipeline.catch_up().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn catch_up_fills_the_block_cache() {
        let mut source = MemoryBlockSource::new(vec![]);
        for h in 0..3 {
            source.push(block(h, vec![reward(h as u8 + 1, 10)]));
        }
        let (_store, mut pipeline, _dir) = pipeline(source);
        pipeline.catch_up().await.unwrap();

        let cache = pipeline.cache();
        let cache = cache.lock();
        assert_eq!(cache.len(), 3);
        assert!(cache.get(2).is_some());
    }

    #[tokio::test]
    async fn catch_up_serves_cached_blocks_without_the_source() {
        let mut source = MemoryBlockSource::new(vec![]);
        source.push(block(0, vec![reward(1, 10)]));
        source.push(block(1, vec![reward(2, 10)]));
        let (store, mut pipeline, _dir) = pipeline(source);
        // A block left over from an interrupted attempt takes precedence
        // over whatever the source would return for its height.
        pipeline.cache().lock().insert(block(1, vec![reward(9, 25)]));

        assert_eq!(pipeline.catch_up().await.unwrap(), 2);
        assert_eq!(store.address_balance(&addr(9)).unwrap(), 25);
        assert_eq!(store.address_balance(&addr(2)).unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_source_reports_unavailable() {
        let (_store, mut pipeline, _dir) = pipeline(MemoryBlockSource::new(vec![]));
        let err = pipeline.catch_up().await.unwrap_err();
        assert!(matches!(err, SiftError::Source(_)));
    }
}
