//! Upstream block source interface.
//!
//! The blockchain node client (RPC/REST, batching, address resolution)
//! lives outside this workspace; the import pipeline only depends on this
//! trait. [`MemoryBlockSource`] serves tests, mirroring how the in-memory
//! chain store serves the production store's test suite.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::Block;

/// Ordered source of resolved blocks.
///
/// Implementations must return blocks whose transactions carry resolved
/// input addresses and values. Failures that may clear up (node restart,
/// network) are reported as [`SourceError::Unavailable`] and retried by
/// the driver with backoff; the driver never advances a watermark on
/// failure.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Height of the highest block the source can currently serve.
    async fn tip_height(&self) -> Result<u64, SourceError>;

    /// Fetch the block at `height`.
    async fn block_at(&self, height: u64) -> Result<Block, SourceError>;
}

/// In-memory block source for tests: serves a fixed, height-ordered
/// block list.
#[derive(Debug)]
pub struct MemoryBlockSource {
    blocks: Vec<Block>,
}

impl MemoryBlockSource {
    /// Build from blocks at consecutive heights starting at 0.
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    /// Append a block at the next height.
    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    async fn tip_height(&self) -> Result<u64, SourceError> {
        match self.blocks.len() {
            0 => Err(SourceError::Unavailable("no blocks loaded".into())),
            n => Ok(n as u64 - 1),
        }
    }

    async fn block_at(&self, height: u64) -> Result<Block, SourceError> {
        self.blocks
            .get(height as usize)
            .cloned()
            .ok_or(SourceError::UnknownHeight(height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;

    fn block(height: u64) -> Block {
        Block { height, hash: Hash256::digest(&height.to_le_bytes()), transactions: vec![] }
    }

    #[tokio::test]
    async fn serves_blocks_by_height() {
        let source = MemoryBlockSource::new(vec![block(0), block(1)]);
        assert_eq!(source.tip_height().await.unwrap(), 1);
        assert_eq!(source.block_at(1).await.unwrap().height, 1);
    }

    #[tokio::test]
    async fn unknown_height_is_not_retryable() {
        let source = MemoryBlockSource::new(vec![block(0)]);
        let err = source.block_at(5).await.unwrap_err();
        assert_eq!(err, SourceError::UnknownHeight(5));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn empty_source_is_unavailable() {
        let source = MemoryBlockSource::new(vec![]);
        assert!(source.tip_height().await.unwrap_err().is_retryable());
    }
}
