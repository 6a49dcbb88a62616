//! Block feed loaded from disk.
//!
//! Reads a newline-delimited JSON file of resolved blocks, one block per
//! line, and serves them through the [`BlockSource`] trait. This is the
//! offline counterpart of a live node client: the same pipeline consumes
//! either.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use async_trait::async_trait;

use sift_core::error::{SiftError, SourceError};
use sift_core::source::{BlockSource, MemoryBlockSource};
use sift_core::types::Block;

/// File-backed block source.
#[derive(Debug)]
pub struct FileBlockSource {
    inner: MemoryBlockSource,
}

impl FileBlockSource {
    /// Load blocks from a newline-delimited JSON file.
    ///
    /// Blocks must cover consecutive heights from 0; gaps or disorder are
    /// rejected up front rather than surfacing as import failures later.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SiftError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| SiftError::Config(format!("block feed {}: {e}", path.display())))?;
        let mut blocks: Vec<Block> = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .map_err(|e| SiftError::Config(format!("block feed {}: {e}", path.display())))?;
            if line.trim().is_empty() {
                continue;
            }
            let block: Block = serde_json::from_str(&line).map_err(|e| {
                SiftError::Config(format!(
                    "block feed {} line {}: {e}",
                    path.display(),
                    line_no + 1
                ))
            })?;
            if block.height != blocks.len() as u64 {
                return Err(SiftError::Config(format!(
                    "block feed {} line {}: expected height {}, got {}",
                    path.display(),
                    line_no + 1,
                    blocks.len(),
                    block.height
                )));
            }
            blocks.push(block);
        }
        Ok(Self { inner: MemoryBlockSource::new(blocks) })
    }
}

#[async_trait]
impl BlockSource for FileBlockSource {
    async fn tip_height(&self) -> Result<u64, SourceError> {
        self.inner.tip_height().await
    }

    async fn block_at(&self, height: u64) -> Result<Block, SourceError> {
        self.inner.block_at(height).await
    }
}
