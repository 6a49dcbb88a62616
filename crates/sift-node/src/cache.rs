//! Bounded in-memory cache of recently imported blocks.

use std::collections::{HashMap, VecDeque};

use sift_core::types::Block;

/// FIFO block cache keyed by height.
///
/// Holds the most recently inserted blocks up to a fixed capacity; the
/// oldest insertion is evicted first. Serves re-reads during catch-up and
/// diagnostics without a trip to the upstream source.
pub struct BlockCache {
    capacity: usize,
    order: VecDeque<u64>,
    blocks: HashMap<u64, Block>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            blocks: HashMap::with_capacity(capacity),
        }
    }

    /// Insert a block, evicting the oldest entry at capacity.
    /// Re-inserting a cached height refreshes the block without eviction.
    pub fn insert(&mut self, block: Block) {
        if self.capacity == 0 {
            return;
        }
        let height = block.height;
        if self.blocks.insert(height, block).is_some() {
            return;
        }
        self.order.push_back(height);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.blocks.remove(&evicted);
            }
        }
    }

    pub fn get(&self, height: u64) -> Option<&Block> {
        self.blocks.get(&height)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::types::Hash256;

    fn block(height: u64) -> Block {
        Block { height, hash: Hash256::digest(&height.to_le_bytes()), transactions: vec![] }
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut cache = BlockCache::new(2);
        cache.insert(block(1));
        cache.insert(block(2));
        cache.insert(block(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn reinsert_does_not_evict() {
        let mut cache = BlockCache::new(2);
        cache.insert(block(1));
        cache.insert(block(2));
        cache.insert(block(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let mut cache = BlockCache::new(0);
        cache.insert(block(1));
        assert!(cache.is_empty());
    }
}
