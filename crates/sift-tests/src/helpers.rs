//! Shared test helpers for E2E and integration tests.

use std::sync::Arc;

use sift_core::types::{Address, Block, CoinRef, Hash256, ResolvedTransaction};
use sift_node::BlockImportService;
use sift_store::Store;

/// Simple address from a seed byte.
pub fn addr(seed: u8) -> Address {
    Address::from_bytes(vec![seed; 20])
}

/// A resolved coin attributed to `addr(seed)`.
pub fn coin(seed: u8, value: u64) -> CoinRef {
    CoinRef::addressed(addr(seed), value)
}

/// A transaction with a txid derived from the seed.
pub fn tx(seed: u8, inputs: Vec<CoinRef>, outputs: Vec<CoinRef>) -> ResolvedTransaction {
    ResolvedTransaction { txid: Hash256::digest(&[seed]), inputs, outputs }
}

/// A block reward transaction paying a single output.
pub fn reward(seed: u8, value: u64) -> ResolvedTransaction {
    tx(seed, vec![], vec![coin(seed, value)])
}

/// A block at the given height.
pub fn block(height: u64, txs: Vec<ResolvedTransaction>) -> Block {
    Block { height, hash: Hash256::digest(&height.to_le_bytes()), transactions: txs }
}

/// A fresh store in a temp directory.
pub fn temp_store() -> (Arc<Store>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = Arc::new(Store::open(dir.path().join("index")).expect("open store"));
    (store, dir)
}

/// An import service over a fresh store.
pub fn importer(store: Arc<Store>) -> BlockImportService {
    BlockImportService::new(store, 1024, 256).expect("open import service")
}

/// Import a chain of blocks in order.
pub fn import_chain(importer: &mut BlockImportService, blocks: &[Block]) {
    for b in blocks {
        importer.import_block(b).expect("import block");
    }
}
