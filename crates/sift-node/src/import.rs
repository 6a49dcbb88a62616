//! Two-phase block import.
//!
//! Every block passes through two independently committed phases:
//!
//! 1. **Merge phase** — run the per-block union-find, create new clusters
//!    and apply merges, then advance the merge watermark.
//! 2. **Save phase** — apply the block's value flows to address balances,
//!    membership rows, and cluster ledgers, then advance the save
//!    watermark.
//!
//! Each phase skips blocks at or below its own watermark, so replaying
//! blocks after a crash between the two commits is idempotent: the merge
//! phase no-ops and the save phase picks up where it stopped. The save
//! phase never runs ahead of the merge phase.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use sift_cluster::ClusterBuilder;
use sift_core::error::{ImportError, SiftError, StoreError};
use sift_core::schema::{self, META_LAST_MERGED, META_LAST_SAVED};
use sift_core::types::{Address, Block, ClusterId};
use sift_store::{ClusterAddressService, ClusterBalanceLedger, DeltaAppend, Store, WriteBatchService};

/// Applies blocks to the index in strict height order.
pub struct BlockImportService {
    store: Arc<Store>,
    addresses: ClusterAddressService,
    ledger: ClusterBalanceLedger,
    batch: WriteBatchService,
}

impl BlockImportService {
    /// Open the import service, recovering any interrupted write batch
    /// before new work is accepted.
    pub fn new(
        store: Arc<Store>,
        spill_threshold: usize,
        drain_chunk: usize,
    ) -> Result<Self, SiftError> {
        let mut batch = WriteBatchService::new(store.clone(), spill_threshold, drain_chunk)?;
        batch.process()?;
        Ok(Self {
            addresses: ClusterAddressService::new(store.clone()),
            ledger: ClusterBalanceLedger::new(store.clone()),
            batch,
            store,
        })
    }

    /// Height up to which clusters are consistent.
    pub fn last_merged_height(&self) -> Result<Option<u64>, SiftError> {
        Ok(self.store.watermark(META_LAST_MERGED)?)
    }

    /// Height up to which balances and ledgers are consistent.
    pub fn last_saved_height(&self) -> Result<Option<u64>, SiftError> {
        Ok(self.store.watermark(META_LAST_SAVED)?)
    }

    /// Next block height the index needs, from the phase furthest behind.
    pub fn next_height(&self) -> Result<u64, SiftError> {
        let merged = self.last_merged_height()?.map_or(0, |h| h + 1);
        let saved = self.last_saved_height()?.map_or(0, |h| h + 1);
        Ok(merged.min(saved))
    }

    /// Run both phases for one block.
    pub fn import_block(&mut self, block: &Block) -> Result<(), SiftError> {
        self.merge_phase(block)?;
        self.save_phase(block)?;
        Ok(())
    }

    /// Phase one: cluster creation and merging.
    ///
    /// Returns `false` when the block is at or below the merge watermark
    /// and was skipped.
    pub fn merge_phase(&mut self, block: &Block) -> Result<bool, SiftError> {
        let watermark = self.last_merged_height()?;
        if watermark.is_some_and(|merged| block.height <= merged) {
            return Ok(false);
        }
        let expected = watermark.map_or(0, |merged| merged + 1);
        if block.height != expected {
            return Err(ImportError::HeightMismatch { expected, got: block.height }.into());
        }

        let plan = ClusterBuilder::new(self.store.as_ref()).process_block(block)?;
        for creation in &plan.creations {
            self.addresses
                .create_cluster(&mut self.batch, creation.id, &creation.addresses)?;
        }
        for merge in &plan.merges {
            self.addresses.merge_addresses(
                &mut self.batch,
                merge.target,
                &merge.sources,
                &merge.new_addresses,
            )?;
            self.ledger
                .merge_ledgers(&mut self.batch, merge.target, &merge.sources)?;
        }
        self.batch.put(
            schema::meta_key(META_LAST_MERGED),
            block.height.to_le_bytes().to_vec(),
        )?;
        self.batch.commit()?;
        info!(
            height = block.height,
            hash = %block.hash,
            created = plan.creations.len(),
            merged = plan.merges.len(),
            "merge phase committed"
        );
        Ok(true)
    }

    /// Phase two: balance and ledger updates.
    ///
    /// Returns `false` when the block is at or below the save watermark
    /// and was skipped.
    pub fn save_phase(&mut self, block: &Block) -> Result<bool, SiftError> {
        let watermark = self.last_saved_height()?;
        if watermark.is_some_and(|saved| block.height <= saved) {
            return Ok(false);
        }
        let expected = watermark.map_or(0, |saved| saved + 1);
        if block.height != expected {
            return Err(ImportError::HeightMismatch { expected, got: block.height }.into());
        }
        if self
            .last_merged_height()?
            .is_none_or(|merged| block.height > merged)
        {
            return Err(ImportError::PhaseOrder(block.height).into());
        }

        // Clusters for every address the block touches; all were assigned
        // by the merge phase.
        let mut order: Vec<Address> = Vec::new();
        let mut seen: HashMap<&Address, ()> = HashMap::new();
        for tx in &block.transactions {
            for coin in tx.inputs.iter().chain(tx.outputs.iter()) {
                if let Some(addr) = &coin.address {
                    if seen.insert(addr, ()).is_none() {
                        order.push(addr.clone());
                    }
                }
            }
        }
        let resolved = self.store.address_clusters(&order)?;
        let mut clusters: HashMap<Address, ClusterId> = HashMap::with_capacity(order.len());
        for (addr, cluster) in order.into_iter().zip(resolved) {
            let Some(cluster) = cluster else {
                return Err(ImportError::UnclusteredAddress(addr.to_string()).into());
            };
            clusters.insert(addr, cluster);
        }

        // Per-transaction net deltas per cluster, and per-block net deltas
        // per address.
        let mut cluster_deltas: HashMap<ClusterId, Vec<DeltaAppend>> = HashMap::new();
        let mut address_deltas: HashMap<Address, i128> = HashMap::new();
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let mut tx_address: HashMap<&Address, i128> = HashMap::new();
            for coin in &tx.outputs {
                if let Some(addr) = &coin.address {
                    *tx_address.entry(addr).or_default() += i128::from(coin.value);
                }
            }
            for coin in &tx.inputs {
                if let Some(addr) = &coin.address {
                    *tx_address.entry(addr).or_default() -= i128::from(coin.value);
                }
            }
            let mut tx_cluster: HashMap<ClusterId, i128> = HashMap::new();
            for (addr, delta) in &tx_address {
                *address_deltas.entry((*addr).clone()).or_default() += delta;
                *tx_cluster.entry(clusters[*addr]).or_default() += delta;
            }
            // One ledger entry per touched cluster, even at net zero.
            let mut touched: Vec<(ClusterId, i128)> = tx_cluster.into_iter().collect();
            touched.sort_by_key(|(cluster, _)| *cluster);
            for (cluster, delta) in touched {
                cluster_deltas.entry(cluster).or_default().push(DeltaAppend {
                    txid: tx.txid,
                    height: block.height,
                    tx_index: tx_index as u64,
                    delta,
                });
            }
        }

        // Address balances and their balance-ordered membership rows.
        let mut moved: Vec<(Address, i128)> = address_deltas
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .collect();
        moved.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (addr, delta) in moved {
            let old_balance = self.store.address_balance(&addr)?;
            let next = i128::from(old_balance) + delta;
            let new_balance = u64::try_from(next).map_err(|_| {
                StoreError::Corrupt(format!("balance of address {addr} out of range: {next}"))
            })?;
            let cluster = clusters[&addr];
            self.batch
                .delete(schema::membership_key(cluster, old_balance, &addr))?;
            self.batch
                .put(schema::membership_key(cluster, new_balance, &addr), Vec::new())?;
            self.batch.put(
                schema::address_balance_key(&addr),
                new_balance.to_le_bytes().to_vec(),
            )?;
        }

        let mut ordered: Vec<(ClusterId, Vec<DeltaAppend>)> =
            cluster_deltas.into_iter().collect();
        ordered.sort_by_key(|(cluster, _)| *cluster);
        let touched = ordered.len();
        for (cluster, deltas) in ordered {
            self.ledger
                .append_block_deltas(&mut self.batch, cluster, &deltas)?;
        }

        self.batch.put(
            schema::meta_key(META_LAST_SAVED),
            block.height.to_le_bytes().to_vec(),
        )?;
        self.batch.commit()?;
        info!(
            height = block.height,
            hash = %block.hash,
            clusters = touched,
            "save phase committed"
        );
        Ok(true)
    }
}
