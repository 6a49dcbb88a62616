//! Cluster balance ledgers.
//!
//! Each cluster carries an append-only log of balance changes, stored as
//! cumulative `balance_after` values under dense sequence numbers. Merging
//! clusters merges their logs: cumulative values are converted to deltas,
//! interleaved by `(height, tx_index)`, re-accumulated, and written back so
//! the target's log reads as if the clusters had always been one.

use std::sync::Arc;

use bincode::config::standard;
use tracing::debug;

use sift_core::error::{SiftError, StoreError};
use sift_core::schema::{self, ScanBounds};
use sift_core::types::{ClusterId, Hash256, LedgerEntry};

use crate::batch::WriteBatchService;
use crate::kv::Store;

/// One transaction's net effect on a cluster balance, before accumulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaAppend {
    pub txid: Hash256,
    pub height: u64,
    pub tx_index: u64,
    pub delta: i128,
}

/// Balance-ledger read and write operations.
pub struct ClusterBalanceLedger {
    store: Arc<Store>,
}

impl ClusterBalanceLedger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Read a cluster's full ledger in sequence order.
    pub fn read_ledger(&self, cluster: ClusterId) -> Result<Vec<LedgerEntry>, SiftError> {
        let rows = self.store.scan(&ScanBounds::key_prefix(&schema::cluster_prefix(
            schema::P_LEDGER,
            cluster,
        )))?;
        let mut entries = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            schema::parse_ledger_key(&key)?;
            entries.push(decode_entry(&value)?);
        }
        Ok(entries)
    }

    /// Append one block's per-transaction deltas to a cluster's ledger.
    ///
    /// Entries must already be in `(height, tx_index)` order with one entry
    /// per transaction. The cluster balance scalar and the balance index
    /// row move along with the final balance.
    pub fn append_block_deltas(
        &self,
        batch: &mut WriteBatchService,
        cluster: ClusterId,
        deltas: &[DeltaAppend],
    ) -> Result<(), SiftError> {
        if deltas.is_empty() {
            return Ok(());
        }
        let mut sequence = self.store.ledger_count(cluster)?;
        let start_balance = self.store.cluster_balance(cluster)?;
        let mut balance = start_balance;
        for delta in deltas {
            balance = apply_delta(cluster, balance, delta.delta)?;
            let entry = LedgerEntry {
                txid: delta.txid,
                balance_after: balance,
                height: delta.height,
                tx_index: delta.tx_index,
            };
            batch.put(schema::ledger_key(cluster, sequence), encode_entry(&entry)?)?;
            sequence += 1;
        }
        batch.put(schema::ledger_count_key(cluster), sequence.to_le_bytes().to_vec())?;
        if balance != start_balance {
            batch.delete(schema::balance_cluster_key(start_balance, cluster))?;
            batch.put(schema::balance_cluster_key(balance, cluster), Vec::new())?;
            batch.put(
                schema::cluster_balance_key(cluster),
                balance.to_le_bytes().to_vec(),
            )?;
        }
        Ok(())
    }

    /// Merge the ledgers of `sources` into `target`.
    ///
    /// All logs are converted to per-transaction deltas, interleaved by
    /// `(height, tx_index)` with deltas at the same coordinate summed, then
    /// re-accumulated into a single log. Target entries that come out
    /// unchanged at the same sequence are skipped rather than rewritten.
    /// Source logs, counts, balances, and index rows are deleted.
    pub fn merge_ledgers(
        &self,
        batch: &mut WriteBatchService,
        target: ClusterId,
        sources: &[ClusterId],
    ) -> Result<(), SiftError> {
        if sources.is_empty() {
            return Ok(());
        }
        let original = self.read_ledger(target)?;
        let mut streams = Vec::with_capacity(sources.len() + 1);
        streams.push(to_deltas(&original));
        for &source in sources {
            streams.push(to_deltas(&self.read_ledger(source)?));
        }
        let merged = interleave(streams);

        // Re-accumulate and write entries that differ from what is stored.
        let mut balance: u64 = 0;
        let mut changed = 0usize;
        for (sequence, delta) in merged.iter().enumerate() {
            balance = apply_delta(target, balance, delta.delta)?;
            let entry = LedgerEntry {
                txid: delta.txid,
                balance_after: balance,
                height: delta.height,
                tx_index: delta.tx_index,
            };
            if original.get(sequence) != Some(&entry) {
                batch.put(
                    schema::ledger_key(target, sequence as u64),
                    encode_entry(&entry)?,
                )?;
                changed += 1;
            }
        }

        for &source in sources {
            let source_rows = self.store.scan(&ScanBounds::key_prefix(
                &schema::cluster_prefix(schema::P_LEDGER, source),
            ))?;
            for (key, _) in source_rows {
                batch.delete(key)?;
            }
            batch.delete(schema::ledger_count_key(source))?;
            let source_balance = self.store.cluster_balance(source)?;
            batch.delete(schema::cluster_balance_key(source))?;
            batch.delete(schema::balance_cluster_key(source_balance, source))?;
        }

        if !merged.is_empty() {
            batch.put(
                schema::ledger_count_key(target),
                (merged.len() as u64).to_le_bytes().to_vec(),
            )?;
        }
        let old_balance = self.store.cluster_balance(target)?;
        if balance != old_balance {
            batch.delete(schema::balance_cluster_key(old_balance, target))?;
            batch.put(schema::balance_cluster_key(balance, target), Vec::new())?;
            batch.put(
                schema::cluster_balance_key(target),
                balance.to_le_bytes().to_vec(),
            )?;
        }
        debug!(
            cluster = %target,
            sources = sources.len(),
            entries = merged.len(),
            rewritten = changed,
            "merged balance ledgers"
        );
        Ok(())
    }
}

/// Convert a cumulative log back into per-transaction deltas.
fn to_deltas(entries: &[LedgerEntry]) -> Vec<DeltaAppend> {
    let mut deltas = Vec::with_capacity(entries.len());
    let mut previous: u64 = 0;
    for entry in entries {
        deltas.push(DeltaAppend {
            txid: entry.txid,
            height: entry.height,
            tx_index: entry.tx_index,
            delta: i128::from(entry.balance_after) - i128::from(previous),
        });
        previous = entry.balance_after;
    }
    deltas
}

/// K-way merge of delta streams by `(height, tx_index)`, summing deltas at
/// the same coordinate into one entry. Each stream is already sorted.
fn interleave(mut streams: Vec<Vec<DeltaAppend>>) -> Vec<DeltaAppend> {
    let mut cursors = vec![0usize; streams.len()];
    let mut merged: Vec<DeltaAppend> = Vec::new();
    loop {
        let mut best: Option<(usize, (u64, u64))> = None;
        for (i, stream) in streams.iter().enumerate() {
            if let Some(head) = stream.get(cursors[i]) {
                let coord = (head.height, head.tx_index);
                if best.is_none_or(|(_, b)| coord < b) {
                    best = Some((i, coord));
                }
            }
        }
        let Some((i, coord)) = best else { break };
        let head = std::mem::replace(
            &mut streams[i][cursors[i]],
            DeltaAppend { txid: Hash256::ZERO, height: 0, tx_index: 0, delta: 0 },
        );
        cursors[i] += 1;
        match merged.last_mut() {
            Some(last) if (last.height, last.tx_index) == coord => {
                last.delta += head.delta;
            }
            _ => merged.push(head),
        }
    }
    merged
}

/// Apply a signed delta to an unsigned balance, rejecting out-of-range
/// results as corruption.
fn apply_delta(cluster: ClusterId, balance: u64, delta: i128) -> Result<u64, StoreError> {
    let next = i128::from(balance) + delta;
    u64::try_from(next).map_err(|_| {
        StoreError::Corrupt(format!("balance of cluster {cluster} out of range: {next}"))
    })
}

fn encode_entry(entry: &LedgerEntry) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(entry, standard())
        .map_err(|e| StoreError::Corrupt(format!("ledger entry encode: {e}")))
}

fn decode_entry(bytes: &[u8]) -> Result<LedgerEntry, StoreError> {
    let (entry, _) = bincode::decode_from_slice(bytes, standard())
        .map_err(|e| StoreError::Corrupt(format!("ledger entry decode: {e}")))?;
    Ok(entry)
}
