//! RocksDB-backed key-value store for the prefix-tagged schema.
//!
//! A single ordered keyspace; every logical table owns one prefix byte
//! (see `sift_core::schema`). All mutations are applied as atomic
//! [`rocksdb::WriteBatch`]es built from staged operations, so a block's
//! effects are never partially visible.

use std::path::Path;

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

use sift_cluster::ClusterResolver;
use sift_core::error::{SiftError, StoreError};
use sift_core::schema::{self, ScanBounds};
use sift_core::types::{Address, ClusterId};

use crate::batch::StagedOp;

/// RocksDB-backed store.
///
/// Read methods translate absent keys into `None`/zero defaults; decode
/// failures of present values are always [`StoreError::Corrupt`] and halt
/// ingestion rather than miscompute balances.
#[derive(Debug)]
pub struct Store {
    db: DB,
}

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path.as_ref()).map_err(backend)?;
        Ok(Self { db })
    }

    /// Raw point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db.get(key).map_err(backend)
    }

    /// Batched point lookups, one round trip.
    pub fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.db
            .multi_get(keys)
            .into_iter()
            .map(|r| r.map_err(backend))
            .collect()
    }

    /// Range scan over encoded keys.
    ///
    /// Bounds are the raw byte bounds from [`ScanBounds::raw_bounds`];
    /// reverse scans walk descending from the exclusive upper bound.
    pub fn scan(&self, bounds: &ScanBounds) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let (lower, upper) = bounds.raw_bounds();
        let mode = if bounds.reverse {
            match &upper {
                Some(u) => IteratorMode::From(u, Direction::Reverse),
                None => IteratorMode::End,
            }
        } else {
            match &lower {
                Some(l) => IteratorMode::From(l, Direction::Forward),
                None => IteratorMode::Start,
            }
        };

        let mut rows = Vec::new();
        for item in self.db.iterator(mode) {
            let (key, value) = item.map_err(backend)?;
            if bounds.reverse {
                // Reverse seek positions at the largest key <= upper; the
                // upper bound is exclusive, so step past an exact hit.
                if let Some(u) = &upper {
                    if key.as_ref() >= u.as_slice() {
                        continue;
                    }
                }
                if let Some(l) = &lower {
                    if key.as_ref() < l.as_slice() {
                        break;
                    }
                }
            } else if let Some(u) = &upper {
                if key.as_ref() >= u.as_slice() {
                    break;
                }
            }
            rows.push((key.to_vec(), value.to_vec()));
            if bounds.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
        }
        Ok(rows)
    }

    /// Apply staged operations as one atomic write.
    pub fn apply(&self, ops: &[StagedOp]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                StagedOp::Put { key, value } => batch.put(key, value),
                StagedOp::Delete { key } => batch.delete(key),
            }
        }
        self.db.write(batch).map_err(backend)
    }

    // --- Typed accessors ---

    /// Get a u64 scalar; absent keys are `None`.
    pub fn get_u64(&self, key: &[u8]) -> Result<Option<u64>, StoreError> {
        match self.get(key)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes);
                Ok(Some(u64::from_le_bytes(raw)))
            }
            Some(_) => Err(StoreError::Corrupt("invalid scalar value length".into())),
            None => Ok(None),
        }
    }

    /// Persisted cluster of an address, if any.
    pub fn address_cluster(&self, address: &Address) -> Result<Option<ClusterId>, StoreError> {
        match self.get(&schema::address_cluster_key(address))? {
            Some(bytes) => Ok(Some(decode_cluster_id_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Batched address→cluster resolution for one block.
    pub fn address_clusters(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<Option<ClusterId>>, StoreError> {
        let keys: Vec<Vec<u8>> = addresses.iter().map(schema::address_cluster_key).collect();
        self.multi_get(&keys)?
            .into_iter()
            .map(|value| value.map(|bytes| decode_cluster_id_value(&bytes)).transpose())
            .collect()
    }

    /// Current balance of an address (0 if never seen).
    pub fn address_balance(&self, address: &Address) -> Result<u64, StoreError> {
        Ok(self.get_u64(&schema::address_balance_key(address))?.unwrap_or(0))
    }

    /// Stored member count of a cluster (0 if unknown).
    pub fn member_count(&self, cluster: ClusterId) -> Result<u64, StoreError> {
        Ok(self.get_u64(&schema::address_count_key(cluster))?.unwrap_or(0))
    }

    /// Ledger length of a cluster (0 if empty).
    pub fn ledger_count(&self, cluster: ClusterId) -> Result<u64, StoreError> {
        Ok(self.get_u64(&schema::ledger_count_key(cluster))?.unwrap_or(0))
    }

    /// Current balance of a cluster (0 if unknown).
    pub fn cluster_balance(&self, cluster: ClusterId) -> Result<u64, StoreError> {
        Ok(self.get_u64(&schema::cluster_balance_key(cluster))?.unwrap_or(0))
    }

    /// Forwarding target of a merged-away cluster, if any.
    pub fn merged_to(&self, cluster: ClusterId) -> Result<Option<ClusterId>, StoreError> {
        match self.get(&schema::merged_to_key(cluster))? {
            Some(bytes) => Ok(Some(decode_cluster_id_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ingestion watermark; `None` means the phase has never run.
    pub fn watermark(&self, tag: u8) -> Result<Option<u64>, StoreError> {
        self.get_u64(&schema::meta_key(tag))
    }
}

impl ClusterResolver for Store {
    fn resolve_addresses(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<Option<ClusterId>>, SiftError> {
        Ok(self.address_clusters(addresses)?)
    }

    fn member_count(&self, cluster: ClusterId) -> Result<u64, SiftError> {
        Ok(Store::member_count(self, cluster)?)
    }
}

/// Encode a ClusterId for use as a stored value.
pub fn encode_cluster_id_value(id: ClusterId) -> Result<Vec<u8>, StoreError> {
    // Values never participate in key ordering, so bincode is fine here.
    bincode::encode_to_vec(id, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(format!("cluster id value encode: {e}")))
}

/// Decode a stored ClusterId value.
pub fn decode_cluster_id_value(bytes: &[u8]) -> Result<ClusterId, StoreError> {
    let (id, _): (ClusterId, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(format!("cluster id value: {e}")))?;
    Ok(id)
}
