//! Read-side query surface.
//!
//! All queries resolve forwarding pointers first, so callers may hold on
//! to a cluster id across merges and keep getting the surviving cluster.
//! Paginated queries return an opaque hex cursor token that encodes the
//! last yielded key.

use std::collections::HashSet;
use std::sync::Arc;

use sift_core::error::{CodecError, SiftError, StoreError};
use sift_core::schema::{self, ScanBounds};
use sift_core::types::{Address, ClusterId, LedgerEntry};

use crate::kv::Store;

/// A page of results with an optional continuation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Read-only queries over the index.
pub struct ClusterQueries {
    store: Arc<Store>,
}

impl ClusterQueries {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Follow forwarding pointers to the surviving cluster.
    pub fn resolve_cluster(&self, cluster: ClusterId) -> Result<ClusterId, SiftError> {
        let mut current = cluster;
        let mut seen = HashSet::new();
        while let Some(next) = self.store.merged_to(current)? {
            if !seen.insert(current) {
                return Err(StoreError::Corrupt(format!(
                    "forwarding cycle at cluster {current}"
                ))
                .into());
            }
            current = next;
        }
        Ok(current)
    }

    /// The surviving cluster of an address, if it has one.
    pub fn address_cluster(&self, address: &Address) -> Result<Option<ClusterId>, SiftError> {
        match self.store.address_cluster(address)? {
            Some(id) => Ok(Some(self.resolve_cluster(id)?)),
            None => Ok(None),
        }
    }

    /// Current balance of a cluster.
    pub fn cluster_balance(&self, cluster: ClusterId) -> Result<u64, SiftError> {
        let cluster = self.resolve_cluster(cluster)?;
        Ok(self.store.cluster_balance(cluster)?)
    }

    /// Current balance of an address.
    pub fn address_balance(&self, address: &Address) -> Result<u64, SiftError> {
        Ok(self.store.address_balance(address)?)
    }

    /// Member address count of a cluster.
    pub fn member_count(&self, cluster: ClusterId) -> Result<u64, SiftError> {
        let cluster = self.resolve_cluster(cluster)?;
        Ok(self.store.member_count(cluster)?)
    }

    /// Ledger entries of a cluster in chronological order, optionally
    /// restricted to a height range.
    pub fn cluster_transactions(
        &self,
        cluster: ClusterId,
        from_height: Option<u64>,
        to_height: Option<u64>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<LedgerEntry>, SiftError> {
        let cluster = self.resolve_cluster(cluster)?;
        let prefix = schema::cluster_prefix(schema::P_LEDGER, cluster);
        let chunk = limit.max(1);
        let mut bounds = ScanBounds::key_prefix(&prefix).limit(chunk);
        if let Some(token) = cursor {
            bounds = bounds.after(decode_cursor(token)?);
        }

        let mut items = Vec::new();
        let mut last_key: Option<Vec<u8>> = None;
        // Scan in page-sized chunks so a narrow height range on a long
        // ledger never reads the whole prefix into memory.
        'chunks: loop {
            let rows = self.store.scan(&bounds)?;
            let exhausted = rows.len() < chunk;
            for (key, value) in rows {
                let entry = decode_ledger_entry(&value)?;
                if from_height.is_some_and(|from| entry.height < from) {
                    last_key = Some(key);
                    continue;
                }
                if to_height.is_some_and(|to| entry.height > to) {
                    break 'chunks;
                }
                items.push(entry);
                last_key = Some(key);
                if items.len() >= limit {
                    break 'chunks;
                }
            }
            if exhausted {
                break;
            }
            match last_key.clone() {
                Some(key) => bounds = bounds.after(key),
                None => break,
            }
        }
        let next = if items.len() >= limit {
            last_key.map(hex::encode)
        } else {
            None
        };
        Ok(Page { items, next })
    }

    /// Clusters with the highest balances, descending.
    pub fn top_clusters(&self, limit: usize) -> Result<Vec<(ClusterId, u64)>, SiftError> {
        let rows = self
            .store
            .scan(&ScanBounds::table(schema::P_BALANCE_CLUSTER).reverse().limit(limit))?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let (balance, cluster) = schema::parse_balance_cluster_key(&key)?;
            out.push((cluster, balance));
        }
        Ok(out)
    }

    /// Member addresses of a cluster ordered by balance, descending.
    pub fn richest_members(
        &self,
        cluster: ClusterId,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<(Address, u64)>, SiftError> {
        let cluster = self.resolve_cluster(cluster)?;
        let prefix = schema::cluster_prefix(schema::P_MEMBERSHIP, cluster);
        let mut bounds = ScanBounds::key_prefix(&prefix).reverse().limit(limit);
        if let Some(token) = cursor {
            // Continue strictly below the last yielded key.
            bounds.lt = Some(decode_cursor(token)?);
        }

        let rows = self.store.scan(&bounds)?;
        let mut items = Vec::with_capacity(rows.len());
        let mut last_key = None;
        for (key, _) in rows {
            let (_, balance, address) = schema::parse_membership_key(&key)?;
            items.push((address, balance));
            last_key = Some(key);
        }
        let next = if items.len() >= limit {
            last_key.map(hex::encode)
        } else {
            None
        };
        Ok(Page { items, next })
    }
}

fn decode_cursor(token: &str) -> Result<Vec<u8>, SiftError> {
    hex::decode(token)
        .map_err(|_| CodecError::Corrupt("malformed cursor token".into()).into())
}

fn decode_ledger_entry(bytes: &[u8]) -> Result<LedgerEntry, StoreError> {
    let (entry, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(format!("ledger entry decode: {e}")))?;
    Ok(entry)
}
