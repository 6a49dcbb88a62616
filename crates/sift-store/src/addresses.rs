//! Cluster membership maintenance.
//!
//! Creates clusters, merges their member sets, and keeps the
//! address→cluster mapping, per-cluster member counts, the balance-ordered
//! membership rows, and the merged-to forwarding pointers in step. All
//! writes go through the caller's [`WriteBatchService`], so one block's
//! cluster changes land atomically.

use std::sync::Arc;

use tracing::debug;

use sift_core::error::{ClusterError, SiftError};
use sift_core::schema::{self, ScanBounds};
use sift_core::types::{Address, ClusterId};

use crate::batch::WriteBatchService;
use crate::kv::{encode_cluster_id_value, Store};

/// Membership-side write operations for clusters.
pub struct ClusterAddressService {
    store: Arc<Store>,
}

impl ClusterAddressService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create a cluster with its initial member addresses.
    ///
    /// Every new cluster also gets a zero balance scalar and a row in the
    /// balance index, so it is visible to balance queries from creation.
    pub fn create_cluster(
        &self,
        batch: &mut WriteBatchService,
        id: ClusterId,
        addresses: &[Address],
    ) -> Result<(), SiftError> {
        if addresses.is_empty() {
            return Err(ClusterError::EmptyCluster.into());
        }
        let id_value = encode_cluster_id_value(id)?;
        for address in addresses {
            batch.put(schema::membership_key(id, 0, address), Vec::new())?;
            batch.put(schema::address_cluster_key(address), id_value.clone())?;
        }
        batch.put(
            schema::address_count_key(id),
            (addresses.len() as u64).to_le_bytes().to_vec(),
        )?;
        batch.put(schema::cluster_balance_key(id), 0u64.to_le_bytes().to_vec())?;
        batch.put(schema::balance_cluster_key(0, id), Vec::new())?;
        debug!(cluster = %id, members = addresses.len(), "created cluster");
        Ok(())
    }

    /// Fold the members of `sources` into `target` and add `new_addresses`.
    ///
    /// Source membership rows move to the target keeping their per-address
    /// balances; each source gets a forwarding pointer and loses its member
    /// count. Balance scalars and ledgers are handled separately by the
    /// ledger merge.
    pub fn merge_addresses(
        &self,
        batch: &mut WriteBatchService,
        target: ClusterId,
        sources: &[ClusterId],
        new_addresses: &[Address],
    ) -> Result<(), SiftError> {
        if sources.is_empty() && new_addresses.is_empty() {
            return Ok(());
        }
        let target_value = encode_cluster_id_value(target)?;
        let mut moved: u64 = 0;

        for &source in sources {
            if source == target {
                return Err(ClusterError::TargetIsSource(target.to_string()).into());
            }
            let rows = self.store.scan(&ScanBounds::key_prefix(&schema::cluster_prefix(
                schema::P_MEMBERSHIP,
                source,
            )))?;
            if rows.is_empty() {
                return Err(ClusterError::EmptyMergeSource(source.to_string()).into());
            }
            for (key, _) in rows {
                let (_, balance, address) = schema::parse_membership_key(&key)?;
                batch.delete(key)?;
                batch.put(schema::membership_key(target, balance, &address), Vec::new())?;
                batch.put(schema::address_cluster_key(&address), target_value.clone())?;
                moved += 1;
            }
            batch.delete(schema::address_count_key(source))?;
            batch.put(schema::merged_to_key(source), target_value.clone())?;
        }

        for address in new_addresses {
            batch.put(schema::membership_key(target, 0, address), Vec::new())?;
            batch.put(schema::address_cluster_key(address), target_value.clone())?;
        }

        let count = self.store.member_count(target)?
            + moved
            + new_addresses.len() as u64;
        batch.put(schema::address_count_key(target), count.to_le_bytes().to_vec())?;
        debug!(
            cluster = %target,
            sources = sources.len(),
            moved,
            added = new_addresses.len(),
            "merged cluster members"
        );
        Ok(())
    }
}
