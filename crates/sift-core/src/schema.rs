//! Persistent key schema: prefix-tagged tables over one ordered keyspace.
//!
//! Every table owns a reserved prefix byte; a full key is
//! `prefix ‖ encode(logical key)` with all integer fields in the
//! order-preserving codec. A plain byte-wise ascending scan of a table
//! therefore yields a semantically ascending scan of the logical keys,
//! which every range query in the index depends on.
//!
//! Composite keys place self-delimiting fields first and the only
//! variable-length raw field (the address) last, so each key parses
//! without a length prefix.

use crate::codec::{put_u64, take_u64};
use crate::error::CodecError;
use crate::types::{Address, ClusterId};

// --- Table prefixes ---

/// address → ClusterId
pub const P_ADDRESS_CLUSTER: u8 = 0x01;
/// (cluster, balance, address) → ∅ — membership, balance-ordered
pub const P_MEMBERSHIP: u8 = 0x02;
/// cluster → member address count
pub const P_ADDRESS_COUNT: u8 = 0x03;
/// (cluster, sequence#) → LedgerEntry
pub const P_LEDGER: u8 = 0x04;
/// cluster → ledger entry count
pub const P_LEDGER_COUNT: u8 = 0x05;
/// cluster → current balance
pub const P_CLUSTER_BALANCE: u8 = 0x06;
/// (balance, cluster) → ∅ — top-clusters-by-balance index
pub const P_BALANCE_CLUSTER: u8 = 0x07;
/// source cluster → target cluster, written once per merge
pub const P_MERGED_TO: u8 = 0x08;
/// address → current balance
pub const P_ADDRESS_BALANCE: u8 = 0x09;
/// (sequence#) → staged batch operation — write-batch overflow log
pub const P_OVERFLOW: u8 = 0x10;
/// singleton: write-batch spill state byte
pub const P_BATCH_STATE: u8 = 0x11;
/// ingestion metadata scalars (watermarks)
pub const P_META: u8 = 0x12;

// --- Metadata key tags ---

/// Clusters are consistent up to this height.
pub const META_LAST_MERGED: u8 = 0x01;
/// Balance ledgers are consistent up to this height.
pub const META_LAST_SAVED: u8 = 0x02;

// --- Field helpers ---

/// Append a cluster id's three coordinates.
pub fn put_cluster_id(buf: &mut Vec<u8>, id: ClusterId) {
    put_u64(buf, id.height);
    put_u64(buf, id.tx_index);
    put_u64(buf, id.output_index);
}

/// Decode a cluster id from the front of `input`.
pub fn take_cluster_id(input: &[u8]) -> Result<(ClusterId, &[u8]), CodecError> {
    let (height, rest) = take_u64(input)?;
    let (tx_index, rest) = take_u64(rest)?;
    let (output_index, rest) = take_u64(rest)?;
    Ok((ClusterId { height, tx_index, output_index }, rest))
}

fn strip_prefix(key: &[u8], prefix: u8) -> Result<&[u8], CodecError> {
    match key.split_first() {
        Some((&got, rest)) if got == prefix => Ok(rest),
        Some((&got, _)) => Err(CodecError::PrefixMismatch { expected: prefix, got }),
        None => Err(CodecError::Truncated { expected: 1, have: 0 }),
    }
}

// --- Key builders ---

/// `address → cluster` key.
pub fn address_cluster_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + address.as_bytes().len());
    key.push(P_ADDRESS_CLUSTER);
    key.extend_from_slice(address.as_bytes());
    key
}

/// `address → balance` key.
pub fn address_balance_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + address.as_bytes().len());
    key.push(P_ADDRESS_BALANCE);
    key.extend_from_slice(address.as_bytes());
    key
}

/// Membership key `(cluster, balance, address)`.
pub fn membership_key(cluster: ClusterId, balance: u64, address: &Address) -> Vec<u8> {
    let mut key = vec![P_MEMBERSHIP];
    put_cluster_id(&mut key, cluster);
    put_u64(&mut key, balance);
    key.extend_from_slice(address.as_bytes());
    key
}

/// Parse a membership key into `(cluster, balance, address)`.
pub fn parse_membership_key(key: &[u8]) -> Result<(ClusterId, u64, Address), CodecError> {
    let rest = strip_prefix(key, P_MEMBERSHIP)?;
    let (cluster, rest) = take_cluster_id(rest)?;
    let (balance, rest) = take_u64(rest)?;
    Ok((cluster, balance, Address::from_bytes(rest)))
}

/// Scalar key keyed by cluster id alone (counts, balances, merged-to).
fn cluster_scalar_key(prefix: u8, cluster: ClusterId) -> Vec<u8> {
    let mut key = vec![prefix];
    put_cluster_id(&mut key, cluster);
    key
}

/// `cluster → member count` key.
pub fn address_count_key(cluster: ClusterId) -> Vec<u8> {
    cluster_scalar_key(P_ADDRESS_COUNT, cluster)
}

/// `cluster → ledger length` key.
pub fn ledger_count_key(cluster: ClusterId) -> Vec<u8> {
    cluster_scalar_key(P_LEDGER_COUNT, cluster)
}

/// `cluster → current balance` key.
pub fn cluster_balance_key(cluster: ClusterId) -> Vec<u8> {
    cluster_scalar_key(P_CLUSTER_BALANCE, cluster)
}

/// `source cluster → target cluster` forwarding key.
pub fn merged_to_key(cluster: ClusterId) -> Vec<u8> {
    cluster_scalar_key(P_MERGED_TO, cluster)
}

/// Ledger entry key `(cluster, sequence#)`.
pub fn ledger_key(cluster: ClusterId, sequence: u64) -> Vec<u8> {
    let mut key = vec![P_LEDGER];
    put_cluster_id(&mut key, cluster);
    put_u64(&mut key, sequence);
    key
}

/// Parse a ledger key into `(cluster, sequence#)`.
pub fn parse_ledger_key(key: &[u8]) -> Result<(ClusterId, u64), CodecError> {
    let rest = strip_prefix(key, P_LEDGER)?;
    let (cluster, rest) = take_cluster_id(rest)?;
    let (sequence, rest) = take_u64(rest)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok((cluster, sequence))
}

/// Balance index key `(balance, cluster)`.
pub fn balance_cluster_key(balance: u64, cluster: ClusterId) -> Vec<u8> {
    let mut key = vec![P_BALANCE_CLUSTER];
    put_u64(&mut key, balance);
    put_cluster_id(&mut key, cluster);
    key
}

/// Parse a balance index key into `(balance, cluster)`.
pub fn parse_balance_cluster_key(key: &[u8]) -> Result<(u64, ClusterId), CodecError> {
    let rest = strip_prefix(key, P_BALANCE_CLUSTER)?;
    let (balance, rest) = take_u64(rest)?;
    let (cluster, rest) = take_cluster_id(rest)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok((balance, cluster))
}

/// Overflow log key `(sequence#)`.
pub fn overflow_key(sequence: u64) -> Vec<u8> {
    let mut key = vec![P_OVERFLOW];
    put_u64(&mut key, sequence);
    key
}

/// Parse an overflow log key into its sequence number.
pub fn parse_overflow_key(key: &[u8]) -> Result<u64, CodecError> {
    let rest = strip_prefix(key, P_OVERFLOW)?;
    let (sequence, rest) = take_u64(rest)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(sequence)
}

/// Singleton write-batch state key.
pub fn batch_state_key() -> Vec<u8> {
    vec![P_BATCH_STATE]
}

/// Metadata scalar key.
pub fn meta_key(tag: u8) -> Vec<u8> {
    vec![P_META, tag]
}

/// Key prefix covering one cluster's rows in a composite table
/// (membership or ledger).
pub fn cluster_prefix(table: u8, cluster: ClusterId) -> Vec<u8> {
    let mut key = vec![table];
    put_cluster_id(&mut key, cluster);
    key
}

// --- Range bounds ---

/// Smallest key strictly greater than `key`: `key ‖ 0x00`.
pub fn immediate_successor(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.extend_from_slice(key);
    out.push(0);
    out
}

/// Exclusive upper bound covering every key that starts with `prefix`:
/// increment the last byte, carrying over 0xFF bytes. `None` means the
/// prefix is all 0xFF and the scan is unbounded above.
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.last_mut() {
        if *last == 0xFF {
            out.pop();
        } else {
            *last += 1;
            return Some(out);
        }
    }
    None
}

/// Logical scan bounds over encoded keys.
///
/// Exactly one of `gt`/`gte` and one of `lt`/`lte` may be set; unset
/// bounds default to the whole table when built via [`ScanBounds::table`]
/// or [`ScanBounds::key_prefix`].
#[derive(Clone, Debug, Default)]
pub struct ScanBounds {
    /// Exclusive lower bound.
    pub gt: Option<Vec<u8>>,
    /// Inclusive lower bound.
    pub gte: Option<Vec<u8>>,
    /// Exclusive upper bound.
    pub lt: Option<Vec<u8>>,
    /// Inclusive upper bound.
    pub lte: Option<Vec<u8>>,
    /// Maximum number of rows to yield.
    pub limit: Option<usize>,
    /// Scan in descending key order.
    pub reverse: bool,
}

impl ScanBounds {
    /// Bounds covering an entire table.
    pub fn table(prefix: u8) -> Self {
        Self::key_prefix(&[prefix])
    }

    /// Bounds covering every key starting with `prefix`.
    pub fn key_prefix(prefix: &[u8]) -> Self {
        Self {
            gte: Some(prefix.to_vec()),
            lt: prefix_upper_bound(prefix),
            ..Self::default()
        }
    }

    /// Replace the lower bound with an exclusive one.
    pub fn after(mut self, key: Vec<u8>) -> Self {
        self.gte = None;
        self.gt = Some(key);
        self
    }

    /// Cap the number of rows yielded.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Scan in descending order.
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Normalized `(inclusive lower, exclusive upper)` raw byte bounds.
    ///
    /// `None` lower means "from the beginning"; `None` upper means
    /// unbounded above.
    pub fn raw_bounds(&self) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
        let lower = match (&self.gte, &self.gt) {
            (Some(gte), _) => Some(gte.clone()),
            (None, Some(gt)) => Some(immediate_successor(gt)),
            (None, None) => None,
        };
        let upper = match (&self.lt, &self.lte) {
            (Some(lt), _) => Some(lt.clone()),
            (None, Some(lte)) => Some(immediate_successor(lte)),
            (None, None) => None,
        };
        (lower, upper)
    }
}
