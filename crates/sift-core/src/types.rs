//! Core index types: addresses, cluster identifiers, resolved blocks.
//!
//! Blocks arrive from the upstream node with input addresses and values
//! already resolved; the index never inspects scripts or validates
//! consensus rules. All monetary values use u64 base units.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte hash value, used for transaction and block identifiers.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// BLAKE3 digest of arbitrary input bytes.
    pub fn digest(input: &[u8]) -> Self {
        Self(blake3::hash(input).into())
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An address in canonical binary form.
///
/// The wire representation (base58/bech32) is decoded upstream; the index
/// only ever sees and stores these raw bytes. Byte-wise ordering of the
/// binary form is the ordering used throughout the key schema.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct Address(pub Vec<u8>);

impl Address {
    /// Create an address from raw canonical bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The canonical binary form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Stable, totally ordered cluster identifier.
///
/// A cluster's id is the coordinate of the event that first created it:
/// block height, transaction index within the block, output index within
/// the transaction. Comparison is field-wise ascending, which the derived
/// `Ord` provides, and the key codec preserves that order byte-wise.
///
/// Ids are immutable once assigned; merges always fold higher ids into the
/// canonical lowest one kept by the surviving cluster.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct ClusterId {
    /// Block height of the creating event.
    pub height: u64,
    /// Transaction index within the block.
    pub tx_index: u64,
    /// Output index within the transaction.
    pub output_index: u64,
}

impl ClusterId {
    /// Construct from creation coordinates.
    pub fn new(height: u64, tx_index: u64, output_index: u64) -> Self {
        Self { height, tx_index, output_index }
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.height, self.tx_index, self.output_index)
    }
}

/// One side of a transaction with its resolved address and value.
///
/// `address` is `None` when the upstream could not attribute the coin to an
/// address (e.g. non-standard or data-carrier outputs). Such coins never
/// participate in clustering or balance tracking.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CoinRef {
    /// Resolved address, if attributable.
    pub address: Option<Address>,
    /// Value in base units.
    pub value: u64,
}

impl CoinRef {
    /// A coin attributed to an address.
    pub fn addressed(address: Address, value: u64) -> Self {
        Self { address: Some(address), value }
    }
}

/// A transaction with all input addresses and values resolved upstream.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct ResolvedTransaction {
    /// Transaction identifier.
    pub txid: Hash256,
    /// Inputs with resolved previous-output addresses and values.
    /// Empty for coinbase transactions.
    pub inputs: Vec<CoinRef>,
    /// Outputs with resolved addresses and values.
    pub outputs: Vec<CoinRef>,
}

impl ResolvedTransaction {
    /// Candidate CoinJoin classification.
    ///
    /// A transaction is treated as a mixing transaction when it has at
    /// least two inputs, the same number of inputs and outputs, and every
    /// input and output carries one identical value. Mixing transactions
    /// contribute no unions between their input addresses.
    pub fn is_mixing(&self) -> bool {
        if self.inputs.len() < 2 || self.inputs.len() != self.outputs.len() {
            return false;
        }
        let value = self.inputs[0].value;
        self.inputs.iter().all(|c| c.value == value)
            && self.outputs.iter().all(|c| c.value == value)
    }
}

/// An ordered block with all of its transactions resolved.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Block height. Blocks are delivered in strict height order.
    pub height: u64,
    /// Block hash, carried for logging and upstream cross-checks.
    pub hash: Hash256,
    /// Transactions in block order.
    pub transactions: Vec<ResolvedTransaction>,
}

/// One entry of a cluster's balance event log.
///
/// Stored under `(cluster, sequence#)`; the sequence is dense from 0 and
/// strictly increasing with `(height, tx_index)`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct LedgerEntry {
    /// Transaction that produced this balance change.
    pub txid: Hash256,
    /// Cluster balance after applying this transaction's net delta.
    pub balance_after: u64,
    /// Block height of the transaction.
    pub height: u64,
    /// Transaction index within the block.
    pub tx_index: u64,
}
