//! Error types for the Sift index.
//!
//! `NotFound` is deliberately absent: missing keys surface as `Option` or a
//! zero default at the service boundary and are never an error.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("corrupt key encoding: {0}")] Corrupt(String),
    #[error("truncated key: need {expected} more byte(s), have {have}")] Truncated { expected: usize, have: usize },
    #[error("trailing bytes after decoded key")] TrailingBytes,
    #[error("key prefix mismatch: expected {expected:#04x}, got {got:#04x}")] PrefixMismatch { expected: u8, got: u8 },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage: {0}")] Backend(String),
    #[error("corrupt stored value: {0}")] Corrupt(String),
    #[error(transparent)] Codec(#[from] CodecError),
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("unknown write-batch state byte: {0:#04x}")] UnknownState(u8),
    #[error("corrupt overflow entry: {0}")] CorruptOverflow(String),
    #[error("batch session already committed")] AlreadyCommitted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster created with zero addresses")] EmptyCluster,
    #[error("merge source {0} has no stored members")] EmptyMergeSource(String),
    #[error("merge target {0} equals a merge source")] TargetIsSource(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("upstream unavailable: {0}")] Unavailable(String),
    #[error("no block at height {0}")] UnknownHeight(u64),
}

impl SourceError {
    /// Whether the ingestion driver may retry the failed request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("non-monotonic height: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("balance save for height {0} is ahead of the cluster merge watermark")] PhaseOrder(u64),
    #[error("address {0} has no cluster during balance save")] UnclusteredAddress(String),
}

/// Top-level error, aggregating all concerns.
#[derive(Error, Debug)]
pub enum SiftError {
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Batch(#[from] BatchError),
    #[error(transparent)] Cluster(#[from] ClusterError),
    #[error(transparent)] Source(#[from] SourceError),
    #[error(transparent)] Import(#[from] ImportError),
    #[error("config: {0}")] Config(String),
}
