//! # sift-store
//! Persistence layer for the Sift index: a RocksDB-backed prefix-tagged
//! keyspace, the crash-safe spill-to-disk write batch, the cluster
//! membership and balance-ledger services, and the read-side query
//! surface.

pub mod addresses;
pub mod batch;
pub mod kv;
pub mod ledger;
pub mod queries;

pub use addresses::ClusterAddressService;
pub use batch::{BatchState, StagedOp, WriteBatchService};
pub use kv::Store;
pub use ledger::{ClusterBalanceLedger, DeltaAppend};
pub use queries::{ClusterQueries, Page};
