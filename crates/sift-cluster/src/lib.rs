//! # sift-cluster
//! Per-block transient union-find over the addresses touched by a block's
//! transactions, producing merge/create instructions under the
//! common-input-ownership heuristic.

pub mod builder;

pub use builder::{BlockPlan, ClusterBuilder, ClusterResolver, MergeInstruction, NewCluster};
