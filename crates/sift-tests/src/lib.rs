//! Integration test suite for the Sift index.
//!
//! End-to-end ingestion scenarios, crash-recovery behaviour of the write
//! batch, and merge-order properties are exercised here against a real
//! RocksDB store; per-crate unit tests live next to their modules.

pub mod helpers;
