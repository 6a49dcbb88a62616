//! Tunable defaults for ingestion and batching.

/// Number of staged operations held in memory before a batch session
/// spills to the durable overflow log.
pub const DEFAULT_SPILL_THRESHOLD: usize = 8_192;

/// Number of overflow operations applied per real store batch while
/// draining a spilled session.
pub const DEFAULT_DRAIN_CHUNK: usize = 1_024;

/// Depth of the bounded block pipeline between fetch and import.
pub const DEFAULT_PIPELINE_DEPTH: usize = 8;

/// Capacity of the fetched-block cache that lets the balance phase avoid
/// re-fetching blocks the merge phase already pulled.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 64;

/// Initial delay before retrying a failed upstream request.
pub const RETRY_BACKOFF_INITIAL_MS: u64 = 250;

/// Upper bound on the retry backoff delay.
pub const RETRY_BACKOFF_MAX_MS: u64 = 30_000;
