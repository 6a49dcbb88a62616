//! # sift-node
//! Indexer runtime: configuration, the two-phase block import service,
//! the ingestion pipeline, and block sources.

pub mod cache;
pub mod config;
pub mod feed;
pub mod import;
pub mod pipeline;

pub use cache::BlockCache;
pub use config::IndexerConfig;
pub use feed::FileBlockSource;
pub use import::BlockImportService;
pub use pipeline::IngestPipeline;
