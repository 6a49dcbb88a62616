//! # sift-core
//! Foundation types, key codec, and persistent schema for the Sift
//! address-clustering index.

pub mod codec;
pub mod constants;
pub mod error;
pub mod schema;
pub mod source;
pub mod types;
