//! A Delta Lake compatible table engine: transactional, snapshot-isolated,
//! log-structured table format over any `object_store`-backed storage.
//!
//! Start at [`table::Table`] for the top-level handle, [`snapshot::Snapshot`]
//! for the immutable point-in-time view, and [`write::WriteOptions`] /
//! [`read::QueryOptions`] for the write and read entry points.

pub mod actions;
pub mod checkpoint;
pub mod concurrency;
pub mod error;
pub mod filter;
pub mod log;
pub mod parquet_io;
pub mod path;
pub mod retry;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod table;
pub mod vacuum;
pub mod variant;
pub mod write;

/// Table versions are non-negative and strictly monotonic per commit.
/// Represented as `u64` rather than `i64` despite the wire format's
/// signed-JSON-number convention, since a version can never be negative
/// and callers benefit from the narrower type.
pub type Version = u64;

pub use error::{DeltaResult, Error};
pub use table::Table;
