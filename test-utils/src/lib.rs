//! Shared test fixtures: an in-memory storage backend, raw commit writers
//! that bypass the concurrency controller (for simulating an external
//! writer), and row builders.

use std::sync::Arc;

use bytes::Bytes;
use lakehouse_core::actions::{Add, CommitInfo, Format, LogAction, MetaData, Protocol};
use lakehouse_core::log::encode_commit;
use lakehouse_core::parquet_io::Row;
use lakehouse_core::path::commit_path;
use lakehouse_core::storage::{ObjectStoreBackend, StorageBackend};
use lakehouse_core::variant::Value;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;

/// A fresh `InMemory`-backed storage handle, the standard test backend
/// throughout this workspace's test suite.
pub fn memory_backend() -> ObjectStoreBackend {
    ObjectStoreBackend::new(Arc::new(InMemory::new()))
}

pub fn table_root(name: &str) -> StorePath {
    StorePath::from(name)
}

/// Builds a row from `(column, value)` pairs, for concise test fixtures.
pub fn row(pairs: Vec<(&str, Value)>) -> Row {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

pub fn int_row(pairs: Vec<(&str, i64)>) -> Row {
    row(pairs
        .into_iter()
        .map(|(k, v)| (k, Value::Int64(v)))
        .collect())
}

/// Writes a commit file directly to storage, bypassing
/// `ConcurrencyController` entirely — used to simulate a concurrent
/// external writer winning a race.
pub async fn write_raw_commit(
    storage: &dyn StorageBackend,
    root: &StorePath,
    version: u64,
    actions: &[LogAction],
) -> lakehouse_core::DeltaResult<()> {
    let bytes = encode_commit(actions)?;
    let path = commit_path(root, version);
    storage.write(&path, bytes).await
}

/// A minimal CREATE-TABLE action set: Protocol + empty-schema MetaData +
/// CommitInfo, suitable as the first commit of a fresh table fixture.
pub fn bootstrap_actions(table_id: &str, schema_string: &str) -> Vec<LogAction> {
    vec![
        LogAction::Protocol(Protocol::default()),
        LogAction::MetaData(MetaData {
            id: table_id.to_string(),
            name: None,
            description: None,
            format: Format::default(),
            schema_string: schema_string.to_string(),
            partition_columns: vec![],
            configuration: None,
            created_time: Some(0),
        }),
        LogAction::CommitInfo(CommitInfo {
            timestamp: 0,
            operation: "CREATE TABLE".to_string(),
            operation_parameters: None,
            read_version: None,
            isolation_level: None,
            is_blind_append: Some(true),
        }),
    ]
}

pub fn add_action(path: &str, size: i64) -> Add {
    Add {
        path: path.to_string(),
        size,
        modification_time: 0,
        data_change: true,
        partition_values: None,
        stats: None,
        tags: None,
    }
}

/// Writes raw bytes directly under the table root, for simulating orphan
/// data files that predate a vacuum run.
pub async fn write_orphan_file(
    storage: &dyn StorageBackend,
    root: &StorePath,
    relative_path: &str,
    content: &[u8],
) -> lakehouse_core::DeltaResult<()> {
    let path = root.child(relative_path);
    storage.write(&path, Bytes::copy_from_slice(content)).await
}
