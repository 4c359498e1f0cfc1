//! Snapshot reconstruction via log replay, optionally starting from a
//! checkpoint, via a `SnapshotBuilder`: a consuming builder culminating
//! in `build`/`build_latest`.

use std::collections::HashMap;
use std::sync::Arc;

use object_store::path::Path as StorePath;

use crate::actions::{Add, LogAction, MetaData, Protocol};
use crate::checkpoint::{read_checkpoint, read_last_checkpoint};
use crate::error::{DeltaResult, Error};
use crate::log::{discover_latest_version, read_commit};
use crate::storage::StorageBackend;
use crate::Version;

/// An immutable, materialized view of table state at a given version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: Version,
    pub metadata: MetaData,
    pub protocol: Protocol,
    files: Arc<HashMap<String, Add>>,
    pub timestamp: i64,
}

impl Snapshot {
    pub fn builder(table_root: StorePath) -> SnapshotBuilder {
        SnapshotBuilder {
            table_root,
            at_version: None,
            strict_corruption: false,
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &Add> {
        self.files.values()
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn get_file(&self, path: &str) -> Option<&Add> {
        self.files.get(path)
    }

    /// `delta.columnMapping.mode`; schema parse failure collapses the
    /// mapping to empty rather than erroring.
    pub fn column_mapping(&self) -> HashMap<String, String> {
        let mode = self.metadata.column_mapping_mode();
        if mode != "name" && mode != "id" {
            return HashMap::new();
        }
        match crate::schema::parse_schema_string(&self.metadata.schema_string) {
            Ok(schema) => schema
                .fields
                .iter()
                .filter_map(|f| Some((f.physical_name()?.to_string(), f.name.clone())))
                .collect(),
            Err(_) => HashMap::new(),
        }
    }
}

pub struct SnapshotBuilder {
    table_root: StorePath,
    at_version: Option<Version>,
    strict_corruption: bool,
}

impl SnapshotBuilder {
    pub fn at_version(mut self, version: Version) -> Self {
        self.at_version = Some(version);
        self
    }

    /// Opt-in strict mode: aborts on the first unparseable commit instead
    /// of logging and continuing.
    pub fn strict_corruption(mut self, strict: bool) -> Self {
        self.strict_corruption = strict;
        self
    }

    pub async fn build_latest(self, storage: &dyn StorageBackend) -> DeltaResult<Snapshot> {
        let latest = discover_latest_version(storage, &self.table_root)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}: no commits found", self.table_root)))?;
        self.at_version(latest).build(storage).await
    }

    pub async fn build(self, storage: &dyn StorageBackend) -> DeltaResult<Snapshot> {
        let at = self.at_version.ok_or_else(|| {
            Error::invalid_input("SnapshotBuilder requires at_version or build_latest")
        })?;

        let mut files: HashMap<String, Add> = HashMap::new();
        let mut metadata: Option<MetaData> = None;
        let mut protocol: Option<Protocol> = None;
        let mut start_version = 0;

        if let Some(checkpoint_ptr) = read_last_checkpoint(storage, &self.table_root).await? {
            if checkpoint_ptr.version <= at {
                if let Some(actions) =
                    read_checkpoint(storage, &self.table_root, checkpoint_ptr.version, checkpoint_ptr.parts)
                        .await
                {
                    apply_actions(&actions, &mut files, &mut metadata, &mut protocol);
                    start_version = checkpoint_ptr.version + 1;
                    tracing::debug!(
                        checkpoint_version = checkpoint_ptr.version,
                        "resumed snapshot from checkpoint"
                    );
                } else {
                    tracing::warn!(
                        checkpoint_version = checkpoint_ptr.version,
                        "checkpoint missing or corrupt, falling back to full log replay"
                    );
                }
            }
        }

        for version in start_version..=at {
            let commit_result = read_commit(storage, &self.table_root, version).await;
            let actions = match commit_result {
                Ok(actions) => actions,
                Err(Error::NotFound(_)) => {
                    // Gaps in the version sequence are tolerated.
                    continue;
                }
                Err(Error::Corruption { path, reason }) => {
                    if self.strict_corruption {
                        return Err(Error::Corruption { path, reason });
                    }
                    tracing::warn!(version, path, reason, "skipping corrupt commit during replay");
                    continue;
                }
                Err(e) => return Err(e),
            };
            apply_actions(&actions, &mut files, &mut metadata, &mut protocol);
        }

        let metadata = metadata
            .ok_or_else(|| Error::Corruption {
                path: self.table_root.to_string(),
                reason: "no MetaData action found in replayed log prefix".to_string(),
            })?;
        let protocol = protocol.ok_or_else(|| Error::Corruption {
            path: self.table_root.to_string(),
            reason: "no Protocol action found in replayed log prefix".to_string(),
        })?;

        Ok(Snapshot {
            version: at,
            metadata,
            protocol,
            files: Arc::new(files),
            timestamp: current_time_ms(),
        })
    }
}

fn apply_actions(
    actions: &[LogAction],
    files: &mut HashMap<String, Add>,
    metadata: &mut Option<MetaData>,
    protocol: &mut Option<Protocol>,
) {
    for action in actions {
        match action {
            LogAction::Add(add) => {
                files.insert(add.path.clone(), add.clone());
            }
            LogAction::Remove(remove) => {
                files.remove(&remove.path);
            }
            LogAction::MetaData(m) => *metadata = Some(m.clone()),
            LogAction::Protocol(p) => *protocol = Some(p.clone()),
            LogAction::CommitInfo(_) => {}
        }
    }
}

fn current_time_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_actions_latest_add_wins_and_remove_clears() {
        let mut files = HashMap::new();
        let mut metadata = None;
        let mut protocol = None;

        let add = |path: &str, size: i64| {
            LogAction::Add(Add {
                path: path.to_string(),
                size,
                modification_time: 0,
                data_change: true,
                partition_values: None,
                stats: None,
                tags: None,
            })
        };

        apply_actions(&[add("a.parquet", 1)], &mut files, &mut metadata, &mut protocol);
        apply_actions(&[add("a.parquet", 2)], &mut files, &mut metadata, &mut protocol);
        assert_eq!(files.get("a.parquet").unwrap().size, 2);

        apply_actions(
            &[LogAction::Remove(crate::actions::Remove {
                path: "a.parquet".to_string(),
                deletion_timestamp: 0,
                data_change: true,
                partition_values: None,
                extended_file_metadata: None,
                size: None,
            })],
            &mut files,
            &mut metadata,
            &mut protocol,
        );
        assert!(files.get("a.parquet").is_none());
    }
}
