//! Optimistic concurrency controller: read-prepare-commit-
//! classify, with `refresh_version` invalidating the table handle's cache.

use object_store::path::Path as StorePath;

use crate::actions::LogAction;
use crate::error::{DeltaResult, Error};
use crate::log::{discover_latest_version, write_commit};
use crate::storage::StorageBackend;
use crate::Version;

/// Drives one conditional commit attempt against the version the caller
/// last observed. Higher layers (write/vacuum/checkpoint pipelines) call
/// this once per logical operation; retrying across `ConcurrencyError` is
/// the retry engine's job, not this controller's.
pub struct ConcurrencyController<'a> {
    storage: &'a dyn StorageBackend,
    table_root: StorePath,
}

impl<'a> ConcurrencyController<'a> {
    pub fn new(storage: &'a dyn StorageBackend, table_root: StorePath) -> Self {
        Self { storage, table_root }
    }

    /// Step 1: read the latest version, serving from `cached` when given.
    pub async fn read_version(&self, cached: Option<Version>) -> DeltaResult<Version> {
        if let Some(v) = cached {
            return Ok(v);
        }
        discover_latest_version(self.storage, &self.table_root)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}: table has no commits", self.table_root)))
    }

    /// Steps 3–4: attempt the conditional commit at `v_seen + 1` and
    /// classify the outcome. On success, returns the new version.
    pub async fn commit(
        &self,
        v_seen: Version,
        actions: &[LogAction],
    ) -> DeltaResult<Version> {
        let target_version = v_seen + 1;
        match write_commit(self.storage, &self.table_root, target_version, actions).await {
            Ok(()) => Ok(target_version),
            Err(Error::Concurrency {
                expected_version,
                actual_version,
            }) => Err(Error::Concurrency {
                expected_version,
                actual_version,
            }),
            Err(e) => Err(e),
        }
    }

    /// Re-lists the log directory for the current highest version,
    /// invalidating any cached value the caller held.
    pub async fn refresh_version(&self) -> DeltaResult<Version> {
        discover_latest_version(self.storage, &self.table_root)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}: table has no commits", self.table_root)))
    }

    /// Commits the very first version (0) of a brand-new table: no prior
    /// version to race against other than another writer doing the same.
    pub async fn commit_initial(&self, actions: &[LogAction]) -> DeltaResult<Version> {
        match write_commit(self.storage, &self.table_root, 0, actions).await {
            Ok(()) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{CommitInfo, MetaData, Protocol, Format};
    use crate::storage::ObjectStoreBackend;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn initial_actions() -> Vec<LogAction> {
        vec![
            LogAction::Protocol(Protocol::default()),
            LogAction::MetaData(MetaData {
                id: "t1".to_string(),
                name: None,
                description: None,
                format: Format::default(),
                schema_string: "{\"type\":\"struct\",\"fields\":[]}".to_string(),
                partition_columns: vec![],
                configuration: None,
                created_time: None,
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

    #[tokio::test]
    async fn second_commit_at_same_version_raises_concurrency_error() {
        let store = Arc::new(InMemory::new());
        let backend = ObjectStoreBackend::new(store);
        let root = StorePath::from("table");
        let controller = ConcurrencyController::new(&backend, root);

        controller.commit_initial(&initial_actions()).await.unwrap();

        let second = controller.commit(0, &initial_actions()).await;
        assert!(matches!(second, Err(Error::Concurrency { .. })));
    }

    #[tokio::test]
    async fn losing_bootstrap_race_reports_no_expected_version() {
        let store = Arc::new(InMemory::new());
        let backend = ObjectStoreBackend::new(store);
        let root = StorePath::from("table");
        let controller = ConcurrencyController::new(&backend, root);

        controller.commit_initial(&initial_actions()).await.unwrap();

        let loser = controller.commit_initial(&initial_actions()).await;
        match loser {
            Err(Error::Concurrency {
                expected_version,
                actual_version,
            }) => {
                assert_eq!(expected_version, None);
                assert_eq!(actual_version, 0);
            }
            other => panic!("expected Concurrency error, got {other:?}"),
        }
    }
}
