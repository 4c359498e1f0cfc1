//! `Table`: the top-level handle tying storage, concurrency, write/read
//! pipelines, checkpoints, and vacuum together. A single handle serializes
//! its own writes; it is not safe to share mutable cached state across
//! handles, only the underlying storage backend.

use std::sync::{Arc, Mutex};

use object_store::path::Path as StorePath;

use crate::actions::LogAction;
use crate::checkpoint::{self, CheckpointContent, CheckpointOptions, LastCheckpoint};
use crate::concurrency::ConcurrencyController;
use crate::error::DeltaResult;
use crate::filter::Filter;
use crate::parquet_io::Row;
use crate::read::{self, QueryDiagnostics, QueryOptions};
use crate::retry::{with_retry, RetryConfig, RetryHooks};
use crate::snapshot::Snapshot;
use crate::storage::StorageBackend;
use crate::vacuum::{self, VacuumOptions, VacuumResult};
use crate::variant::Value;
use crate::write::{self, WriteOptions};
use crate::Version;

pub struct Table {
    storage: Arc<dyn StorageBackend>,
    table_root: StorePath,
    cached_version: Mutex<Option<Version>>,
    checkpoint_options: CheckpointOptions,
    last_query_diagnostics: Mutex<QueryDiagnostics>,
}

impl Table {
    /// Opens a handle at `table_root`. Does not require the table to
    /// already exist — the first `write` call creates it.
    pub fn new(storage: Arc<dyn StorageBackend>, table_root: StorePath) -> Self {
        Table {
            storage,
            table_root,
            cached_version: Mutex::new(None),
            checkpoint_options: CheckpointOptions::default(),
            last_query_diagnostics: Mutex::new(QueryDiagnostics::default()),
        }
    }

    pub fn with_checkpoint_options(mut self, options: CheckpointOptions) -> Self {
        self.checkpoint_options = options;
        self
    }

    fn controller(&self) -> ConcurrencyController<'_> {
        ConcurrencyController::new(self.storage.as_ref(), self.table_root.clone())
    }

    /// Returns the cached current version, if any, without touching storage.
    pub fn cached_version(&self) -> Option<Version> {
        *self.cached_version.lock().unwrap()
    }

    /// Re-lists the log directory for the current highest version,
    /// invalidating the cache.
    pub async fn refresh_version(&self) -> DeltaResult<Version> {
        let version = self.controller().refresh_version().await?;
        *self.cached_version.lock().unwrap() = Some(version);
        Ok(version)
    }

    async fn current_snapshot(&self) -> DeltaResult<Option<Snapshot>> {
        let cached = self.cached_version();
        let version = match cached {
            Some(v) => Some(v),
            None => crate::log::discover_latest_version(self.storage.as_ref(), &self.table_root).await?,
        };
        match version {
            None => Ok(None),
            Some(v) => {
                let snapshot = Snapshot::builder(self.table_root.clone())
                    .at_version(v)
                    .build(self.storage.as_ref())
                    .await?;
                Ok(Some(snapshot))
            }
        }
    }

    /// Returns the snapshot at `at` (default: latest).
    pub async fn snapshot(&self, at: Option<Version>) -> DeltaResult<Snapshot> {
        let builder = Snapshot::builder(self.table_root.clone());
        match at {
            Some(v) => builder.at_version(v).build(self.storage.as_ref()).await,
            None => builder.build_latest(self.storage.as_ref()).await,
        }
    }

    /// Writes `rows`, committing through the concurrency controller
    /// and triggering a checkpoint when the interval boundary
    /// is crossed.
    pub async fn write(&self, rows: Vec<Row>, options: WriteOptions) -> DeltaResult<Version> {
        let existing = self.current_snapshot().await?;
        let new_version = write::write(
            self.storage.as_ref(),
            &self.table_root,
            &self.controller(),
            existing.as_ref(),
            rows,
            options,
        )
        .await?;

        *self.cached_version.lock().unwrap() = Some(new_version);
        self.maybe_checkpoint(new_version).await?;
        Ok(new_version)
    }

    /// Same as `write`, but retries on `ConcurrencyError` using the default
    /// retry policy, refreshing the cached version between attempts.
    pub async fn write_with_retry(
        &self,
        rows: Vec<Row>,
        options: WriteOptions,
        retry_config: &RetryConfig,
    ) -> DeltaResult<Version> {
        let rows = Arc::new(rows);
        let result = with_retry(
            || {
                let rows = rows.clone();
                let options = options.clone();
                async move { self.write((*rows).clone(), options).await }
            },
            retry_config,
            RetryHooks {
                on_retry: Some(&|_attempt, _err, _delay| true),
                ..Default::default()
            },
        )
        .await;

        match result {
            Ok(outcome) => Ok(outcome.value),
            Err((err, _metrics)) => Err(err),
        }
    }

    /// Deletes every row matching `filter`, reusing the write pipeline's
    /// Remove/Add-rewrite skeleton.
    pub async fn delete(&self, filter: &Filter) -> DeltaResult<Version> {
        let existing = self.current_snapshot_or_empty().await?;
        let new_version =
            write::delete(self.storage.as_ref(), &self.table_root, &self.controller(), &existing, filter)
                .await?;
        if new_version != existing.version {
            *self.cached_version.lock().unwrap() = Some(new_version);
            self.maybe_checkpoint(new_version).await?;
        }
        Ok(new_version)
    }

    /// Applies `patch` to every row matching `filter`.
    pub async fn update(&self, filter: &Filter, patch: &Row) -> DeltaResult<Version> {
        let existing = self.current_snapshot_or_empty().await?;
        let new_version = write::update(
            self.storage.as_ref(),
            &self.table_root,
            &self.controller(),
            &existing,
            filter,
            patch,
        )
        .await?;
        if new_version != existing.version {
            *self.cached_version.lock().unwrap() = Some(new_version);
            self.maybe_checkpoint(new_version).await?;
        }
        Ok(new_version)
    }

    /// Commits a caller-supplied action list directly, bypassing the
    /// write/delete/update pipelines entirely. The caller is responsible
    /// for action ordering and validity; `encode_commit` still enforces
    /// both at commit time.
    pub async fn commit(&self, actions: Vec<LogAction>) -> DeltaResult<Version> {
        let existing = self.current_snapshot().await?;
        let new_version = match &existing {
            Some(s) => self.controller().commit(s.version, &actions).await?,
            None => self.controller().commit_initial(&actions).await?,
        };
        *self.cached_version.lock().unwrap() = Some(new_version);
        self.maybe_checkpoint(new_version).await?;
        Ok(new_version)
    }

    async fn maybe_checkpoint(&self, version: Version) -> DeltaResult<()> {
        if !self.checkpoint_options.should_checkpoint(version) {
            return Ok(());
        }
        self.checkpoint(version).await?;
        Ok(())
    }

    /// Manually triggers a checkpoint at `version`; permitted for any
    /// existing version.
    pub async fn checkpoint(&self, version: Version) -> DeltaResult<LastCheckpoint> {
        let snapshot = self.snapshot(Some(version)).await?;
        let content = CheckpointContent {
            metadata: snapshot.metadata.clone(),
            protocol: snapshot.protocol.clone(),
            adds: snapshot.files().cloned().collect(),
        };
        let last_checkpoint = checkpoint::write_checkpoint(
            self.storage.as_ref(),
            &self.table_root,
            version,
            content,
            &self.checkpoint_options,
        )
        .await?;
        checkpoint::prune_old_checkpoints(
            self.storage.as_ref(),
            &self.table_root,
            &self.checkpoint_options,
        )
        .await?;
        Ok(last_checkpoint)
    }

    /// Materializes every matching row.
    pub async fn query(&self, filter: Option<&Filter>, options: &QueryOptions) -> DeltaResult<Vec<Value>> {
        let snapshot = self.resolve_query_snapshot(options).await?;
        let result = read::query(
            self.storage.as_ref(),
            &self.table_root,
            &snapshot,
            filter,
            options,
        )
        .await?;
        *self.last_query_diagnostics.lock().unwrap() = result.diagnostics.clone();
        Ok(result.rows)
    }

    /// Yields rows in fixed-size batches.
    pub async fn query_batch(
        &self,
        filter: Option<&Filter>,
        options: &QueryOptions,
        batch_size: usize,
        on_batch: impl FnMut(&[Value]) -> bool,
    ) -> DeltaResult<()> {
        let snapshot = self.resolve_query_snapshot(options).await?;
        let diagnostics = read::query_batch(
            self.storage.as_ref(),
            &self.table_root,
            &snapshot,
            filter,
            options,
            batch_size,
            on_batch,
        )
        .await?;
        *self.last_query_diagnostics.lock().unwrap() = diagnostics;
        Ok(())
    }

    /// Returns a lazy async sequence of matching rows: each file is read
    /// only once the previous file's rows have been consumed, so an early
    /// `break` on the caller's side skips the I/O for the rest of the
    /// table.
    pub async fn query_iterator(
        &self,
        filter: Option<&Filter>,
        options: &QueryOptions,
    ) -> DeltaResult<impl futures::stream::Stream<Item = DeltaResult<Value>>> {
        let snapshot = self.resolve_query_snapshot(options).await?;
        read::query_stream(
            self.storage.clone(),
            self.table_root.clone(),
            snapshot,
            filter.cloned(),
            options.clone(),
        )
    }

    pub fn last_query_skipped_files(&self) -> usize {
        self.last_query_diagnostics.lock().unwrap().files_skipped
    }

    pub fn last_query_projection_columns(&self) -> Option<Vec<String>> {
        self.last_query_diagnostics
            .lock()
            .unwrap()
            .projection_columns
            .clone()
    }

    async fn current_snapshot_or_empty(&self) -> DeltaResult<Snapshot> {
        match self.current_snapshot().await? {
            Some(s) => Ok(s),
            None => Err(crate::error::Error::NotFound(format!(
                "{}: table has no commits",
                self.table_root
            ))),
        }
    }

    /// Resolves the snapshot a query should run against: `options.version`
    /// or `options.snapshot` pin a specific point in time; neither set
    /// falls back to the table's latest commit.
    async fn resolve_query_snapshot(&self, options: &QueryOptions) -> DeltaResult<Snapshot> {
        match (options.version, &options.snapshot) {
            (Some(_), Some(_)) => Err(crate::error::Error::invalid_input(
                "QueryOptions: only one of version or snapshot may be supplied",
            )),
            (Some(v), None) => self.snapshot(Some(v)).await,
            (None, Some(s)) => Ok(s.clone()),
            (None, None) => self.current_snapshot_or_empty().await,
        }
    }

    /// Deletes orphaned data files outside the retention window
    ///.
    pub async fn vacuum(&self, options: &VacuumOptions, now_ms: i64) -> DeltaResult<VacuumResult> {
        let snapshot = self.current_snapshot_or_empty().await?;
        vacuum::vacuum(
            self.storage.as_ref(),
            &self.table_root,
            &snapshot,
            options,
            now_ms,
            None,
        )
        .await
    }
}
