//! Vacuum engine: deletes orphaned data files outside the
//! retention window, with a dry-run mode and per-file error accumulation.

use std::collections::HashSet;

use object_store::path::Path as StorePath;

use crate::error::{DeltaResult, Error};
use crate::path::LOG_DIR;
use crate::snapshot::Snapshot;
use crate::storage::StorageBackend;

#[derive(Debug, Clone)]
pub struct VacuumOptions {
    pub retention_hours: f64,
    pub dry_run: bool,
}

impl Default for VacuumOptions {
    fn default() -> Self {
        VacuumOptions {
            retention_hours: 168.0,
            dry_run: false,
        }
    }
}

impl VacuumOptions {
    pub fn validate(&self) -> DeltaResult<()> {
        if self.retention_hours < 1.0 {
            return Err(Error::invalid_input("retentionHours must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VacuumResult {
    pub files_deleted: u64,
    pub bytes_freed: u64,
    pub files_retained: u64,
    pub dry_run: bool,
    pub files_to_delete: Vec<String>,
    pub duration_ms: u64,
    pub files_scanned: u64,
    pub errors: Vec<String>,
}

/// A caller-supplied progress hook: `(phase, index, total)`, where `phase`
/// is `"scanning"` during enumeration and `"deleting"` during the delete
/// pass, `index` is 1-based, and `total` is the size of that phase.
pub type OnProgress<'a> = dyn FnMut(&str, usize, usize) + 'a;

/// Enumerates every object under the table root, then deletes anything
/// that is (a) a `.parquet` file, (b) not under `_delta_log/`, (c) not
/// referenced by `snapshot`, and (d) older than the retention cutoff.
/// Reachable-but-older files are left alone — only unreferenced files are
/// ever deleted. Scanning and deleting are two distinct passes, each
/// reported separately through `on_progress`.
pub async fn vacuum(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    snapshot: &Snapshot,
    options: &VacuumOptions,
    now_ms: i64,
    mut on_progress: Option<&mut OnProgress<'_>>,
) -> DeltaResult<VacuumResult> {
    let start = std::time::Instant::now();
    options.validate()?;

    let retention_ms = (options.retention_hours * 3_600_000.0) as i64;
    let cutoff_ms = now_ms - retention_ms;

    let referenced: HashSet<String> = snapshot.files().map(|a| a.path.clone()).collect();

    let entries = storage.list(table_root).await?;
    let mut result = VacuumResult {
        dry_run: options.dry_run,
        ..Default::default()
    };

    let total_scanned = entries.len();
    let mut candidates = Vec::new();

    for (i, meta) in entries.into_iter().enumerate() {
        if let Some(cb) = on_progress.as_deref_mut() {
            cb("scanning", i + 1, total_scanned);
        }

        let relative = relative_to_root(table_root, &meta.location);
        result.files_scanned += 1;

        if !relative.ends_with(".parquet") {
            continue;
        }
        if relative.starts_with(LOG_DIR) {
            continue;
        }
        if referenced.contains(&relative) {
            result.files_retained += 1;
            continue;
        }
        if meta.last_modified_ms > cutoff_ms {
            result.files_retained += 1;
            continue;
        }

        candidates.push(meta);
    }

    let total_candidates = candidates.len();
    for (i, meta) in candidates.into_iter().enumerate() {
        let relative = relative_to_root(table_root, &meta.location);

        if let Some(cb) = on_progress.as_deref_mut() {
            cb("deleting", i + 1, total_candidates);
        }

        result.files_to_delete.push(relative.clone());

        if options.dry_run {
            result.files_deleted += 1;
            result.bytes_freed += meta.size;
            continue;
        }

        match storage.delete(&meta.location).await {
            Ok(()) => {
                result.files_deleted += 1;
                result.bytes_freed += meta.size;
                tracing::debug!(path = %relative, "vacuumed orphan file");
            }
            Err(e) => {
                result.errors.push(format!("{relative}: {e}"));
                tracing::warn!(path = %relative, error = %e, "failed to vacuum file");
            }
        }
    }

    result.duration_ms = start.elapsed().as_millis() as u64;
    Ok(result)
}

fn relative_to_root(table_root: &StorePath, location: &StorePath) -> String {
    let root_str = table_root.to_string();
    let loc_str = location.to_string();
    loc_str
        .strip_prefix(&root_str)
        .unwrap_or(&loc_str)
        .trim_start_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sub_hour_retention() {
        let opts = VacuumOptions {
            retention_hours: 0.5,
            dry_run: false,
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn default_retention_is_one_week() {
        let opts = VacuumOptions::default();
        assert_eq!(opts.retention_hours, 168.0);
    }
}
