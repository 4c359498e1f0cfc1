//! Read pipeline: snapshot resolution, partition pruning,
//! zone-map pushdown, row streaming, variant decode, column mapping and
//! projection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::stream::{try_unfold, Stream};
use indexmap::IndexMap;
use object_store::path::Path as StorePath;

use crate::actions::Add;
use crate::actions::stats::FileStats;
use crate::error::DeltaResult;
use crate::filter::{compile_zone_predicates, evaluate, partition_prunes, predicate_skips, Filter};
use crate::parquet_io::{decode_file, Row};
use crate::schema::{parse_schema_string, StructType};
use crate::snapshot::Snapshot;
use crate::storage::StorageBackend;
use crate::variant::Value;
use crate::Version;

#[derive(Debug, Clone)]
pub enum Projection {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

/// At most one of `version`/`snapshot` may be set; either pins the query
/// to a consistent point-in-time view instead of the table's latest
/// commit.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub projection: Option<Projection>,
    pub version: Option<Version>,
    pub snapshot: Option<Snapshot>,
}

/// Side-channel diagnostics the last query populates, mirroring the
/// spec's `lastQuerySkippedFiles` / `lastQueryProjectionColumns` knobs.
#[derive(Debug, Clone, Default)]
pub struct QueryDiagnostics {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub projection_columns: Option<Vec<String>>,
}

pub struct QueryResult {
    pub rows: Vec<Value>,
    pub diagnostics: QueryDiagnostics,
}

/// Executes the full read pipeline against a pinned `snapshot`.
/// `filter` is optional; `None` matches every row.
pub async fn query(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    snapshot: &Snapshot,
    filter: Option<&Filter>,
    options: &QueryOptions,
) -> DeltaResult<QueryResult> {
    let schema = parse_schema_string(&snapshot.metadata.schema_string)?;
    let column_mapping = snapshot.column_mapping();

    let zone_predicates = filter.map(compile_zone_predicates).unwrap_or_default();

    let mut diagnostics = QueryDiagnostics::default();
    let mut rows_out = Vec::new();

    for file in snapshot.files() {
        // Step 2: partition prune.
        if let Some(filter) = filter {
            if let Some(partition_values) = &file.partition_values {
                if partition_prunes(filter, partition_values) {
                    diagnostics.files_skipped += 1;
                    continue;
                }
            }
        }

        // Steps 3–4: file-level zone-map skip using synthesized FileStats.
        if should_skip_file(file, &zone_predicates) {
            diagnostics.files_skipped += 1;
            continue;
        }

        diagnostics.files_scanned += 1;
        let file_rows = read_file_rows(storage, table_root, file, &schema).await?;

        for row in file_rows {
            let value = row_to_value(row, &column_mapping);
            if let Some(filter) = filter {
                if !evaluate(filter, &value) {
                    continue;
                }
            }
            rows_out.push(apply_projection(value, options.projection.as_ref()));
        }
    }

    diagnostics.projection_columns = match &options.projection {
        Some(Projection::Include(cols)) => Some(cols.clone()),
        _ => None,
    };

    Ok(QueryResult {
        rows: rows_out,
        diagnostics,
    })
}

/// Streams rows lazily, invoking `on_batch` with up to `batch_size` rows at
/// a time; returning `false` from `on_batch` stops further file reads.
pub async fn query_batch(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    snapshot: &Snapshot,
    filter: Option<&Filter>,
    options: &QueryOptions,
    batch_size: usize,
    mut on_batch: impl FnMut(&[Value]) -> bool,
) -> DeltaResult<QueryDiagnostics> {
    if batch_size == 0 {
        return Err(crate::error::Error::invalid_input(
            "batchSize must be a positive integer",
        ));
    }

    let schema = parse_schema_string(&snapshot.metadata.schema_string)?;
    let column_mapping = snapshot.column_mapping();
    let zone_predicates = filter.map(compile_zone_predicates).unwrap_or_default();

    let mut diagnostics = QueryDiagnostics::default();
    let mut batch = Vec::with_capacity(batch_size);

    for file in snapshot.files() {
        if let Some(filter) = filter {
            if let Some(partition_values) = &file.partition_values {
                if partition_prunes(filter, partition_values) {
                    diagnostics.files_skipped += 1;
                    continue;
                }
            }
        }
        if should_skip_file(file, &zone_predicates) {
            diagnostics.files_skipped += 1;
            continue;
        }

        diagnostics.files_scanned += 1;
        let file_rows = read_file_rows(storage, table_root, file, &schema).await?;

        for row in file_rows {
            let value = row_to_value(row, &column_mapping);
            if let Some(filter) = filter {
                if !evaluate(filter, &value) {
                    continue;
                }
            }
            batch.push(apply_projection(value, options.projection.as_ref()));
            if batch.len() == batch_size {
                if !on_batch(&batch) {
                    return Ok(diagnostics);
                }
                batch.clear();
            }
        }
    }

    if !batch.is_empty() {
        on_batch(&batch);
    }

    Ok(diagnostics)
}

/// Lazily streams matching rows one at a time, reading each file only as
/// the caller pulls past its predecessor's rows. Dropping the stream stops
/// further file reads, the async equivalent of `query_batch`'s early
/// `on_batch` termination.
pub fn query_stream(
    storage: Arc<dyn StorageBackend>,
    table_root: StorePath,
    snapshot: Snapshot,
    filter: Option<Filter>,
    options: QueryOptions,
) -> DeltaResult<impl Stream<Item = DeltaResult<Value>>> {
    let schema = Arc::new(parse_schema_string(&snapshot.metadata.schema_string)?);
    let column_mapping = Arc::new(snapshot.column_mapping());
    let zone_predicates = Arc::new(filter.as_ref().map(compile_zone_predicates).unwrap_or_default());
    let table_root = Arc::new(table_root);
    let filter = Arc::new(filter);
    let options = Arc::new(options);
    let files: Vec<Add> = snapshot.files().cloned().collect();

    struct State {
        files: std::vec::IntoIter<Add>,
        pending: VecDeque<Value>,
    }

    let state = State {
        files: files.into_iter(),
        pending: VecDeque::new(),
    };

    Ok(try_unfold(state, move |mut state| {
        let storage = storage.clone();
        let table_root = table_root.clone();
        let schema = schema.clone();
        let column_mapping = column_mapping.clone();
        let zone_predicates = zone_predicates.clone();
        let filter = filter.clone();
        let options = options.clone();
        async move {
            loop {
                if let Some(value) = state.pending.pop_front() {
                    return Ok(Some((value, state)));
                }
                let Some(file) = state.files.next() else {
                    return Ok(None);
                };

                if let Some(f) = filter.as_ref() {
                    if let Some(partition_values) = &file.partition_values {
                        if partition_prunes(f, partition_values) {
                            continue;
                        }
                    }
                }
                if should_skip_file(&file, &zone_predicates) {
                    continue;
                }

                let file_rows =
                    read_file_rows(storage.as_ref(), table_root.as_ref(), &file, schema.as_ref()).await?;
                for row in file_rows {
                    let value = row_to_value(row, column_mapping.as_ref());
                    if let Some(f) = filter.as_ref() {
                        if !evaluate(f, &value) {
                            continue;
                        }
                    }
                    state
                        .pending
                        .push_back(apply_projection(value, options.projection.as_ref()));
                }
            }
        }
    }))
}

pub(crate) async fn read_file_rows(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    file: &Add,
    schema: &StructType,
) -> DeltaResult<Vec<Row>> {
    let path = table_root.child(file.path.as_str());
    let bytes = storage.read(&path).await?;
    let (rows, _zone_maps) = decode_file(bytes, schema)?;
    Ok(rows)
}

pub(crate) fn should_skip_file(file: &Add, predicates: &[crate::filter::ZonePredicate]) -> bool {
    let Some(stats_json) = &file.stats else {
        return false;
    };
    let Ok(stats) = FileStats::from_json_str(stats_json) else {
        return false;
    };
    predicates.iter().any(|p| {
        let min = stats.min_values.get(p.column());
        let max = stats.max_values.get(p.column());
        predicate_skips(p, min, max)
    })
}

/// Decodes a Parquet-read row (already variant-decoded at the cell level
/// by `parquet_io`) into a `Value::Object`, applying physical→logical
/// column-mapping renames.
pub(crate) fn row_to_value(row: Row, column_mapping: &HashMap<String, String>) -> Value {
    let mut out = IndexMap::new();
    for (key, value) in row {
        let logical_name = column_mapping.get(&key).cloned().unwrap_or(key);
        out.insert(logical_name, value);
    }
    Value::Object(out)
}

/// Restricts or omits columns per the projection.
fn apply_projection(value: Value, projection: Option<&Projection>) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    match projection {
        None => Value::Object(map),
        Some(Projection::Include(cols)) => {
            let mut out = IndexMap::new();
            for col in cols {
                if let Some(v) = map.get(col) {
                    out.insert(col.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        Some(Projection::Exclude(cols)) => {
            let mut out = map;
            for col in cols {
                out.shift_remove(col);
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_with_stats(path: &str, min: i64, max: i64) -> Add {
        let stats = FileStats {
            num_records: 10,
            min_values: [("id".to_string(), json!(min))].into_iter().collect(),
            max_values: [("id".to_string(), json!(max))].into_iter().collect(),
            null_count: [("id".to_string(), 0)].into_iter().collect(),
        };
        Add {
            path: path.to_string(),
            size: 100,
            modification_time: 0,
            data_change: true,
            partition_values: None,
            stats: Some(stats.to_json_string().unwrap()),
            tags: None,
        }
    }

    #[test]
    fn should_skip_file_respects_eq_zone_map() {
        let predicate = crate::filter::ZonePredicate::Eq("id".to_string(), json!(50));
        let file = file_with_stats("a.parquet", 1, 10);
        assert!(should_skip_file(&file, &[predicate]));

        let predicate2 = crate::filter::ZonePredicate::Eq("id".to_string(), json!(5));
        assert!(!should_skip_file(&file, &[predicate2]));
    }

    #[test]
    fn projection_include_restricts_columns() {
        let mut map = IndexMap::new();
        map.insert("id".to_string(), Value::Int64(1));
        map.insert("name".to_string(), Value::String("Alice".into()));
        let projected = apply_projection(
            Value::Object(map),
            Some(&Projection::Include(vec!["id".to_string()])),
        );
        match projected {
            Value::Object(m) => {
                assert_eq!(m.len(), 1);
                assert!(m.contains_key("id"));
            }
            _ => panic!("expected object"),
        }
    }
}
