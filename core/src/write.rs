//! Write pipeline: schema inference, partition grouping,
//! Parquet emission, stats synthesis, Add synthesis, and commit.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use object_store::path::Path as StorePath;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use uuid::Uuid;

use crate::actions::{Add, CommitInfo, Format, LogAction, MetaData, Protocol, Remove};
use crate::concurrency::ConcurrencyController;
use crate::error::{DeltaResult, Error};
use crate::filter::{compile_zone_predicates, evaluate, partition_prunes, Filter};
use crate::parquet_io::{encode_file, Row};
use crate::read::{read_file_rows, row_to_value, should_skip_file};
use crate::schema::{parse_schema_string, schema_to_string, DataType, StructField, StructType};
use crate::snapshot::Snapshot;
use crate::storage::StorageBackend;
use crate::variant::Value;
use crate::Version;

pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Overwrite,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub partition_columns: Option<Vec<String>>,
    pub mode: WriteMode,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            partition_columns: None,
            mode: WriteMode::Append,
        }
    }
}

impl WriteOptions {
    pub fn with_partition_columns(mut self, columns: Vec<String>) -> Self {
        self.partition_columns = Some(columns);
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }
}

const PARTITION_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'=')
    .add(b' ')
    .add(b'%')
    .add(b'?')
    .add(b'#');

/// `<col>=<urlencode(value)>` path segment encoding.
pub fn encode_partition_value(value: &str) -> String {
    utf8_percent_encode(value, PARTITION_ENCODE_SET).to_string()
}

fn partition_value_as_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int64(i) => i.to_string(),
        Value::Float64(f) => f.to_string(),
        Value::String(s) => s.clone(),
        Value::Timestamp(ms) => ms.to_string(),
        _ => String::new(),
    }
}

/// Infers each column's `DataType` from the first non-null occurrence
/// across all rows. A column null in every row defaults
/// to `string`. Cross-row disagreement raises `SchemaError`.
pub fn infer_schema(rows: &[Row]) -> DeltaResult<StructType> {
    let mut ordered_columns: Vec<String> = Vec::new();
    let mut inferred: BTreeMap<String, Option<DataType>> = BTreeMap::new();

    for row in rows {
        for (col, value) in row {
            if !inferred.contains_key(col) {
                ordered_columns.push(col.clone());
                inferred.insert(col.clone(), None);
            }
            let this_type = infer_value_type(value);
            if let Some(this_type) = this_type {
                match inferred.get_mut(col).unwrap() {
                    slot @ None => *slot = Some(this_type.clone()),
                    Some(existing) => {
                        if *existing != this_type {
                            return Err(Error::Schema(format!(
                                "column '{col}' has conflicting inferred types {existing:?} and {this_type:?} within one write"
                            )));
                        }
                    }
                }
            }
        }
    }

    let fields = ordered_columns
        .into_iter()
        .map(|name| {
            let dt = inferred.remove(&name).flatten().unwrap_or(DataType::String);
            StructField::new(name, dt, true)
        })
        .collect();
    Ok(StructType::new(fields))
}

fn infer_value_type(value: &Value) -> Option<DataType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(DataType::Boolean),
        Value::Int64(_) => Some(DataType::Long),
        Value::Float64(_) => Some(DataType::Double),
        Value::String(_) => Some(DataType::String),
        Value::Bytes(_) => Some(DataType::Binary),
        Value::Timestamp(_) => Some(DataType::Timestamp),
        Value::Array(_) | Value::Object(_) => Some(DataType::Variant),
    }
}

/// Merges a newly inferred schema into the table's persisted schema,
/// allowing additive new columns (schema evolution) but rejecting
/// incompatible type changes to an existing column.
pub fn merge_schema_evolution(
    persisted: &StructType,
    incoming: &StructType,
) -> DeltaResult<StructType> {
    let mut fields = persisted.fields.clone();
    for new_field in &incoming.fields {
        match fields.iter().find(|f| f.name == new_field.name) {
            Some(existing) if existing.data_type != new_field.data_type => {
                return Err(Error::Schema(format!(
                    "incompatible schema evolution for column '{}': {:?} -> {:?}",
                    new_field.name, existing.data_type, new_field.data_type
                )));
            }
            Some(_) => {}
            None => fields.push(new_field.clone()),
        }
    }
    Ok(StructType::new(fields))
}

struct PartitionGroup {
    partition_values: IndexMap<String, String>,
    rows: Vec<Row>,
}

/// Groups rows by the tuple of partition column values.
fn partition_rows(rows: Vec<Row>, partition_columns: &[String]) -> Vec<PartitionGroup> {
    if partition_columns.is_empty() {
        return vec![PartitionGroup {
            partition_values: IndexMap::new(),
            rows,
        }];
    }

    let mut groups: IndexMap<Vec<String>, PartitionGroup> = IndexMap::new();
    for row in rows {
        let key: Vec<String> = partition_columns
            .iter()
            .map(|col| {
                row.get(col)
                    .map(partition_value_as_string)
                    .unwrap_or_default()
            })
            .collect();
        let group = groups.entry(key.clone()).or_insert_with(|| {
            let mut partition_values = IndexMap::new();
            for (col, value) in partition_columns.iter().zip(key.iter()) {
                partition_values.insert(col.clone(), value.clone());
            }
            PartitionGroup {
                partition_values,
                rows: Vec::new(),
            }
        });
        group.rows.push(row);
    }
    groups.into_values().collect()
}

fn partition_path_prefix(partition_columns: &[String], partition_values: &IndexMap<String, String>) -> String {
    partition_columns
        .iter()
        .map(|col| {
            let value = partition_values.get(col).map(String::as_str).unwrap_or("");
            let segment = if value.is_empty() {
                HIVE_DEFAULT_PARTITION.to_string()
            } else {
                encode_partition_value(value)
            };
            format!("{col}={segment}/")
        })
        .collect()
}

/// Result of preparing a write: the Add actions to commit plus whether
/// this is the table's first-ever commit (needing Protocol+MetaData).
pub struct PreparedWrite {
    pub adds: Vec<Add>,
    pub schema: StructType,
    pub partition_columns: Vec<String>,
}

/// Executes write-pipeline steps 2–6 against an already-resolved set of
/// partition columns and persisted schema (if any). Does not touch storage
/// beyond emitting data files — committing the resulting actions is the
/// caller's responsibility (step 7, via `ConcurrencyController`).
pub async fn prepare_write(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    rows: Vec<Row>,
    partition_columns: Vec<String>,
    persisted_schema: Option<&StructType>,
) -> DeltaResult<PreparedWrite> {
    if rows.is_empty() {
        return Err(Error::invalid_input("Cannot write empty data"));
    }

    let inferred = infer_schema(&rows)?;
    let schema = match persisted_schema {
        Some(existing) => merge_schema_evolution(existing, &inferred)?,
        None => inferred,
    };

    let groups = partition_rows(rows, &partition_columns);
    let mut adds = Vec::with_capacity(groups.len());

    for (ordinal, group) in groups.into_iter().enumerate() {
        let encoded = encode_file(&group.rows, &schema)?;
        let prefix = partition_path_prefix(&partition_columns, &group.partition_values);
        let file_name = format!("part-{ordinal:05}-{}.parquet", Uuid::new_v4());
        let relative_path = format!("{prefix}{file_name}");
        let full_path = table_root.child(relative_path.as_str());

        storage.write(&full_path, encoded.bytes.clone()).await?;

        let partition_values = if partition_columns.is_empty() {
            None
        } else {
            Some(group.partition_values.into_iter().collect())
        };

        adds.push(Add {
            path: relative_path,
            size: encoded.bytes.len() as i64,
            modification_time: current_time_ms(),
            data_change: true,
            partition_values,
            stats: Some(encoded.stats.to_json_string()?),
            tags: None,
        });
    }

    Ok(PreparedWrite {
        adds,
        schema,
        partition_columns,
    })
}

fn current_time_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Resolves the partition columns to use for this write: explicit option
/// wins, else the persisted value, else none; once set, subsequent writes
/// must agree.
pub fn resolve_partition_columns(
    requested: Option<Vec<String>>,
    persisted: Option<&[String]>,
) -> DeltaResult<Vec<String>> {
    match (requested, persisted) {
        (Some(r), Some(p)) if !p.is_empty() && r != p => Err(Error::invalid_input(format!(
            "partitionColumns {r:?} disagree with persisted value {p:?}"
        ))),
        (Some(r), _) => Ok(r),
        (None, Some(p)) => Ok(p.to_vec()),
        (None, None) => Ok(Vec::new()),
    }
}

/// Performs a full write, including the very first commit's Protocol +
/// MetaData and the trailing CommitInfo, then commits
/// via the concurrency controller (step 7).
pub async fn write(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    controller: &ConcurrencyController<'_>,
    existing: Option<&Snapshot>,
    rows: Vec<Row>,
    options: WriteOptions,
) -> DeltaResult<Version> {
    let persisted_schema = existing
        .map(|s| parse_schema_string(&s.metadata.schema_string))
        .transpose()?;
    let partition_columns = resolve_partition_columns(
        options.partition_columns.clone(),
        existing.map(|s| s.metadata.partition_columns.as_slice()),
    )?;

    let prepared = prepare_write(
        storage,
        table_root,
        rows,
        partition_columns.clone(),
        persisted_schema.as_ref(),
    )
    .await?;

    let mut actions = Vec::new();

    if existing.is_none() {
        actions.push(LogAction::Protocol(Protocol::default()));
        actions.push(LogAction::MetaData(MetaData {
            id: Uuid::new_v4().to_string(),
            name: None,
            description: None,
            format: Format::default(),
            schema_string: schema_to_string(&prepared.schema)?,
            partition_columns: prepared.partition_columns.clone(),
            configuration: None,
            created_time: Some(current_time_ms()),
        }));
    } else if let Some(existing_snapshot) = existing {
        let persisted_schema_string = &existing_snapshot.metadata.schema_string;
        let new_schema_string = schema_to_string(&prepared.schema)?;
        if *persisted_schema_string != new_schema_string {
            let mut metadata = existing_snapshot.metadata.clone();
            metadata.schema_string = new_schema_string;
            actions.push(LogAction::MetaData(metadata));
        }
    }

    if options.mode == WriteMode::Overwrite {
        if let Some(existing_snapshot) = existing {
            for file in existing_snapshot.files() {
                actions.push(LogAction::Remove(crate::actions::Remove {
                    path: file.path.clone(),
                    deletion_timestamp: current_time_ms(),
                    data_change: true,
                    partition_values: file.partition_values.clone(),
                    extended_file_metadata: None,
                    size: Some(file.size),
                }));
            }
        }
    }

    let is_blind_append = options.mode == WriteMode::Append;
    for add in prepared.adds {
        actions.push(LogAction::Add(add));
    }
    actions.push(LogAction::CommitInfo(CommitInfo {
        timestamp: current_time_ms(),
        operation: "WRITE".to_string(),
        operation_parameters: None,
        read_version: existing.map(|s| s.version),
        isolation_level: Some("Serializable".to_string()),
        is_blind_append: Some(is_blind_append),
    }));

    match existing {
        Some(s) => controller.commit(s.version, &actions).await,
        None => controller.commit_initial(&actions).await,
    }
}

/// Shared skeleton for `delete`/`update`: scans every file a `filter`
/// might touch, and for each file with at least one matching row, emits a
/// Remove plus (if any rows survive `transform`) an Add for the rewritten
/// file. `transform` runs once per matching row; returning `None` drops
/// the row, `Some(row)` keeps it (patched or unchanged).
async fn rewrite_matching_files(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    existing: &Snapshot,
    filter: &Filter,
    mut transform: impl FnMut(Row) -> Option<Row>,
) -> DeltaResult<Vec<LogAction>> {
    let schema = parse_schema_string(&existing.metadata.schema_string)?;
    let column_mapping = existing.column_mapping();
    let zone_predicates = compile_zone_predicates(filter);
    let partition_columns = existing.metadata.partition_columns.clone();

    let mut actions = Vec::new();

    for file in existing.files() {
        if let Some(partition_values) = &file.partition_values {
            if partition_prunes(filter, partition_values) {
                continue;
            }
        }
        if should_skip_file(file, &zone_predicates) {
            continue;
        }

        let rows = read_file_rows(storage, table_root, file, &schema).await?;
        let mut matched_any = false;
        let mut rewritten = Vec::with_capacity(rows.len());
        for row in rows {
            let value = row_to_value(row.clone(), &column_mapping);
            if evaluate(filter, &value) {
                matched_any = true;
                if let Some(kept) = transform(row) {
                    rewritten.push(kept);
                }
            } else {
                rewritten.push(row);
            }
        }

        if !matched_any {
            continue;
        }

        actions.push(LogAction::Remove(Remove {
            path: file.path.clone(),
            deletion_timestamp: current_time_ms(),
            data_change: true,
            partition_values: file.partition_values.clone(),
            extended_file_metadata: None,
            size: Some(file.size),
        }));

        if rewritten.is_empty() {
            continue;
        }

        let partition_values_map: IndexMap<String, String> = file
            .partition_values
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect();
        let encoded = encode_file(&rewritten, &schema)?;
        let prefix = partition_path_prefix(&partition_columns, &partition_values_map);
        let file_name = format!("part-{}.parquet", Uuid::new_v4());
        let relative_path = format!("{prefix}{file_name}");
        let full_path = table_root.child(relative_path.as_str());

        storage.write(&full_path, encoded.bytes.clone()).await?;

        actions.push(LogAction::Add(Add {
            path: relative_path,
            size: encoded.bytes.len() as i64,
            modification_time: current_time_ms(),
            data_change: true,
            partition_values: file.partition_values.clone(),
            stats: Some(encoded.stats.to_json_string()?),
            tags: None,
        }));
    }

    Ok(actions)
}

/// Deletes every row matching `filter`: files with no matching row are
/// untouched, fully-matched files are dropped with a bare Remove, and
/// partially-matched files are rewritten to keep only the surviving rows.
pub async fn delete(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    controller: &ConcurrencyController<'_>,
    existing: &Snapshot,
    filter: &Filter,
) -> DeltaResult<Version> {
    let mut actions = rewrite_matching_files(storage, table_root, existing, filter, |_row| None).await?;
    if actions.is_empty() {
        return Ok(existing.version);
    }

    actions.push(LogAction::CommitInfo(CommitInfo {
        timestamp: current_time_ms(),
        operation: "DELETE".to_string(),
        operation_parameters: None,
        read_version: Some(existing.version),
        isolation_level: Some("Serializable".to_string()),
        is_blind_append: Some(false),
    }));

    controller.commit(existing.version, &actions).await
}

/// Applies `patch` (column → new value) to every row matching `filter`,
/// rewriting affected files the same way `delete` does.
pub async fn update(
    storage: &dyn StorageBackend,
    table_root: &StorePath,
    controller: &ConcurrencyController<'_>,
    existing: &Snapshot,
    filter: &Filter,
    patch: &Row,
) -> DeltaResult<Version> {
    let mut actions = rewrite_matching_files(storage, table_root, existing, filter, |mut row| {
        for (col, value) in patch {
            row.insert(col.clone(), value.clone());
        }
        Some(row)
    })
    .await?;
    if actions.is_empty() {
        return Ok(existing.version);
    }

    actions.push(LogAction::CommitInfo(CommitInfo {
        timestamp: current_time_ms(),
        operation: "UPDATE".to_string(),
        operation_parameters: None,
        read_version: Some(existing.version),
        isolation_level: Some("Serializable".to_string()),
        is_blind_append: Some(false),
    }));

    controller.commit(existing.version, &actions).await
}
