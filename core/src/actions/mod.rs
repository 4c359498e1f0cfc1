//! The Delta action model: `Add`, `Remove`, `MetaData`,
//! `Protocol`, `CommitInfo`, wrapped in a `LogAction` enum whose wire
//! representation is a single-key JSON object (`{"add": {...}}`), matching
//! real Delta commit files.

pub mod stats;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{DeltaResult, Error};
use crate::schema::parse_schema_string;
use stats::FileStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Add {
    pub path: String,
    pub size: i64,
    pub modification_time: i64,
    pub data_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remove {
    pub path: String,
    pub deletion_timestamp: i64,
    pub data_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_file_metadata: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<HashMap<String, String>>,
}

impl Default for Format {
    fn default() -> Self {
        Format {
            provider: "parquet".to_string(),
            options: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaData {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub format: Format,
    pub schema_string: String,
    #[serde(default)]
    pub partition_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}

impl MetaData {
    /// `delta.columnMapping.mode`, defaulting to `"none"`.
    pub fn column_mapping_mode(&self) -> &str {
        self.configuration
            .as_ref()
            .and_then(|c| c.get("delta.columnMapping.mode"))
            .map(String::as_str)
            .unwrap_or("none")
    }
}

/// Reader/writer feature strings a `table_features`-style module
/// tracks. Anything not recognized round-trips opaquely rather than
/// erroring; full feature-matrix enforcement is out of scope.
#[derive(Debug, Clone, PartialEq)]
pub enum TableFeature {
    ColumnMapping,
    AppendOnly,
    Unknown(String),
}

impl Serialize for TableFeature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            TableFeature::ColumnMapping => "columnMapping",
            TableFeature::AppendOnly => "appendOnly",
            TableFeature::Unknown(s) => s.as_str(),
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for TableFeature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "columnMapping" => TableFeature::ColumnMapping,
            "appendOnly" => TableFeature::AppendOnly,
            _ => TableFeature::Unknown(s),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_features: Option<Vec<TableFeature>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_features: Option<Vec<TableFeature>>,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol {
            min_reader_version: 1,
            min_writer_version: 2,
            reader_features: None,
            writer_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub timestamp: i64,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_parameters: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_blind_append: Option<bool>,
}

/// One line of a commit file: exactly one populated key. Serde's
/// externally-tagged enum representation already produces
/// `{"add": {...}}`-shaped objects, matching the wire format directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogAction {
    Add(Add),
    Remove(Remove),
    MetaData(MetaData),
    Protocol(Protocol),
    CommitInfo(CommitInfo),
}

impl LogAction {
    pub fn is_add(&self) -> bool {
        matches!(self, LogAction::Add(_))
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, LogAction::Remove(_))
    }

    pub fn is_metadata(&self) -> bool {
        matches!(self, LogAction::MetaData(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, LogAction::Protocol(_))
    }

    pub fn is_commit_info(&self) -> bool {
        matches!(self, LogAction::CommitInfo(_))
    }

    pub fn as_add(&self) -> Option<&Add> {
        match self {
            LogAction::Add(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_remove(&self) -> Option<&Remove> {
        match self {
            LogAction::Remove(r) => Some(r),
            _ => None,
        }
    }

    /// Ordering rank used to enforce commit-file action order:
    /// Protocol → MetaData → Add/Remove → CommitInfo.
    pub fn order_rank(&self) -> u8 {
        match self {
            LogAction::Protocol(_) => 0,
            LogAction::MetaData(_) => 1,
            LogAction::Add(_) | LogAction::Remove(_) => 2,
            LogAction::CommitInfo(_) => 3,
        }
    }
}

const MAX_SAFE_INT: i64 = 9_007_199_254_740_991;

/// Validates a path is relative, has no `..` traversal and no `./` prefix.
/// Shared by `Add` and `Remove` validation.
fn validate_relative_path(path: &str, errors: &mut Vec<String>) {
    if path.is_empty() {
        errors.push("path must not be empty".to_string());
        return;
    }
    if path.starts_with('/') || path.starts_with("./") {
        errors.push(format!("path '{path}' must be relative, without a './' prefix"));
    }
    if path.split('/').any(|seg| seg == "..") {
        errors.push(format!("path '{path}' must not contain '..' traversal"));
    }
}

pub fn validate_add(add: &Add) -> Vec<String> {
    let mut errors = Vec::new();
    validate_relative_path(&add.path, &mut errors);
    if add.size < 0 || add.size > MAX_SAFE_INT {
        errors.push(format!("Add.size {} out of range", add.size));
    }
    if add.modification_time < 0 {
        errors.push("Add.modificationTime must be non-negative".to_string());
    }
    if let Some(stats_json) = &add.stats {
        match FileStats::from_json_str(stats_json) {
            Ok(_) => {}
            Err(Error::Validation(stats_errors)) => errors.extend(stats_errors),
            Err(e) => errors.push(format!("Add.stats invalid: {e}")),
        }
    }
    if let Some(partition_values) = &add.partition_values {
        if let Err(e) = validate_partition_values_against_path(&add.path, partition_values) {
            errors.push(e);
        }
    }
    errors
}

pub fn validate_remove(remove: &Remove) -> Vec<String> {
    let mut errors = Vec::new();
    validate_relative_path(&remove.path, &mut errors);
    if remove.deletion_timestamp < 0 {
        errors.push("Remove.deletionTimestamp must be non-negative".to_string());
    }
    errors
}

pub fn validate_metadata(metadata: &MetaData) -> Vec<String> {
    let mut errors = Vec::new();
    if metadata.id.is_empty() {
        errors.push("MetaData.id must not be empty".to_string());
    }
    if metadata.format.provider.is_empty() {
        errors.push("MetaData.format.provider must not be empty".to_string());
    }
    if let Err(e) = parse_schema_string(&metadata.schema_string) {
        errors.push(format!("MetaData.schemaString invalid: {e}"));
    }
    errors
}

pub fn validate_protocol(protocol: &Protocol) -> Vec<String> {
    let mut errors = Vec::new();
    if protocol.min_reader_version < 1 {
        errors.push("Protocol.minReaderVersion must be >= 1".to_string());
    }
    if protocol.min_writer_version < 1 {
        errors.push("Protocol.minWriterVersion must be >= 1".to_string());
    }
    errors
}

pub fn validate_commit_info(info: &CommitInfo) -> Vec<String> {
    let mut errors = Vec::new();
    if info.operation.is_empty() {
        errors.push("CommitInfo.operation must not be empty".to_string());
    }
    if info.timestamp < 0 {
        errors.push("CommitInfo.timestamp must be non-negative".to_string());
    }
    if let Some(rv) = info.read_version {
        if rv < 0 {
            errors.push("CommitInfo.readVersion must be non-negative".to_string());
        }
    }
    errors
}

pub fn validate_action(action: &LogAction) -> Vec<String> {
    match action {
        LogAction::Add(a) => validate_add(a),
        LogAction::Remove(r) => validate_remove(r),
        LogAction::MetaData(m) => validate_metadata(m),
        LogAction::Protocol(p) => validate_protocol(p),
        LogAction::CommitInfo(c) => validate_commit_info(c),
    }
}

/// Partition path segments must agree with `partitionValues`:
/// `col=urlencode(value)` per partition column, in path order. We don't
/// know `partitionColumns` order here, so this
/// checks only that every key in `partitionValues` appears as some
/// `key=value` segment somewhere in the path; full ordered validation
/// happens against `MetaData.partitionColumns` in the write pipeline.
fn validate_partition_values_against_path(
    path: &str,
    partition_values: &HashMap<String, String>,
) -> Result<(), String> {
    for (key, value) in partition_values {
        let encoded = crate::write::encode_partition_value(value);
        let expected_segment = format!("{key}={encoded}");
        if !path.split('/').any(|seg| seg == expected_segment) {
            return Err(format!(
                "path '{path}' missing expected partition segment '{expected_segment}'"
            ));
        }
    }
    Ok(())
}

/// Validates a batch of actions destined for one commit, checking both
/// per-action validity and path uniqueness among Adds (the invariant:
/// "no two Add actions in a snapshot share the same path" — here enforced
/// at the commit-batch level, the narrower guarantee we can check without
/// a snapshot).
pub fn validate_actions(actions: &[LogAction]) -> DeltaResult<()> {
    let mut errors = Vec::new();
    let mut seen_paths = std::collections::HashSet::new();
    for action in actions {
        errors.extend(validate_action(action));
        if let LogAction::Add(add) = action {
            if !seen_paths.insert(add.path.clone()) {
                errors.push(format!("duplicate Add path '{}' within commit", add.path));
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_and_traversal_paths() {
        let add = Add {
            path: "/abs/path.parquet".to_string(),
            size: 10,
            modification_time: 0,
            data_change: true,
            partition_values: None,
            stats: None,
            tags: None,
        };
        assert!(!validate_add(&add).is_empty());

        let add2 = Add {
            path: "a/../b.parquet".to_string(),
            ..add
        };
        assert!(!validate_add(&add2).is_empty());
    }

    #[test]
    fn accepts_well_formed_add() {
        let add = Add {
            path: "part-00000.parquet".to_string(),
            size: 100,
            modification_time: 1_700_000_000_000,
            data_change: true,
            partition_values: None,
            stats: None,
            tags: None,
        };
        assert!(validate_add(&add).is_empty());
    }

    #[test]
    fn wire_shape_is_single_key_object() {
        let action = LogAction::Protocol(Protocol::default());
        let json = serde_json::to_value(&action).unwrap();
        assert!(json.get("protocol").is_some());
        assert_eq!(json.as_object().unwrap().len(), 1);
    }

    #[test]
    fn order_rank_matches_required_commit_order() {
        assert!(LogAction::Protocol(Protocol::default()).order_rank() < LogAction::MetaData(
            MetaData {
                id: "x".into(),
                name: None,
                description: None,
                format: Format::default(),
                schema_string: "{\"type\":\"struct\",\"fields\":[]}".into(),
                partition_columns: vec![],
                configuration: None,
                created_time: None,
            }
        ).order_rank());
    }

    #[test]
    fn unknown_table_feature_round_trips_opaquely() {
        let f: TableFeature = serde_json::from_str("\"someFutureFeature\"").unwrap();
        assert_eq!(f, TableFeature::Unknown("someFutureFeature".to_string()));
    }
}
