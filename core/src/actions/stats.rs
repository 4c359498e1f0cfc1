//! `FileStats`: the JSON payload stored (as a string) inside `Add.stats`
//!. Column paths use dot notation for nested struct fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{DeltaResult, Error};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileStats {
    pub num_records: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub min_values: HashMap<String, Json>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub max_values: HashMap<String, Json>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub null_count: HashMap<String, u64>,
}

impl FileStats {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (col, count) in &self.null_count {
            if *count > self.num_records {
                errors.push(format!(
                    "nullCount['{col}'] = {count} exceeds numRecords = {}",
                    self.num_records
                ));
            }
        }
        errors
    }

    pub fn to_json_string(&self) -> DeltaResult<String> {
        serde_json::to_string(self).map_err(Error::from)
    }

    pub fn from_json_str(s: &str) -> DeltaResult<Self> {
        let stats: FileStats =
            serde_json::from_str(s).map_err(|e| Error::Schema(format!("invalid stats JSON: {e}")))?;
        let errors = stats.validate();
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        Ok(stats)
    }
}

/// Accumulates min/max/null-count across rows for one column while a file
/// is being written; finalized into the corresponding `FileStats` entries.
#[derive(Debug, Default)]
pub struct ColumnStatsBuilder {
    min: Option<Json>,
    max: Option<Json>,
    null_count: u64,
}

impl ColumnStatsBuilder {
    pub fn observe(&mut self, value: &Json) {
        if value.is_null() {
            self.null_count += 1;
            return;
        }
        match &self.min {
            Some(current) if !json_less_than(value, current) => {}
            _ => self.min = Some(value.clone()),
        }
        match &self.max {
            Some(current) if !json_less_than(current, value) => {}
            _ => self.max = Some(value.clone()),
        }
    }

    pub fn into_parts(self) -> (Option<Json>, Option<Json>, u64) {
        (self.min, self.max, self.null_count)
    }
}

/// Partial ordering sufficient for min/max tracking across the scalar JSON
/// types stats values take (numbers, strings, bools). Mixed-type comparisons
/// are defined as `false` since they cannot occur within one column.
fn json_less_than(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => {
            x.as_f64().unwrap_or(f64::NAN) < y.as_f64().unwrap_or(f64::NAN)
        }
        (Json::String(x), Json::String(y)) => x < y,
        (Json::Bool(x), Json::Bool(y)) => !x & y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json_string() {
        let mut min = HashMap::new();
        min.insert("id".to_string(), Json::from(1));
        let mut max = HashMap::new();
        max.insert("id".to_string(), Json::from(100));
        let mut nulls = HashMap::new();
        nulls.insert("id".to_string(), 0u64);
        let stats = FileStats {
            num_records: 100,
            min_values: min,
            max_values: max,
            null_count: nulls,
        };
        let s = stats.to_json_string().unwrap();
        let parsed = FileStats::from_json_str(&s).unwrap();
        assert_eq!(stats, parsed);
    }

    #[test]
    fn rejects_null_count_exceeding_num_records() {
        let mut nulls = HashMap::new();
        nulls.insert("id".to_string(), 5u64);
        let stats = FileStats {
            num_records: 2,
            null_count: nulls,
            ..Default::default()
        };
        assert!(!stats.validate().is_empty());
    }

    #[test]
    fn column_stats_builder_tracks_min_max_and_nulls() {
        let mut b = ColumnStatsBuilder::default();
        b.observe(&Json::from(5));
        b.observe(&Json::from(1));
        b.observe(&Json::Null);
        b.observe(&Json::from(9));
        let (min, max, nulls) = b.into_parts();
        assert_eq!(min, Some(Json::from(1)));
        assert_eq!(max, Some(Json::from(9)));
        assert_eq!(nulls, 1);
    }
}
