//! The query filter AST: a recursive sum type, not an
//! opaque document — the MongoDB-style `{$gt: ...}` document shape is only
//! the wire/input syntax.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::variant::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Json),
    Ne(String, Json),
    Gt(String, Json),
    Gte(String, Json),
    Lt(String, Json),
    Lte(String, Json),
    In(String, Vec<Json>),
    Nin(String, Vec<Json>),
    Exists(String, bool),
    Regex(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Nor(Vec<Filter>),
}

/// Parses the MongoDB-style document form into a `Filter` tree. Bare
/// `{col: value}` is sugar for `Eq`.
pub fn parse_filter(doc: &Json) -> Option<Filter> {
    let obj = doc.as_object()?;
    if obj.len() == 1 {
        if let Some((key, value)) = obj.iter().next() {
            if let Some(parsed) = parse_logical(key, value) {
                return Some(parsed);
            }
        }
    }

    let mut clauses = Vec::new();
    for (key, value) in obj {
        clauses.push(parse_field_clause(key, value)?);
    }
    match clauses.len() {
        0 => None,
        1 => Some(clauses.into_iter().next().unwrap()),
        _ => Some(Filter::And(clauses)),
    }
}

fn parse_logical(key: &str, value: &Json) -> Option<Filter> {
    match key {
        "$and" => Some(Filter::And(parse_filter_array(value)?)),
        "$or" => Some(Filter::Or(parse_filter_array(value)?)),
        "$nor" => Some(Filter::Nor(parse_filter_array(value)?)),
        "$not" => Some(Filter::Not(Box::new(parse_filter(value)?))),
        _ => None,
    }
}

fn parse_filter_array(value: &Json) -> Option<Vec<Filter>> {
    value
        .as_array()?
        .iter()
        .map(parse_filter)
        .collect::<Option<Vec<_>>>()
}

fn parse_field_clause(field: &str, spec: &Json) -> Option<Filter> {
    if let Some(obj) = spec.as_object() {
        if obj.keys().any(|k| k.starts_with('$')) {
            let mut ops = Vec::new();
            for (op, value) in obj {
                ops.push(parse_op(field, op, value)?);
            }
            return Some(match ops.len() {
                1 => ops.into_iter().next().unwrap(),
                _ => Filter::And(ops),
            });
        }
    }
    Some(Filter::Eq(field.to_string(), spec.clone()))
}

fn parse_op(field: &str, op: &str, value: &Json) -> Option<Filter> {
    Some(match op {
        "$eq" => Filter::Eq(field.to_string(), value.clone()),
        "$ne" => Filter::Ne(field.to_string(), value.clone()),
        "$gt" => Filter::Gt(field.to_string(), value.clone()),
        "$gte" => Filter::Gte(field.to_string(), value.clone()),
        "$lt" => Filter::Lt(field.to_string(), value.clone()),
        "$lte" => Filter::Lte(field.to_string(), value.clone()),
        "$in" => Filter::In(field.to_string(), value.as_array()?.clone()),
        "$nin" => Filter::Nin(field.to_string(), value.as_array()?.clone()),
        "$exists" => Filter::Exists(field.to_string(), value.as_bool()?),
        "$regex" => Filter::Regex(field.to_string(), value.as_str()?.to_string()),
        _ => return None,
    })
}

/// A compiled zone-map predicate used for pushdown pruning.
/// `Between` collapses a `$gte` + `$lte` pair on the same column.
#[derive(Debug, Clone, PartialEq)]
pub enum ZonePredicate {
    Eq(String, Json),
    Gt(String, Json),
    Gte(String, Json),
    Lt(String, Json),
    Lte(String, Json),
    In(String, Vec<Json>),
    Between(String, Json, Json),
}

impl ZonePredicate {
    pub fn column(&self) -> &str {
        match self {
            ZonePredicate::Eq(c, _)
            | ZonePredicate::Gt(c, _)
            | ZonePredicate::Gte(c, _)
            | ZonePredicate::Lt(c, _)
            | ZonePredicate::Lte(c, _)
            | ZonePredicate::In(c, _)
            | ZonePredicate::Between(c, _, _) => c,
        }
    }
}

/// Compiles only the conjunctive part of a filter into zone-map predicates.
/// `$or`/`$not`/`$nor` branches don't contribute prunable predicates —
/// they still filter rows post-read via `evaluate`.
pub fn compile_zone_predicates(filter: &Filter) -> Vec<ZonePredicate> {
    let mut raw = Vec::new();
    collect_conjunctive(filter, &mut raw);
    collapse_ranges(raw)
}

fn collect_conjunctive(filter: &Filter, out: &mut Vec<ZonePredicate>) {
    match filter {
        Filter::And(branches) => {
            for b in branches {
                collect_conjunctive(b, out);
            }
        }
        Filter::Eq(c, v) => out.push(ZonePredicate::Eq(c.clone(), v.clone())),
        Filter::Gt(c, v) => out.push(ZonePredicate::Gt(c.clone(), v.clone())),
        Filter::Gte(c, v) => out.push(ZonePredicate::Gte(c.clone(), v.clone())),
        Filter::Lt(c, v) => out.push(ZonePredicate::Lt(c.clone(), v.clone())),
        Filter::Lte(c, v) => out.push(ZonePredicate::Lte(c.clone(), v.clone())),
        Filter::In(c, vs) => out.push(ZonePredicate::In(c.clone(), vs.clone())),
        // Or/Not/Nor/Ne/Exists/Regex: not prunable at this stage.
        _ => {}
    }
}

fn collapse_ranges(predicates: Vec<ZonePredicate>) -> Vec<ZonePredicate> {
    let mut by_column: HashMap<String, (Option<Json>, Option<Json>)> = HashMap::new();
    let mut others = Vec::new();

    for p in predicates {
        match p {
            ZonePredicate::Gte(c, v) => by_column.entry(c).or_default().0 = Some(v),
            ZonePredicate::Lte(c, v) => by_column.entry(c).or_default().1 = Some(v),
            other => others.push(other),
        }
    }

    let mut out = Vec::new();
    for (col, (lower, upper)) in by_column {
        match (lower, upper) {
            (Some(l), Some(u)) => out.push(ZonePredicate::Between(col, l, u)),
            (Some(l), None) => out.push(ZonePredicate::Gte(col, l)),
            (None, Some(u)) => out.push(ZonePredicate::Lte(col, u)),
            (None, None) => {}
        }
    }
    out.extend(others);
    out
}

/// Whether a zone map `[min, max]` on this predicate's column proves no row
/// in the unit can match. `min`/`max` are `None` when
/// stats are unavailable for the column, in which case we never skip.
pub fn predicate_skips(predicate: &ZonePredicate, min: Option<&Json>, max: Option<&Json>) -> bool {
    let (Some(min), Some(max)) = (min, max) else {
        return false;
    };
    match predicate {
        ZonePredicate::Eq(_, v) => json_lt(v, min) || json_lt(max, v),
        ZonePredicate::Gt(_, v) => !json_lt(v, max),
        ZonePredicate::Gte(_, v) => json_lt(max, v),
        ZonePredicate::Lt(_, v) => !json_lt(min, v),
        ZonePredicate::Lte(_, v) => json_lt(v, min),
        ZonePredicate::In(_, vs) => vs.iter().all(|v| json_lt(v, min) || json_lt(max, v)),
        ZonePredicate::Between(_, a, b) => json_lt(b, min) || json_lt(max, a),
    }
}

fn json_lt(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => {
            x.as_f64().unwrap_or(f64::NAN) < y.as_f64().unwrap_or(f64::NAN)
        }
        (Json::String(x), Json::String(y)) => x < y,
        (Json::Bool(x), Json::Bool(y)) => !x & y,
        _ => false,
    }
}

/// Whether a partition-column predicate can prove no row in a file with
/// the given `partitionValues` can match. Only
/// equality/set predicates on partition columns prune here.
pub fn partition_prunes(filter: &Filter, partition_values: &HashMap<String, String>) -> bool {
    match filter {
        Filter::And(branches) => branches.iter().any(|b| partition_prunes(b, partition_values)),
        Filter::Eq(col, v) => match partition_values.get(col) {
            Some(actual) => !json_matches_partition_value(v, actual),
            None => false,
        },
        Filter::In(col, vs) => match partition_values.get(col) {
            Some(actual) => !vs.iter().any(|v| json_matches_partition_value(v, actual)),
            None => false,
        },
        _ => false,
    }
}

fn json_matches_partition_value(v: &Json, actual: &str) -> bool {
    match v {
        Json::String(s) => s == actual,
        Json::Number(n) => n.to_string() == actual,
        Json::Bool(b) => b.to_string() == actual,
        Json::Null => actual.is_empty(),
        _ => false,
    }
}

/// Full in-memory evaluation of a filter against a decoded row.
/// `row` is a `Value::Object`; dot-notation accesses nested fields.
pub fn evaluate(filter: &Filter, row: &Value) -> bool {
    match filter {
        Filter::Eq(path, v) => value_at(row, path).map_or(false, |rv| value_eq(rv, v)),
        Filter::Ne(path, v) => !value_at(row, path).map_or(false, |rv| value_eq(rv, v)),
        Filter::Gt(path, v) => value_at(row, path).map_or(false, |rv| value_cmp(rv, v) == Some(std::cmp::Ordering::Greater)),
        Filter::Gte(path, v) => value_at(row, path).map_or(false, |rv| {
            matches!(
                value_cmp(rv, v),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            )
        }),
        Filter::Lt(path, v) => value_at(row, path).map_or(false, |rv| value_cmp(rv, v) == Some(std::cmp::Ordering::Less)),
        Filter::Lte(path, v) => value_at(row, path).map_or(false, |rv| {
            matches!(
                value_cmp(rv, v),
                Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
            )
        }),
        Filter::In(path, vs) => value_at(row, path).map_or(false, |rv| vs.iter().any(|v| value_eq(rv, v))),
        Filter::Nin(path, vs) => !value_at(row, path).map_or(false, |rv| vs.iter().any(|v| value_eq(rv, v))),
        Filter::Exists(path, should_exist) => value_at(row, path).is_some() == *should_exist,
        Filter::Regex(path, pattern) => value_at(row, path)
            .and_then(|v| v.as_str())
            .map_or(false, |s| simple_regex_match(pattern, s)),
        Filter::And(branches) => branches.iter().all(|b| evaluate(b, row)),
        Filter::Or(branches) => branches.iter().any(|b| evaluate(b, row)),
        Filter::Not(inner) => !evaluate(inner, row),
        Filter::Nor(branches) => !branches.iter().any(|b| evaluate(b, row)),
    }
}

fn value_at<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = row;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

fn value_eq(v: &Value, json: &Json) -> bool {
    value_cmp(v, json) == Some(std::cmp::Ordering::Equal)
}

fn value_cmp(v: &Value, json: &Json) -> Option<std::cmp::Ordering> {
    match (v, json) {
        (Value::Int64(a), Json::Number(b)) => (*a as f64).partial_cmp(&b.as_f64()?),
        (Value::Float64(a), Json::Number(b)) => a.partial_cmp(&b.as_f64()?),
        (Value::String(a), Json::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::Bool(a), Json::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Json::Null) => Some(std::cmp::Ordering::Equal),
        _ => None,
    }
}

/// Minimal glob-free substring/anchor regex support sufficient for the
/// common `$regex` filter uses (`^prefix`, `suffix$`, bare substring);
/// falls back to substring matching for anything else.
fn simple_regex_match(pattern: &str, text: &str) -> bool {
    if let Some(prefix) = pattern.strip_prefix('^') {
        if let Some(exact) = prefix.strip_suffix('$') {
            return text == exact;
        }
        return text.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_suffix('$') {
        return text.ends_with(suffix);
    }
    text.contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;

    #[test]
    fn parses_bare_equality_as_eq() {
        let f = parse_filter(&json!({"id": 1})).unwrap();
        assert_eq!(f, Filter::Eq("id".to_string(), json!(1)));
    }

    #[test]
    fn parses_operator_document() {
        let f = parse_filter(&json!({"id": {"$gt": 1}})).unwrap();
        assert_eq!(f, Filter::Gt("id".to_string(), json!(1)));
    }

    #[test]
    fn collapses_gte_lte_into_between() {
        let f = Filter::And(vec![
            Filter::Gte("id".to_string(), json!(1)),
            Filter::Lte("id".to_string(), json!(10)),
        ]);
        let predicates = compile_zone_predicates(&f);
        assert_eq!(predicates, vec![ZonePredicate::Between("id".to_string(), json!(1), json!(10))]);
    }

    #[test]
    fn or_branches_do_not_contribute_zone_predicates() {
        let f = Filter::Or(vec![
            Filter::Eq("id".to_string(), json!(1)),
            Filter::Eq("id".to_string(), json!(2)),
        ]);
        assert!(compile_zone_predicates(&f).is_empty());
    }

    #[test]
    fn predicate_skip_logic_for_eq() {
        let p = ZonePredicate::Eq("id".to_string(), json!(5));
        assert!(predicate_skips(&p, Some(&json!(10)), Some(&json!(20))));
        assert!(!predicate_skips(&p, Some(&json!(1)), Some(&json!(20))));
    }

    #[test]
    fn partition_prune_excludes_non_matching_equality() {
        let filter = Filter::Eq("year".to_string(), json!(2024));
        let mut pv = HashMap::new();
        pv.insert("year".to_string(), "2025".to_string());
        assert!(partition_prunes(&filter, &pv));

        pv.insert("year".to_string(), "2024".to_string());
        assert!(!partition_prunes(&filter, &pv));
    }

    #[test]
    fn evaluate_handles_nested_dot_paths() {
        let mut inner = IndexMap::new();
        inner.insert("city".to_string(), Value::String("nyc".to_string()));
        let mut row = IndexMap::new();
        row.insert("address".to_string(), Value::Object(inner));
        let row = Value::Object(row);

        let f = Filter::Eq("address.city".to_string(), json!("nyc"));
        assert!(evaluate(&f, &row));
    }
}
