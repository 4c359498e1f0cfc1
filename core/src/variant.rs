//! Variant encoding: a self-describing byte sequence for schema-less values,
//! plus a shared string dictionary.
//!
//! `Value` is the "universal JSON data model" the design notes
//! call for: a sum type rather than `serde_json::Value` directly, so we can
//! distinguish `Int64` from `Float64` and keep mapping insertion order via
//! `IndexMap` even where `serde_json`'s default feature set would collapse
//! it into a `BTreeMap`.

use indexmap::IndexMap;

use crate::error::{DeltaResult, Error};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(i64),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// The two components this encoding requires: a shared dictionary of object
/// keys and a recursive, self-describing value buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedVariant {
    pub metadata: Vec<u8>,
    pub value: Vec<u8>,
}

// Type tags for the value buffer. One byte each, following the usual
// "tagged sum type, not inheritance" guidance.
const TAG_NULL: u8 = 0;
const TAG_TRUE: u8 = 1;
const TAG_FALSE: u8 = 2;
const TAG_INT64: u8 = 3;
const TAG_FLOAT64: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_TIMESTAMP: u8 = 7;
const TAG_ARRAY: u8 = 8;
const TAG_OBJECT: u8 = 9;

/// Encode a value tree into `{ metadata, value }`. Deterministic: the
/// dictionary is always the sorted, deduplicated set of object keys
/// encountered, so identical inputs always produce identical bytes
/// usable in content-addressed contexts.
pub fn encode(value: &Value) -> EncodedVariant {
    let mut dict = Vec::new();
    collect_keys(value, &mut dict);
    dict.sort();
    dict.dedup();

    let mut out = Vec::new();
    encode_value(value, &dict, &mut out);

    EncodedVariant {
        metadata: encode_dictionary(&dict),
        value: out,
    }
}

fn collect_keys(value: &Value, keys: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                keys.push(k.clone());
                collect_keys(v, keys);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_keys(v, keys);
            }
        }
        _ => {}
    }
}

fn encode_dictionary(dict: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(out.len() as u64, &mut Vec::new()); // no-op, keeps symmetry with value encoding
    write_varint(dict.len() as u64, &mut out);
    for key in dict {
        let bytes = key.as_bytes();
        write_varint(bytes.len() as u64, &mut out);
        out.extend_from_slice(bytes);
    }
    out
}

fn encode_value(value: &Value, dict: &[String], out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Int64(i) => {
            out.push(TAG_INT64);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float64(f) => {
            out.push(TAG_FLOAT64);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            let bytes = s.as_bytes();
            write_varint(bytes.len() as u64, out);
            out.extend_from_slice(bytes);
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            write_varint(b.len() as u64, out);
            out.extend_from_slice(b);
        }
        Value::Timestamp(ms) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&ms.to_le_bytes());
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            write_varint(items.len() as u64, out);
            for item in items {
                encode_value(item, dict, out);
            }
        }
        Value::Object(map) => {
            out.push(TAG_OBJECT);
            write_varint(map.len() as u64, out);
            for (key, val) in map {
                // Insertion order is preserved by walking the IndexMap directly;
                // only the key *dictionary* is sorted, not field emission order.
                let idx = dict
                    .iter()
                    .position(|k| k == key)
                    .expect("key collected during dictionary pass");
                write_varint(idx as u64, out);
                encode_value(val, dict, out);
            }
        }
    }
}

fn write_varint(mut n: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> DeltaResult<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| Error::Corruption {
                path: "<variant>".into(),
                reason: "truncated varint".into(),
            })?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

/// Decode `{ metadata, value }` back into a `Value` tree. Round-trips
/// exactly for every value the encoder can produce.
pub fn decode(encoded: &EncodedVariant) -> DeltaResult<Value> {
    let dict = decode_dictionary(&encoded.metadata)?;
    let mut pos = 0;
    let value = decode_value(&encoded.value, &dict, &mut pos)?;
    Ok(value)
}

fn decode_dictionary(buf: &[u8]) -> DeltaResult<Vec<String>> {
    let mut pos = 0;
    let count = read_varint(buf, &mut pos)?;
    let mut dict = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = read_varint(buf, &mut pos)? as usize;
        let end = pos + len;
        let slice = buf.get(pos..end).ok_or_else(|| Error::Corruption {
            path: "<variant>".into(),
            reason: "truncated dictionary entry".into(),
        })?;
        dict.push(String::from_utf8_lossy(slice).into_owned());
        pos = end;
    }
    Ok(dict)
}

fn decode_value(buf: &[u8], dict: &[String], pos: &mut usize) -> DeltaResult<Value> {
    let tag = *buf.get(*pos).ok_or_else(|| Error::Corruption {
        path: "<variant>".into(),
        reason: "truncated value: missing tag".into(),
    })?;
    *pos += 1;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_INT64 => {
            let bytes = read_fixed::<8>(buf, pos)?;
            Ok(Value::Int64(i64::from_le_bytes(bytes)))
        }
        TAG_FLOAT64 => {
            let bytes = read_fixed::<8>(buf, pos)?;
            Ok(Value::Float64(f64::from_le_bytes(bytes)))
        }
        TAG_STRING => {
            let len = read_varint(buf, pos)? as usize;
            let slice = read_slice(buf, pos, len)?;
            Ok(Value::String(String::from_utf8_lossy(slice).into_owned()))
        }
        TAG_BYTES => {
            let len = read_varint(buf, pos)? as usize;
            let slice = read_slice(buf, pos, len)?;
            Ok(Value::Bytes(slice.to_vec()))
        }
        TAG_TIMESTAMP => {
            let bytes = read_fixed::<8>(buf, pos)?;
            Ok(Value::Timestamp(i64::from_le_bytes(bytes)))
        }
        TAG_ARRAY => {
            let len = read_varint(buf, pos)? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(buf, dict, pos)?);
            }
            Ok(Value::Array(items))
        }
        TAG_OBJECT => {
            let len = read_varint(buf, pos)? as usize;
            let mut map = IndexMap::with_capacity(len);
            for _ in 0..len {
                let idx = read_varint(buf, pos)? as usize;
                let key = dict
                    .get(idx)
                    .ok_or_else(|| Error::Corruption {
                        path: "<variant>".into(),
                        reason: format!("dictionary index {idx} out of range"),
                    })?
                    .clone();
                let val = decode_value(buf, dict, pos)?;
                map.insert(key, val);
            }
            Ok(Value::Object(map))
        }
        other => Err(Error::Corruption {
            path: "<variant>".into(),
            reason: format!("unknown value tag {other}"),
        }),
    }
}

fn read_fixed<const N: usize>(buf: &[u8], pos: &mut usize) -> DeltaResult<[u8; N]> {
    let slice = read_slice(buf, pos, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn read_slice<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> DeltaResult<&'a [u8]> {
    let end = *pos + len;
    let slice = buf.get(*pos..end).ok_or_else(|| Error::Corruption {
        path: "<variant>".into(),
        reason: "truncated value buffer".into(),
    })?;
    *pos = end;
    Ok(slice)
}

/// Decode a "shredded" variant: designated top-level subfields have been
/// extracted into sibling typed columns (`shredded`), leaving only the
/// residual in `residual`. This reconstructs the original tree by
/// overlaying the shredded fields on top of the residual object.
///
/// Statistics for non-scalar shredded leaves
/// are not addressed here; this function only handles reconstruction of
/// the logical value, which is always well defined.
pub fn decode_shredded(
    residual: Option<&EncodedVariant>,
    shredded: &IndexMap<String, Value>,
) -> DeltaResult<Value> {
    let mut map = match residual {
        Some(encoded) => match decode(encoded)? {
            Value::Object(m) => m,
            Value::Null => IndexMap::new(),
            other => {
                return Err(Error::Corruption {
                    path: "<variant>".into(),
                    reason: format!("residual variant is not an object: {other:?}"),
                })
            }
        },
        None => IndexMap::new(),
    };
    for (k, v) in shredded {
        map.insert(k.clone(), v.clone());
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let encoded = encode(&v);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn roundtrips_scalars() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::Int64(-42));
        roundtrip(Value::Float64(3.25));
        roundtrip(Value::String("hello".into()));
        roundtrip(Value::Bytes(vec![1, 2, 3]));
        roundtrip(Value::Timestamp(1_700_000_000_000));
    }

    #[test]
    fn roundtrips_empty_containers_distinct_from_null() {
        let empty_arr = Value::Array(vec![]);
        let empty_obj = Value::Object(IndexMap::new());
        roundtrip(empty_arr.clone());
        roundtrip(empty_obj.clone());
        assert_ne!(encode(&empty_arr).value, encode(&Value::Null).value);
        assert_ne!(encode(&empty_obj).value, encode(&Value::Null).value);
    }

    #[test]
    fn preserves_insertion_order() {
        let mut map = IndexMap::new();
        map.insert("z".to_string(), Value::Int64(1));
        map.insert("a".to_string(), Value::Int64(2));
        map.insert("m".to_string(), Value::Int64(3));
        let v = Value::Object(map);
        let decoded = decode(&encode(&v)).unwrap();
        match decoded {
            Value::Object(m) => {
                let keys: Vec<_> = m.keys().cloned().collect();
                assert_eq!(keys, vec!["z", "a", "m"]);
            }
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn distinguishes_int_from_float() {
        assert_ne!(encode(&Value::Int64(2)).value, encode(&Value::Float64(2.0)).value);
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut m1 = IndexMap::new();
        m1.insert("a".into(), Value::Int64(1));
        m1.insert("b".into(), Value::Int64(2));
        let mut m2 = IndexMap::new();
        m2.insert("a".into(), Value::Int64(1));
        m2.insert("b".into(), Value::Int64(2));
        assert_eq!(encode(&Value::Object(m1)), encode(&Value::Object(m2)));
    }

    #[test]
    fn nested_structures_roundtrip() {
        let mut inner = IndexMap::new();
        inner.insert("x".to_string(), Value::Int64(1));
        let v = Value::Array(vec![
            Value::Object(inner),
            Value::String("s".into()),
            Value::Null,
        ]);
        roundtrip(v);
    }

    #[test]
    fn shredded_overlay_merges_with_residual() {
        let mut residual_map = IndexMap::new();
        residual_map.insert("keep".to_string(), Value::Int64(1));
        let residual = encode(&Value::Object(residual_map));

        let mut shredded = IndexMap::new();
        shredded.insert("extracted".to_string(), Value::String("v".into()));

        let merged = decode_shredded(Some(&residual), &shredded).unwrap();
        match merged {
            Value::Object(m) => {
                assert_eq!(m.get("keep"), Some(&Value::Int64(1)));
                assert_eq!(m.get("extracted"), Some(&Value::String("v".into())));
            }
            _ => panic!("expected object"),
        }
    }
}
