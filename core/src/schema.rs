//! Table schema model: the JSON struct type Delta stores in
//! `MetaData.schemaString`.
//!
//! Kept as a dedicated tree rather than reusing `arrow_schema::Schema`
//! directly, because the on-disk representation (nullability, metadata
//! maps, nested structs/arrays/maps) needs to round-trip through JSON
//! exactly as Delta readers expect, independent of however we choose to
//! project it into Arrow for a given Parquet read.

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{DeltaResult, Error};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub nullable: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StructField {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            metadata: HashMap::new(),
        }
    }

    /// The `delta.columnMapping.id`/`delta.columnMapping.physicalName` pair,
    /// when column mapping mode is enabled.
    pub fn column_mapping_id(&self) -> Option<i64> {
        self.metadata.get("delta.columnMapping.id")?.as_i64()
    }

    pub fn physical_name(&self) -> Option<&str> {
        self.metadata
            .get("delta.columnMapping.physicalName")?
            .as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructType {
    #[serde(rename = "type")]
    #[serde(default = "struct_type_tag")]
    pub type_tag: String,
    pub fields: Vec<StructField>,
}

fn struct_type_tag() -> String {
    "struct".to_string()
}

impl StructType {
    pub fn new(fields: Vec<StructField>) -> Self {
        Self {
            type_tag: "struct".to_string(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Delta's type encoding: primitive types are bare JSON strings
/// (`"long"`, `"decimal(10,2)"`), while `array`/`map`/`struct` are nested
/// objects carrying their own `"type"` discriminator. This does not map
/// onto serde's built-in enum representations, so (de)serialization is
/// implemented by hand below.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    String,
    Long,
    Integer,
    Short,
    Byte,
    Float,
    Double,
    Boolean,
    Binary,
    Date,
    Timestamp,
    TimestampNtz,
    /// Self-describing encoded value: object and array
    /// fields inferred during write always map to this type.
    Variant,
    Decimal { precision: u8, scale: i8 },
    Array {
        element_type: Box<DataType>,
        contains_null: bool,
    },
    Map {
        key_type: Box<DataType>,
        value_type: Box<DataType>,
        value_contains_null: bool,
    },
    Struct(Box<StructType>),
}

impl DataType {
    pub fn is_scalar(&self) -> bool {
        !matches!(
            self,
            DataType::Array { .. } | DataType::Map { .. } | DataType::Struct(_)
        )
    }

    /// Whether zone-map statistics are meaningful for a column of this type
    ///: nested/variant-shaped columns are excluded.
    pub fn supports_stats(&self) -> bool {
        self.is_scalar() && !matches!(self, DataType::Binary | DataType::Variant)
    }

    fn primitive_name(&self) -> Option<&'static str> {
        Some(match self {
            DataType::String => "string",
            DataType::Long => "long",
            DataType::Integer => "integer",
            DataType::Short => "short",
            DataType::Byte => "byte",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Boolean => "boolean",
            DataType::Binary => "binary",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::TimestampNtz => "timestamp_ntz",
            DataType::Variant => "variant",
            _ => return None,
        })
    }

    fn parse_primitive(s: &str) -> Option<Self> {
        Some(match s {
            "string" => DataType::String,
            "long" => DataType::Long,
            "integer" => DataType::Integer,
            "short" => DataType::Short,
            "byte" => DataType::Byte,
            "float" => DataType::Float,
            "double" => DataType::Double,
            "boolean" => DataType::Boolean,
            "binary" => DataType::Binary,
            "date" => DataType::Date,
            "timestamp" => DataType::Timestamp,
            "timestamp_ntz" => DataType::TimestampNtz,
            "variant" => DataType::Variant,
            other => return Self::parse_decimal(other),
        })
    }

    fn parse_decimal(s: &str) -> Option<Self> {
        let inner = s.strip_prefix("decimal(")?.strip_suffix(')')?;
        let (p, sc) = inner.split_once(',')?;
        let precision: u8 = p.trim().parse().ok()?;
        let scale: i8 = sc.trim().parse().ok()?;
        Some(DataType::Decimal { precision, scale })
    }
}

impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if let Some(name) = self.primitive_name() {
            return serializer.serialize_str(name);
        }
        match self {
            DataType::Decimal { precision, scale } => {
                serializer.serialize_str(&format!("decimal({precision},{scale})"))
            }
            DataType::Array {
                element_type,
                contains_null,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "array")?;
                map.serialize_entry("elementType", element_type)?;
                map.serialize_entry("containsNull", contains_null)?;
                map.end()
            }
            DataType::Map {
                key_type,
                value_type,
                value_contains_null,
            } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("type", "map")?;
                map.serialize_entry("keyType", key_type)?;
                map.serialize_entry("valueType", value_type)?;
                map.serialize_entry("valueContainsNull", value_contains_null)?;
                map.end()
            }
            DataType::Struct(s) => s.serialize(serializer),
            _ => unreachable!("primitive_name covers all remaining variants"),
        }
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DataTypeVisitor)
    }
}

struct DataTypeVisitor;

impl<'de> Visitor<'de> for DataTypeVisitor {
    type Value = DataType;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a Delta type name or a struct/array/map type object")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        DataType::parse_primitive(v)
            .ok_or_else(|| de::Error::custom(format!("unknown primitive type '{v}'")))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut tag: Option<String> = None;
        let mut element_type: Option<DataType> = None;
        let mut contains_null: Option<bool> = None;
        let mut key_type: Option<DataType> = None;
        let mut value_type: Option<DataType> = None;
        let mut value_contains_null: Option<bool> = None;
        let mut fields: Option<Vec<StructField>> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "type" => tag = Some(map.next_value()?),
                "elementType" => element_type = Some(map.next_value()?),
                "containsNull" => contains_null = Some(map.next_value()?),
                "keyType" => key_type = Some(map.next_value()?),
                "valueType" => value_type = Some(map.next_value()?),
                "valueContainsNull" => value_contains_null = Some(map.next_value()?),
                "fields" => fields = Some(map.next_value()?),
                _ => {
                    let _ignored: serde_json::Value = map.next_value()?;
                }
            }
        }

        match tag.as_deref() {
            Some("array") => Ok(DataType::Array {
                element_type: Box::new(
                    element_type.ok_or_else(|| de::Error::missing_field("elementType"))?,
                ),
                contains_null: contains_null.ok_or_else(|| de::Error::missing_field("containsNull"))?,
            }),
            Some("map") => Ok(DataType::Map {
                key_type: Box::new(key_type.ok_or_else(|| de::Error::missing_field("keyType"))?),
                value_type: Box::new(
                    value_type.ok_or_else(|| de::Error::missing_field("valueType"))?,
                ),
                value_contains_null: value_contains_null
                    .ok_or_else(|| de::Error::missing_field("valueContainsNull"))?,
            }),
            Some("struct") => Ok(DataType::Struct(Box::new(StructType {
                type_tag: "struct".to_string(),
                fields: fields.ok_or_else(|| de::Error::missing_field("fields"))?,
            }))),
            Some(other) => Err(de::Error::custom(format!("unknown complex type '{other}'"))),
            None => Err(de::Error::missing_field("type")),
        }
    }
}

/// Parses and validates a `MetaData.schemaString` payload.
///
/// Delta stores the schema as a JSON string rather than a structured field
/// of the action itself, so this boundary is where malformed schema JSON
/// turns into a `DeltaResult` instead of a panic.
pub fn parse_schema_string(schema_string: &str) -> DeltaResult<StructType> {
    let schema: StructType = serde_json::from_str(schema_string)
        .map_err(|e| Error::Schema(format!("invalid schemaString: {e}")))?;
    validate_schema(&schema)?;
    Ok(schema)
}

pub fn schema_to_string(schema: &StructType) -> DeltaResult<String> {
    serde_json::to_string(schema).map_err(Error::from)
}

/// Structural validation independent of any particular table state:
/// no duplicate field names at a given nesting level, and (if column
/// mapping is present on any field) every field in the struct has it.
fn validate_schema(schema: &StructType) -> DeltaResult<()> {
    validate_struct(schema, &mut Vec::new())
}

fn validate_struct(s: &StructType, path: &mut Vec<String>) -> DeltaResult<()> {
    let mut seen = std::collections::HashSet::new();
    let mapped = s
        .fields
        .iter()
        .filter(|f| f.column_mapping_id().is_some())
        .count();
    if mapped != 0 && mapped != s.fields.len() {
        return Err(Error::Schema(format!(
            "column mapping must be applied to all fields of a struct or none (at {})",
            path.join(".")
        )));
    }
    for field in &s.fields {
        if !seen.insert(field.name.clone()) {
            return Err(Error::Schema(format!(
                "duplicate field name '{}' at {}",
                field.name,
                path.join(".")
            )));
        }
        path.push(field.name.clone());
        validate_data_type(&field.data_type, path)?;
        path.pop();
    }
    Ok(())
}

fn validate_data_type(dt: &DataType, path: &mut Vec<String>) -> DeltaResult<()> {
    match dt {
        DataType::Struct(s) => validate_struct(s, path),
        DataType::Array { element_type, .. } => validate_data_type(element_type, path),
        DataType::Map {
            key_type,
            value_type,
            ..
        } => {
            validate_data_type(key_type, path)?;
            validate_data_type(value_type, path)
        }
        DataType::Decimal { precision, scale } => {
            if *precision == 0 || *precision > 38 || *scale as i16 > *precision as i16 {
                return Err(Error::Schema(format!(
                    "invalid decimal(precision={precision}, scale={scale}) at {}",
                    path.join(".")
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
