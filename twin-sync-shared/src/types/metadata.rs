use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A geographic coordinate stored on twin metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A metadata value carried by a digital twin.
///
/// Modeled as a closed sum rather than an open `serde_json::Value` so that
/// every value a twin can hold has a declared schema-side counterpart.
/// Untagged variant order matters: `GeoPoint` must be tried before `Object`
/// so `{lat, lon}` maps are not swallowed by the generic object variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
    GeoPoint(GeoPoint),
    Object(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Checks whether this value is admissible for the given field type.
    pub fn matches(&self, field_type: &FieldType) -> bool {
        match (self, field_type) {
            (MetadataValue::Bool(_), FieldType::Scalar(ScalarType::Boolean)) => true,
            (MetadataValue::Number(_), FieldType::Scalar(ScalarType::Number)) => true,
            (MetadataValue::Number(n), FieldType::Scalar(ScalarType::Integer)) => {
                n.fract() == 0.0
            }
            (MetadataValue::Text(_), FieldType::Scalar(ScalarType::Keyword)) => true,
            (MetadataValue::GeoPoint(_), FieldType::Scalar(ScalarType::GeoPoint)) => true,
            (MetadataValue::Object(values), FieldType::Object(schema)) => values
                .iter()
                .all(|(name, value)| schema.get(name).is_some_and(|ft| value.matches(ft))),
            _ => false,
        }
    }
}

/// Leaf field types a model schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Boolean,
    Integer,
    Number,
    Keyword,
    GeoPoint,
}

/// Schema-side dual of [`MetadataValue`].
///
/// A field is either a scalar leaf or a nested object of named fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldType {
    Scalar(ScalarType),
    Object(BTreeMap<String, FieldType>),
}

impl FieldType {
    /// Human-readable name used in conflict reports.
    pub fn type_name(&self) -> String {
        match self {
            FieldType::Scalar(ScalarType::Boolean) => "boolean".to_string(),
            FieldType::Scalar(ScalarType::Integer) => "integer".to_string(),
            FieldType::Scalar(ScalarType::Number) => "number".to_string(),
            FieldType::Scalar(ScalarType::Keyword) => "keyword".to_string(),
            FieldType::Scalar(ScalarType::GeoPoint) => "geo_point".to_string(),
            FieldType::Object(_) => "object".to_string(),
        }
    }
}

/// A named field-type schema, as declared by a model's metadata section.
pub type FieldSchema = BTreeMap<String, FieldType>;
