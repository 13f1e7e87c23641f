//! Firestore REST API types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Firestore document value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String), // Firestore sends integers as strings
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    pub fields: Option<HashMap<String, Value>>,
}

impl Value {
    pub fn map(fields: HashMap<String, Value>) -> Self {
        Value::MapValue(MapValue {
            fields: Some(fields),
        })
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::ArrayValue(ArrayValue {
            values: Some(values),
        })
    }

    /// Entries of a map value.
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::MapValue(MapValue { fields: Some(f) }) => Some(f),
            _ => None,
        }
    }

    /// Elements of an array value. An empty Firestore array has no `values`.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::ArrayValue(ArrayValue { values: Some(v) }) => Some(v),
            Value::ArrayValue(ArrayValue { values: None }) => Some(&[]),
            _ => None,
        }
    }
}

/// Look up a dotted field path (`tasks.clips.progress`) in document fields.
pub fn field_at<'a>(fields: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_map()?.get(segment)?;
    }
    Some(current)
}

/// Firestore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name
    pub name: Option<String>,
    /// Document fields
    pub fields: Option<HashMap<String, Value>>,
    /// Create time
    pub create_time: Option<String>,
    /// Update time
    pub update_time: Option<String>,
}

impl Document {
    /// Create a new document with the given fields.
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self {
            name: None,
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }

    /// Last segment of the resource name.
    pub fn id(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.rsplit('/').next())
    }
}

/// Convert a Rust value to Firestore Value.
pub trait ToFirestoreValue {
    fn to_firestore_value(&self) -> Value;
}

impl ToFirestoreValue for String {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.clone())
    }
}

impl ToFirestoreValue for &str {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.to_string())
    }
}

impl ToFirestoreValue for i64 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for u32 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for u8 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for usize {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for f64 {
    fn to_firestore_value(&self) -> Value {
        Value::DoubleValue(*self)
    }
}

impl ToFirestoreValue for bool {
    fn to_firestore_value(&self) -> Value {
        Value::BooleanValue(*self)
    }
}

impl ToFirestoreValue for DateTime<Utc> {
    fn to_firestore_value(&self) -> Value {
        Value::TimestampValue(self.to_rfc3339())
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Option<T> {
    fn to_firestore_value(&self) -> Value {
        match self {
            Some(v) => v.to_firestore_value(),
            None => Value::NullValue(()),
        }
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Vec<T> {
    fn to_firestore_value(&self) -> Value {
        Value::array(self.iter().map(|v| v.to_firestore_value()).collect())
    }
}

impl ToFirestoreValue for serde_json::Value {
    fn to_firestore_value(&self) -> Value {
        match self {
            serde_json::Value::Null => Value::NullValue(()),
            serde_json::Value::Bool(b) => Value::BooleanValue(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::IntegerValue(i.to_string()),
                None => Value::DoubleValue(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::StringValue(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(|v| v.to_firestore_value()).collect())
            }
            serde_json::Value::Object(map) => Value::map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_firestore_value()))
                    .collect(),
            ),
        }
    }
}

/// Convert Firestore Value to Rust type.
pub trait FromFirestoreValue: Sized {
    fn from_firestore_value(value: &Value) -> Option<Self>;
}

impl FromFirestoreValue for String {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromFirestoreValue for u32 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            Value::DoubleValue(f) if *f >= 0.0 => Some(*f as u32),
            _ => None,
        }
    }
}

impl FromFirestoreValue for f64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::DoubleValue(f) => Some(*f),
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_wire_format() {
        let value = Value::map(HashMap::from([(
            "progress".to_string(),
            50u8.to_firestore_value(),
        )]));
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"mapValue": {"fields": {"progress": {"integerValue": "50"}}}})
        );
    }

    #[test]
    fn test_field_at_walks_maps() {
        let doc: Document = serde_json::from_value(json!({
            "name": "projects/x/databases/(default)/documents/projects/p1",
            "fields": {
                "tasks": {"mapValue": {"fields": {
                    "clips": {"mapValue": {"fields": {"progress": {"integerValue": "75"}}}}
                }}}
            }
        }))
        .unwrap();

        let fields = doc.fields.as_ref().unwrap();
        let progress = field_at(fields, "tasks.clips.progress").and_then(u32::from_firestore_value);
        assert_eq!(progress, Some(75));
        assert!(field_at(fields, "tasks.thumbnails.progress").is_none());
        assert_eq!(doc.id(), Some("p1"));
    }

    #[test]
    fn test_json_conversion() {
        let value = json!({"score": 87, "tags": ["a"], "ratio": 0.5}).to_firestore_value();
        let map = value.as_map().unwrap();
        assert_eq!(map["score"], Value::IntegerValue("87".into()));
        assert_eq!(map["ratio"], Value::DoubleValue(0.5));
        assert_eq!(map["tags"].as_array().unwrap().len(), 1);
    }
}
