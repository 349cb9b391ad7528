//! Record snapshots

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Integer identifier of a record within its table
pub type RecordId = u64;

/// Default primary key field name
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// A record snapshot: an ordered set of named field values.
///
/// Serializes as a plain JSON object, which is also the persisted form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from a JSON value, if it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Read the identifier stored under `primary_key`.
    ///
    /// Accepts non-negative integers and numeric strings; anything else
    /// (including a missing field or `null`) means the record has no id yet.
    pub fn id(&self, primary_key: &str) -> Option<RecordId> {
        self.0.get(primary_key).and_then(parse_id)
    }

    pub fn set_id(&mut self, primary_key: &str, id: RecordId) {
        self.0.insert(primary_key.to_string(), Value::from(id));
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

/// Parse an identifier the way persisted lists store them: as a number or
/// as a numeric string.
pub fn parse_id(value: &Value) -> Option<RecordId> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_parsing() {
        let record = Record::new().with("id", 7);
        assert_eq!(record.id("id"), Some(7));

        let record = Record::new().with("id", "12");
        assert_eq!(record.id("id"), Some(12));

        let record = Record::new().with("id", Value::Null);
        assert_eq!(record.id("id"), None);

        let record = Record::new().with("id", -3);
        assert_eq!(record.id("id"), None);

        assert_eq!(Record::new().id("id"), None);
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let mut record = Record::new().with("name", "a");
        record.set_id("id", 1);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"name": "a", "id": 1}));

        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Record::from_value(json!([1, 2])).is_none());
        assert!(Record::from_value(json!({"a": 1})).is_some());
    }
}
