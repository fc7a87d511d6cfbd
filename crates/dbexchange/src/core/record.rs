//! Row representation for the recursive export/import walks.

use indexmap::IndexMap;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::value::Value;

/// Reserved key holding nested child rows.
pub const CHILDREN_KEY: &str = "children";

/// Reserved key holding nested parameter lookups (and the junction partner).
pub const PARAMETERS_KEY: &str = "parameters";

/// One exported/imported row.
///
/// An ordered mapping of column name to [`Value`], plus two reserved nested
/// slots: `children` (alias → rows) and `parameters` (alias → single row).
/// In the JSON data files the columns appear inline and the reserved slots
/// only appear when non-empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Flat column values, in column order.
    pub fields: IndexMap<String, Value>,

    /// Child rows per child alias.
    pub children: IndexMap<String, Vec<Record>>,

    /// One nested row per parameter (or junction partner) alias.
    pub parameters: IndexMap<String, Record>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record from flat column values.
    #[must_use]
    pub fn from_fields(fields: IndexMap<String, Value>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    /// Get a column value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a column value, preserving insertion order for new columns.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Remove a column value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }

    /// Positive technical key carried in the named column, if any.
    #[must_use]
    pub fn key(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_key)
    }

    /// Check whether the named column holds a non-empty value.
    #[must_use]
    pub fn has_value(&self, field: &str) -> bool {
        self.get(field).map(|v| !v.is_empty()).unwrap_or(false)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let extra = usize::from(!self.children.is_empty()) + usize::from(!self.parameters.is_empty());
        let mut map = serializer.serialize_map(Some(self.fields.len() + extra))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        if !self.children.is_empty() {
            map.serialize_entry(CHILDREN_KEY, &self.children)?;
        }
        if !self.parameters.is_empty() {
            map.serialize_entry(PARAMETERS_KEY, &self.parameters)?;
        }
        map.end()
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = Record;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a row object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Record, A::Error> {
        let mut record = Record::new();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                CHILDREN_KEY => {
                    record.children = map.next_value()?;
                }
                PARAMETERS_KEY => {
                    record.parameters = map.next_value()?;
                }
                _ => {
                    let value: Value = map.next_value()?;
                    if record.fields.insert(key.clone(), value).is_some() {
                        return Err(de::Error::custom(format!("duplicate column {}", key)));
                    }
                }
            }
        }
        Ok(record)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Record, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut row = Record::new();
        row.set("id", Value::Int(1));
        row.set("name", Value::Text("alpha".into()));
        let mut child = Record::new();
        child.set("id", Value::Int(10));
        child.set("parent_id", Value::Int(1));
        row.children.insert("items".into(), vec![child]);
        let mut param = Record::new();
        param.set("code", Value::Text("KG".into()));
        row.parameters.insert("unit".into(), param);
        row
    }

    #[test]
    fn test_serialize_inlines_columns_and_reserved_slots() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.starts_with("{\"id\":1,\"name\":\"alpha\""));
        assert!(json.contains("\"children\":{\"items\":["));
        assert!(json.contains("\"parameters\":{\"unit\":{"));
    }

    #[test]
    fn test_empty_slots_are_omitted() {
        let mut row = Record::new();
        row.set("id", Value::Int(5));
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, "{\"id\":5}");
    }

    #[test]
    fn test_round_trip_preserves_order_and_nesting() {
        let row = sample();
        let json = serde_json::to_string(&row).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
        let names: Vec<&str> = back.fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["id", "name"]);
    }

    #[test]
    fn test_key_and_has_value() {
        let row = sample();
        assert_eq!(row.key("id"), Some(1));
        assert_eq!(row.key("name"), None);
        assert!(row.has_value("name"));
        assert!(!row.has_value("missing"));
    }
}
