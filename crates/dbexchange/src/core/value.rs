//! Tagged scalar values for database-agnostic row handling.
//!
//! Rows travel through the engine as ordered maps of column name to [`Value`],
//! so boolean normalization and binary detection are type-driven rather than
//! string-comparison based.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single column value.
///
/// The variants cover everything the JSON data files can carry plus raw byte
/// sequences for binary columns read back from the database.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL NULL / JSON null.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Integer value (covers smallint, int, bigint, serial keys).
    Int(i64),

    /// Floating point value.
    Float(f64),

    /// Text value. Dates, UUIDs and decimals are carried as their textual
    /// form; the target database casts them back on write.
    Text(String),

    /// Raw bytes for binary (bytea) columns.
    Bytes(Vec<u8>),
}

impl Value {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is NULL or an empty string.
    ///
    /// This is the "nothing there" test used when deciding whether a row
    /// carries a technical key or a business key at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Interpret this value as a positive technical key.
    ///
    /// Returns `None` for non-numeric values and for keys `<= 0` (generated
    /// keys are always positive; zero means "no key").
    #[must_use]
    pub fn as_key(&self) -> Option<i64> {
        match self {
            Value::Int(v) if *v > 0 => Some(*v),
            Value::Text(s) => s.trim().parse::<i64>().ok().filter(|v| *v > 0),
            _ => None,
        }
    }

    /// Check if this value reads as false in a boolean column.
    ///
    /// Covers the representations a JSON data file or a driver may deliver
    /// for a false boolean: NULL, `false`, `0`, `""`, `"0"`, `"f"`, `"false"`.
    #[must_use]
    pub fn is_false_like(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !*b,
            Value::Int(v) => *v == 0,
            Value::Float(v) => *v == 0.0,
            Value::Text(s) => {
                s.is_empty() || s.eq_ignore_ascii_case("f") || s.eq_ignore_ascii_case("false") || s == "0"
            }
            Value::Bytes(_) => false,
        }
    }

    /// Plain textual form, used for binary file names and diagnostics.
    #[must_use]
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a scalar column value")
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer out of range: {}", v)))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Value, E> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn visit_none<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        // Byte sequences serialize as arrays in JSON.
        let mut bytes = Vec::new();
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        Ok(Value::Bytes(bytes))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
