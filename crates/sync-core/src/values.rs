//! Values and rows.
//!
//! `Value` is the loosely typed cell representation shared by connections,
//! backends and the differ. `Row` is the flattened, post-transform shape used
//! for comparison: key columns first, value columns after.

use crate::types::{parse_decimal, DataType};
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Error raised when a value cannot be represented in a data type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// The raw value does not parse as the requested type
    #[error("Value '{raw}' is not a valid {data_type}")]
    Invalid { data_type: String, raw: String },

    /// A row does not have one cell per chain entry
    #[error("Row has {actual} cells, expected {expected}")]
    Width { expected: usize, actual: usize },
}

impl ValueError {
    pub(crate) fn invalid(data_type: &DataType, raw: impl Into<String>) -> Self {
        Self::Invalid {
            data_type: data_type.to_string(),
            raw: raw.into(),
        }
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Value {
    /// SQL NULL, or "no value" for a column
    #[default]
    Null,

    /// Integer
    Int(i64),

    /// Exact decimal
    Decimal(Decimal),

    /// Text
    Text(String),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to get this value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a decimal.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int(i) => Some(Decimal::from(*i)),
            Self::Decimal(d) => Some(*d),
            Self::Text(s) => parse_decimal(s),
            Self::Null => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Decimal(d) => serializer.serialize_str(&d.to_string()),
            Self::Text(s) => serializer.serialize_str(s),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a scalar value or null")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Int(i64::from(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {v} out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        parse_decimal(&v.to_string())
            .map(Value::Decimal)
            .ok_or_else(|| E::custom(format!("cannot represent {v} as a decimal")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// A flattened row: key columns first, value columns after.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Row {
    key_len: usize,
    cells: Vec<Value>,
}

impl Row {
    /// Create a row from its key and value parts.
    pub fn new(keys: Vec<Value>, values: Vec<Value>) -> Self {
        let key_len = keys.len();
        let mut cells = keys;
        cells.extend(values);
        Self { key_len, cells }
    }

    /// Create a row from a flat cell list, returning `None` if `key_len` exceeds it.
    pub fn from_cells(key_len: usize, cells: Vec<Value>) -> Option<Self> {
        (key_len <= cells.len()).then_some(Self { key_len, cells })
    }

    /// Number of key columns.
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Total number of columns.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Key columns.
    pub fn keys(&self) -> &[Value] {
        &self.cells[..self.key_len]
    }

    /// Value columns.
    pub fn values(&self) -> &[Value] {
        &self.cells[self.key_len..]
    }

    /// All columns.
    pub fn cells(&self) -> &[Value] {
        &self.cells
    }

    /// Mutable access to all columns.
    pub fn cells_mut(&mut self) -> &mut [Value] {
        &mut self.cells
    }

    /// Check if every value column is null.
    pub fn values_all_null(&self) -> bool {
        self.values().iter().all(Value::is_null)
    }

    /// Split into key and value vectors.
    pub fn into_parts(mut self) -> (Vec<Value>, Vec<Value>) {
        let values = self.cells.split_off(self.key_len);
        (self.cells, values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", join_values(self.keys()))?;
        if !self.values().is_empty() {
            write!(f, " => {}", join_values(self.values()))?;
        }
        Ok(())
    }
}

/// Render values as a comma-separated list.
pub fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
