//! Forward conversion: Value → MySQLValue
//!
//! This module implements `From<&Value>` for `MySQLValue`, converting
//! template-sync values into MySQL statement parameters.

use mysql_async::Value;

/// MySQL value wrapper for type-safe conversions.
#[derive(Debug, Clone, PartialEq)]
pub struct MySQLValue(pub Value);

impl MySQLValue {
    /// Get the inner mysql_async::Value.
    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Get a reference to the inner value.
    pub fn as_inner(&self) -> &Value {
        &self.0
    }
}

impl From<&sync_core::Value> for MySQLValue {
    fn from(value: &sync_core::Value) -> Self {
        match value {
            sync_core::Value::Null => MySQLValue(Value::NULL),
            sync_core::Value::Int(i) => MySQLValue(Value::Int(*i)),
            // Decimal - sent as string to keep precision
            sync_core::Value::Decimal(d) => MySQLValue(Value::Bytes(d.to_string().into_bytes())),
            sync_core::Value::Text(s) => MySQLValue(Value::Bytes(s.clone().into_bytes())),
        }
    }
}

/// Convert statement parameters to positional MySQL parameters.
pub fn to_params(values: &[sync_core::Value]) -> Vec<Value> {
    values
        .iter()
        .map(|v| MySQLValue::from(v).into_inner())
        .collect()
}
