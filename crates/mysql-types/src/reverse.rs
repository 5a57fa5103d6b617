//! Reverse conversion: MySQL values → Value
//!
//! This module implements conversion from MySQL's native values back to
//! template-sync's `Value` for reading data from MySQL. The column type
//! decides between integer, decimal and text; the data type of the cv-entry
//! normalizes the result afterwards.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mysql_async::consts::ColumnType;
use mysql_async::Value;
use rust_decimal::Decimal;
use thiserror::Error;

/// MySQL value with schema information for type-aware conversion.
#[derive(Debug, Clone)]
pub struct MySQLValueWithSchema {
    /// The raw MySQL value.
    pub value: Value,
    /// The MySQL column type.
    pub column_type: ColumnType,
}

/// Error during MySQL value conversion.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Type mismatch: expected {expected}, got {actual:?}")]
    TypeMismatch { expected: String, actual: Value },
    #[error("Invalid UTF-8 in string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("Invalid date/time value")]
    InvalidDateTime,
}

impl MySQLValueWithSchema {
    /// Create a new MySQLValueWithSchema.
    pub fn new(value: Value, column_type: ColumnType) -> Self {
        Self { value, column_type }
    }

    /// Convert to a template-sync value.
    pub fn to_value(self) -> Result<sync_core::Value, ConversionError> {
        sync_core::Value::try_from(self)
    }
}

impl TryFrom<MySQLValueWithSchema> for sync_core::Value {
    type Error = ConversionError;

    fn try_from(mv: MySQLValueWithSchema) -> Result<Self, Self::Error> {
        use ColumnType::*;

        if matches!(mv.value, Value::NULL) {
            return Ok(sync_core::Value::Null);
        }

        match mv.column_type {
            MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_INT24 | MYSQL_TYPE_LONG
            | MYSQL_TYPE_LONGLONG | MYSQL_TYPE_YEAR => {
                Ok(sync_core::Value::Int(extract_int(&mv.value)?))
            }

            MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL | MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => {
                Ok(sync_core::Value::Decimal(extract_decimal(&mv.value)?))
            }

            MYSQL_TYPE_DATE => {
                let date = extract_date(&mv.value)?;
                Ok(sync_core::Value::Text(date.format("%Y-%m-%d").to_string()))
            }

            MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 | MYSQL_TYPE_TIMESTAMP
            | MYSQL_TYPE_TIMESTAMP2 => {
                let dt = extract_datetime(&mv.value)?;
                Ok(sync_core::Value::Text(
                    dt.format("%Y-%m-%d %H:%M:%S").to_string(),
                ))
            }

            // Strings, blobs, enums and everything else are read as text
            _ => Ok(sync_core::Value::Text(extract_string(&mv.value)?)),
        }
    }
}

/// Convert a row of raw values using the column types of its result set.
pub fn row_to_values(
    values: Vec<Value>,
    column_types: &[ColumnType],
) -> Result<Vec<sync_core::Value>, ConversionError> {
    values
        .into_iter()
        .zip(column_types.iter())
        .map(|(value, column_type)| MySQLValueWithSchema::new(value, *column_type).to_value())
        .collect()
}

/// Extract integer from MySQL Value.
fn extract_int(value: &Value) -> Result<i64, ConversionError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::UInt(u) => i64::try_from(*u).map_err(|_| mismatch("integer", value)),
        Value::Bytes(b) => {
            let s = String::from_utf8(b.clone())?;
            s.trim().parse().map_err(|_| mismatch("integer", value))
        }
        _ => Err(mismatch("integer", value)),
    }
}

/// Extract decimal from MySQL Value.
fn extract_decimal(value: &Value) -> Result<Decimal, ConversionError> {
    match value {
        Value::Int(i) => Ok(Decimal::from(*i)),
        Value::UInt(u) => Ok(Decimal::from(*u)),
        Value::Float(f) => Decimal::try_from(*f).map_err(|_| mismatch("decimal", value)),
        Value::Double(d) => Decimal::try_from(*d).map_err(|_| mismatch("decimal", value)),
        Value::Bytes(b) => {
            let s = String::from_utf8(b.clone())?;
            sync_core::types::parse_decimal(s.trim()).ok_or_else(|| mismatch("decimal", value))
        }
        _ => Err(mismatch("decimal", value)),
    }
}

/// Extract string from MySQL Value.
fn extract_string(value: &Value) -> Result<String, ConversionError> {
    match value {
        Value::Bytes(b) => Ok(String::from_utf8(b.clone())?),
        Value::Int(i) => Ok(i.to_string()),
        Value::UInt(u) => Ok(u.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Double(d) => Ok(d.to_string()),
        _ => Err(mismatch("string", value)),
    }
}

/// Extract date from MySQL Value.
fn extract_date(value: &Value) -> Result<NaiveDate, ConversionError> {
    match value {
        Value::Date(year, month, day, _, _, _, _) => {
            NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32)
                .ok_or(ConversionError::InvalidDateTime)
        }
        Value::Bytes(b) => {
            let s = String::from_utf8(b.clone())?;
            NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| ConversionError::InvalidDateTime)
        }
        _ => Err(mismatch("date", value)),
    }
}

/// Extract datetime from MySQL Value.
fn extract_datetime(value: &Value) -> Result<NaiveDateTime, ConversionError> {
    match value {
        Value::Date(year, month, day, hour, min, sec, micro) => Ok(NaiveDateTime::new(
            NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32)
                .ok_or(ConversionError::InvalidDateTime)?,
            NaiveTime::from_hms_micro_opt(*hour as u32, *min as u32, *sec as u32, *micro)
                .ok_or(ConversionError::InvalidDateTime)?,
        )),
        Value::Bytes(b) => {
            let s = String::from_utf8(b.clone())?;
            NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f"))
                .map_err(|_| ConversionError::InvalidDateTime)
        }
        _ => Err(mismatch("datetime", value)),
    }
}

fn mismatch(expected: &str, actual: &Value) -> ConversionError {
    ConversionError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.clone(),
    }
}
