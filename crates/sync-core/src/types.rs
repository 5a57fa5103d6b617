//! Column data types.
//!
//! `DataType` is the fixed vocabulary a cv-entry uses to describe the column
//! it refers to. Every value that crosses a backend boundary is normalized by
//! the data type of its entry, so that both sides of a template compare equal
//! values with equal representations.
//!
//! # YAML Format
//!
//! ```yaml
//! - string
//! - integer
//! - decimal
//! - term:tags
//! - id
//! - ip
//! ```

use crate::values::{Value, ValueError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Data type of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    /// Free text
    String,

    /// 64-bit signed integer
    Integer,

    /// Exact decimal
    Decimal,

    /// Taxonomy term reference, presented by its label
    Term {
        /// Vocabulary machine name
        vocabulary: String,
    },

    /// Numeric entity identifier
    Id,

    /// IPv4 address, presented as a dotted string
    Ip,
}

impl DataType {
    /// Vocabulary of a term reference, if this is one.
    pub fn vocabulary(&self) -> Option<&str> {
        match self {
            Self::Term { vocabulary } => Some(vocabulary),
            _ => None,
        }
    }

    /// Convert a loosely typed value into the canonical representation of this type.
    ///
    /// `Null` is valid for every type.
    pub fn normalize(&self, value: Value) -> Result<Value, ValueError> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            Self::String | Self::Term { .. } => Ok(Value::Text(value.to_string())),
            Self::Integer | Self::Id => match value {
                Value::Int(i) => Ok(Value::Int(i)),
                Value::Decimal(d) if d.fract().is_zero() => d
                    .to_i64()
                    .map(Value::Int)
                    .ok_or_else(|| ValueError::invalid(self, d.to_string())),
                Value::Text(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| ValueError::invalid(self, s)),
                other => Err(ValueError::invalid(self, other.to_string())),
            },
            Self::Decimal => match value {
                Value::Int(i) => Ok(Value::Decimal(Decimal::from(i))),
                Value::Decimal(d) => Ok(Value::Decimal(d)),
                Value::Text(s) => parse_decimal(s.trim())
                    .map(Value::Decimal)
                    .ok_or_else(|| ValueError::invalid(self, s)),
                Value::Null => Ok(Value::Null),
            },
            Self::Ip => match value {
                Value::Int(i) => u32::try_from(i)
                    .map(|n| Value::Text(Ipv4Addr::from(n).to_string()))
                    .map_err(|_| ValueError::invalid(self, i.to_string())),
                Value::Text(s) => s
                    .trim()
                    .parse::<Ipv4Addr>()
                    .map(|ip| Value::Text(ip.to_string()))
                    .map_err(|_| ValueError::invalid(self, s)),
                other => Err(ValueError::invalid(self, other.to_string())),
            },
        }
    }
}

/// Parse a decimal from plain or scientific notation.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("integer"),
            Self::Decimal => f.write_str("decimal"),
            Self::Term { vocabulary } => write!(f, "term:{vocabulary}"),
            Self::Id => f.write_str("id"),
            Self::Ip => f.write_str("ip"),
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "decimal" => Ok(Self::Decimal),
            "id" => Ok(Self::Id),
            "ip" => Ok(Self::Ip),
            other => match other.strip_prefix("term:") {
                Some(vocabulary) if !vocabulary.is_empty() => Ok(Self::Term {
                    vocabulary: vocabulary.to_string(),
                }),
                _ => Err(format!("Unknown data type: {other}")),
            },
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DataType> for String {
    fn from(dt: DataType) -> Self {
        dt.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for s in ["string", "integer", "decimal", "term:tags", "id", "ip"] {
            let dt: DataType = s.parse().unwrap();
            assert_eq!(dt.to_string(), s);
        }
        assert_eq!(
            "term:os".parse::<DataType>().unwrap().vocabulary(),
            Some("os")
        );
        assert!("term:".parse::<DataType>().is_err());
        assert!("float".parse::<DataType>().is_err());
    }

    #[test]
    fn test_normalize_numeric() {
        assert_eq!(
            DataType::Integer.normalize(Value::Text(" 42 ".into())).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            DataType::Decimal.normalize(Value::Int(16)).unwrap(),
            Value::Decimal(Decimal::new(16, 0))
        );
        assert_eq!(
            DataType::Decimal
                .normalize(Value::Text("16.50".into()))
                .unwrap(),
            Value::Decimal(Decimal::new(165, 1))
        );
        assert!(DataType::Id.normalize(Value::Text("abc".into())).is_err());
    }

    #[test]
    fn test_normalize_ip() {
        assert_eq!(
            DataType::Ip.normalize(Value::Int(167772161)).unwrap(),
            Value::Text("10.0.0.1".into())
        );
        assert_eq!(
            DataType::Ip.normalize(Value::Text("192.168.1.10".into())).unwrap(),
            Value::Text("192.168.1.10".into())
        );
        assert!(DataType::Ip.normalize(Value::Text("300.1.1.1".into())).is_err());
    }

    #[test]
    fn test_normalize_null_passthrough() {
        assert_eq!(DataType::Ip.normalize(Value::Null).unwrap(), Value::Null);
        assert_eq!(DataType::String.normalize(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dt: DataType = serde_yaml::from_str("term:tags").unwrap();
        assert_eq!(
            dt,
            DataType::Term {
                vocabulary: "tags".into()
            }
        );
        assert_eq!(serde_yaml::to_string(&dt).unwrap().trim(), "term:tags");
    }
}
