//! Per-side template arguments.
//!
//! A template maps a source side onto a destination side. Each side is a key
//! chain, a value chain and backend-specific options. The options are
//! validated once at startup into typed [`BackendArgs`].

use crate::chain::CvChain;
use crate::chain_type::ChainType;
use crate::values::{Row, Value, ValueError};
use serde::{Deserialize, Serialize};

/// Backend-specific options as written in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SideOptions {
    /// Table written to (generic backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// FROM clause used for reads, may be a pre-joined clause (generic backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Extra SQL condition ANDed into reads (generic backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Column flagging soft-deleted rows (generic backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_column: Option<String>,
}

impl SideOptions {
    /// Check if no option is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Validated generic-backend arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericArgs {
    /// Write target; `None` makes the side read-only
    pub table: Option<String>,
    /// FROM clause for reads
    pub from: String,
    pub filter: Option<String>,
    pub deleted_column: Option<String>,
}

/// Validated structured-backend arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuredArgs {
    pub chain_type: ChainType,
}

/// Typed backend arguments of one template side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendArgs {
    Generic(GenericArgs),
    Structured(StructuredArgs),
}

/// One validated side of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSide {
    pub key: CvChain,
    pub value: CvChain,
    pub args: BackendArgs,
}

impl TemplateSide {
    /// Total number of columns of a row read from this side.
    pub fn width(&self) -> usize {
        self.key.len() + self.value.len()
    }

    /// Normalize raw cells (key columns first) by the data types of this side.
    pub fn normalize_row(&self, cells: Vec<Value>) -> Result<Row, ValueError> {
        if cells.len() != self.width() {
            return Err(ValueError::Width {
                expected: self.width(),
                actual: cells.len(),
            });
        }
        let mut cells = self
            .key
            .iter()
            .chain(self.value.iter())
            .zip(cells)
            .map(|(entry, cell)| entry.data_type.normalize(cell))
            .collect::<Result<Vec<_>, _>>()?;
        let values = cells.split_off(self.key.len());
        Ok(Row::new(cells, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{CvEntry, Link};
    use crate::types::DataType;
    use rust_decimal::Decimal;

    fn column(name: &str, data_type: DataType) -> CvEntry {
        CvEntry::new(Link::Column { name: name.into() }, data_type)
    }

    #[test]
    fn test_normalize_row() {
        let side = TemplateSide {
            key: CvChain::new(vec![column("tag", DataType::String)]),
            value: CvChain::new(vec![
                column("ram", DataType::Decimal),
                column("addr", DataType::Ip),
            ]),
            args: BackendArgs::Generic(GenericArgs {
                table: Some("servers".into()),
                from: "servers".into(),
                filter: None,
                deleted_column: None,
            }),
        };
        let row = side
            .normalize_row(vec![Value::from("srv1"), Value::Int(16), Value::Int(167772161)])
            .unwrap();
        assert_eq!(row.keys(), &[Value::from("srv1")]);
        assert_eq!(
            row.values(),
            &[Value::Decimal(Decimal::from(16)), Value::from("10.0.0.1")]
        );
        assert!(side
            .normalize_row(vec![Value::from("srv1"), Value::from("lots"), Value::Null])
            .is_err());
        assert_eq!(
            side.normalize_row(vec![Value::from("srv1")]),
            Err(ValueError::Width {
                expected: 3,
                actual: 1
            })
        );
    }
}
