//! Row transforms applied to source rows before the diff.
//!
//! # YAML Format
//!
//! ```yaml
//! transform:
//!   forward:
//!     - { kind: scale, column: 1, divide: 1024, decimals: 1 }
//!     - { kind: lowercase, column: 0 }
//!   reverse:
//!     - { kind: scale, column: 1, multiply: 1024, decimals: 0 }
//! ```
//!
//! `column` is the position of the cell in the row, key columns first.

use crate::registry::Registry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use sync_core::{Row, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("{transform}: column {column} is out of range for a row of {width} columns")]
    Column {
        transform: String,
        column: usize,
        width: usize,
    },

    #[error("{transform}: '{value}' is not a number")]
    NotANumber { transform: String, value: String },

    #[error("{transform}: division by zero")]
    DivisionByZero { transform: String },

    #[error("{transform}: {message}")]
    Custom { transform: String, message: String },
}

/// A transformation of one row.
///
/// Returning `Ok(None)` drops the row. Transforms must keep the row shape
/// (key column count and total width).
pub trait RowTransform: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, row: Row) -> Result<Option<Row>, TransformError>;
}

/// A transform as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransformSpec {
    /// Multiply and/or divide a numeric column, optionally rounding
    Scale {
        column: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        multiply: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        divide: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decimals: Option<u32>,
    },
    Lowercase {
        column: usize,
    },
    Uppercase {
        column: usize,
    },
    Trim {
        column: usize,
    },
    /// Replace values found in a lookup table, others pass through or take
    /// `default`
    Map {
        column: usize,
        values: BTreeMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    /// A transform registered by the host program
    Named {
        name: String,
    },
}

impl TransformSpec {
    /// Column touched by a built-in transform.
    pub fn column(&self) -> Option<usize> {
        match self {
            Self::Scale { column, .. }
            | Self::Lowercase { column }
            | Self::Uppercase { column }
            | Self::Trim { column }
            | Self::Map { column, .. } => Some(*column),
            Self::Named { .. } => None,
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Self::Named { .. })
    }
}

impl fmt::Display for TransformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scale { column, .. } => write!(f, "scale({column})"),
            Self::Lowercase { column } => write!(f, "lowercase({column})"),
            Self::Uppercase { column } => write!(f, "uppercase({column})"),
            Self::Trim { column } => write!(f, "trim({column})"),
            Self::Map { column, .. } => write!(f, "map({column})"),
            Self::Named { name } => f.write_str(name),
        }
    }
}

/// A built-in transform bound to its configuration.
struct Builtin {
    name: String,
    spec: TransformSpec,
}

impl Builtin {
    fn cell<'r>(&self, row: &'r mut Row, column: usize) -> Result<&'r mut Value, TransformError> {
        let width = row.len();
        row.cells_mut().get_mut(column).ok_or(TransformError::Column {
            transform: self.name.clone(),
            column,
            width,
        })
    }

    fn scale(
        &self,
        value: &Value,
        multiply: Option<Decimal>,
        divide: Option<Decimal>,
        decimals: Option<u32>,
    ) -> Result<Value, TransformError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let mut n = value.as_decimal().ok_or_else(|| TransformError::NotANumber {
            transform: self.name.clone(),
            value: value.to_string(),
        })?;
        if let Some(m) = multiply {
            n *= m;
        }
        if let Some(d) = divide {
            n = n.checked_div(d).ok_or_else(|| TransformError::DivisionByZero {
                transform: self.name.clone(),
            })?;
        }
        if let Some(dp) = decimals {
            n = n.round_dp(dp);
            n.rescale(dp);
        }
        Ok(Value::Decimal(n))
    }
}

fn map_text(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::Text(s) => Value::Text(f(s)),
        other => other.clone(),
    }
}

impl RowTransform for Builtin {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, mut row: Row) -> Result<Option<Row>, TransformError> {
        let Some(column) = self.spec.column() else {
            return Ok(Some(row));
        };
        let cell = self.cell(&mut row, column)?;
        *cell = match &self.spec {
            TransformSpec::Scale {
                multiply,
                divide,
                decimals,
                ..
            } => self.scale(cell, *multiply, *divide, *decimals)?,
            TransformSpec::Lowercase { .. } => map_text(cell, str::to_lowercase),
            TransformSpec::Uppercase { .. } => map_text(cell, str::to_uppercase),
            TransformSpec::Trim { .. } => map_text(cell, |s| s.trim().to_string()),
            TransformSpec::Map { values, default, .. } => match values.get(&cell.to_string()) {
                Some(mapped) => mapped.clone(),
                None => default.clone().unwrap_or_else(|| cell.clone()),
            },
            TransformSpec::Named { .. } => cell.clone(),
        };
        Ok(Some(row))
    }
}

/// An ordered list of transforms.
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn RowTransform>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| s.name()))
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline, resolving named transforms through `registry`.
    ///
    /// Returns the name of the first named transform that is not registered
    /// as the error.
    pub fn build(specs: &[TransformSpec], registry: &Registry) -> Result<Self, String> {
        let steps = specs
            .iter()
            .map(|spec| match spec {
                TransformSpec::Named { name } => registry.transform(name).ok_or_else(|| name.clone()),
                builtin => Ok(Arc::new(Builtin {
                    name: builtin.to_string(),
                    spec: builtin.clone(),
                }) as Arc<dyn RowTransform>),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run `row` through every step; `None` if a step dropped it.
    pub fn apply(&self, row: Row) -> Result<Option<Row>, TransformError> {
        let mut row = row;
        for step in &self.steps {
            match step.apply(row)? {
                Some(next) => row = next,
                None => return Ok(None),
            }
        }
        Ok(Some(row))
    }
}
