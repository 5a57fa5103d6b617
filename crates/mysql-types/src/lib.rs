//! MySQL type conversions for template-sync values.
//!
//! This crate provides bidirectional conversions between `sync_core::Value`
//! and MySQL's native values.
//!
//! # Structure
//!
//! - `forward`: Convert `Value` → `MySQLValue` (statement parameters)
//! - `reverse`: Convert MySQL values → `Value` (reading data)
//!
//! # Example
//!
//! ```rust
//! use mysql_types::MySQLValue;
//! use sync_core::Value;
//!
//! let mysql_value = MySQLValue::from(&Value::Int(42));
//! assert_eq!(mysql_value.into_inner(), mysql_async::Value::Int(42));
//! ```

pub mod forward;
pub mod reverse;

pub use forward::{to_params, MySQLValue};
pub use reverse::{row_to_values, ConversionError, MySQLValueWithSchema};
