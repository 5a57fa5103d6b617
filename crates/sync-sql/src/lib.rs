//! SQL plumbing shared by the template-sync backends.
//!
//! - [`Connection`] - the dialect adapter contract
//! - [`Select`], [`Insert`], [`Update`], [`Delete`] - parameterized statement builders
//! - [`Transaction`] - autocommit-off transaction guard
//! - [`QueryBackend`] - read/update/insert/delete of template sides

pub mod backend;
pub mod connection;
pub mod statement;
pub mod transaction;

pub use backend::{
    BackendError, BackendKind, DeletePolicy, DeleteScope, QueryBackend, WriteOutcome,
    WriteRequest,
};
pub use connection::{fetch_scalar, Connection, ConnectionError};
pub use statement::{Condition, Delete, Insert, Select, Statement, Update};
pub use transaction::Transaction;
