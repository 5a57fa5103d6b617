//! Connection trait definition.
//!
//! This trait is the narrow contract the engine needs from a SQL dialect
//! adapter. `mysql-connection` and `sqlite-connection` implement it, so the
//! backends and the engine are compiled against a single interface.

use crate::statement::Statement;
use async_trait::async_trait;
use sync_core::Value;

/// Error raised by a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Could not open the connection
    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    /// A statement failed to execute
    #[error("Query failed: {message} (sql: {sql})")]
    Query { sql: String, message: String },

    /// A transaction primitive failed
    #[error("Transaction control failed: {0}")]
    Transaction(String),

    /// The URL scheme has no adapter
    #[error("Unsupported connection URL: {0}")]
    UnsupportedUrl(String),
}

impl ConnectionError {
    /// Build a query error from a statement and a driver error.
    pub fn query(statement: &Statement, err: impl std::fmt::Display) -> Self {
        Self::Query {
            sql: statement.sql().to_string(),
            message: err.to_string(),
        }
    }
}

/// Trait for a SQL connection used by exactly one role (source or destination).
///
/// # Transactions
///
/// `autocommit(Some(false))` opens an explicit transaction that lasts until
/// `commit` or `rollback`; `autocommit(Some(true))` restores autocommit mode.
/// Both return the previous mode, `autocommit(None)` only queries it.
///
/// # Replication
///
/// `set_replication` toggles whether this session's writes are replicated
/// (binary logging on MySQL). Adapters without replication return `Ok(None)`.
#[async_trait]
pub trait Connection: Send {
    /// Adapter name for diagnostics (e.g. "mysql", "sqlite").
    fn dialect(&self) -> &'static str;

    /// Execute a statement that returns no rows; returns the affected row count.
    async fn execute(&mut self, statement: &Statement) -> Result<u64, ConnectionError>;

    /// Execute a query and fetch every row.
    async fn fetch_all(&mut self, statement: &Statement)
        -> Result<Vec<Vec<Value>>, ConnectionError>;

    /// Identifier generated by the last INSERT on this connection.
    fn last_insert_id(&self) -> Option<u64>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<(), ConnectionError>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<(), ConnectionError>;

    /// Set (or query, with `None`) autocommit mode; returns the previous mode.
    async fn autocommit(&mut self, enabled: Option<bool>) -> Result<bool, ConnectionError>;

    /// Names of the tables of the current database.
    async fn list_tables(&mut self) -> Result<Vec<String>, ConnectionError>;

    /// Set (or query, with `None`) session replication; returns the previous state.
    async fn set_replication(
        &mut self,
        enabled: Option<bool>,
    ) -> Result<Option<bool>, ConnectionError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Fetch the first column of the first row, if any.
pub async fn fetch_scalar(
    conn: &mut dyn Connection,
    statement: &Statement,
) -> Result<Option<Value>, ConnectionError> {
    let rows = conn.fetch_all(statement).await?;
    Ok(rows
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .filter(|v| !v.is_null()))
}
