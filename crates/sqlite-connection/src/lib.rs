//! SQLite implementation of the template-sync `Connection` trait.
//!
//! Wraps a single `sqlx::SqliteConnection`. SQLite has no session autocommit
//! switch, so autocommit-off is emulated with an open `BEGIN` that `commit`
//! and `rollback` close and reopen. Replication does not exist here.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Row, Sqlite, TypeInfo, ValueRef};
use std::str::FromStr;
use sync_core::types::parse_decimal;
use sync_core::Value;
use sync_sql::{Connection, ConnectionError, Statement};
use tracing::{debug, info};

type Query<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct SqliteConnection {
    conn: Option<sqlx::SqliteConnection>,
    autocommit: bool,
    last_insert_id: Option<u64>,
}

impl SqliteConnection {
    /// Connect to a `sqlite:` URL (`sqlite::memory:` or `sqlite:path/to.db`).
    pub async fn connect(url: &str) -> Result<Self, ConnectionError> {
        let connect_error = |e: sqlx::Error| ConnectionError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        };
        let conn = SqliteConnectOptions::from_str(url)
            .map_err(connect_error)?
            .create_if_missing(true)
            .connect()
            .await
            .map_err(connect_error)?;
        info!("Connected to SQLite at {url}");
        Ok(Self {
            conn: Some(conn),
            autocommit: true,
            last_insert_id: None,
        })
    }

    /// In-memory database, mainly for tests.
    pub async fn memory() -> Result<Self, ConnectionError> {
        Self::connect("sqlite::memory:").await
    }

    /// Run a `;`-separated script of parameterless statements.
    pub async fn execute_batch(&mut self, script: &str) -> Result<(), ConnectionError> {
        for sql in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.execute(&Statement::raw(sql)).await?;
        }
        Ok(())
    }

    fn conn(&mut self) -> Result<&mut sqlx::SqliteConnection, ConnectionError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ConnectionError::Transaction("connection is closed".to_string()))
    }

    async fn control(&mut self, sql: &str) -> Result<(), ConnectionError> {
        debug!("{sql}");
        sqlx::query(sql)
            .execute(self.conn()?)
            .await
            .map(|_| ())
            .map_err(|e| ConnectionError::Transaction(format!("{sql}: {e}")))
    }
}

fn bind<'q>(statement: &'q Statement) -> Query<'q> {
    statement
        .params()
        .iter()
        .fold(sqlx::query(statement.sql()), |query, param| match param {
            Value::Null => query.bind(None::<String>),
            Value::Int(i) => query.bind(*i),
            // Decimal - bound as text, column affinity converts it
            Value::Decimal(d) => query.bind(d.to_string()),
            Value::Text(s) => query.bind(s.as_str()),
        })
}

fn decode_row(row: &SqliteRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.len())
        .map(|i| {
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                return Ok(Value::Null);
            }
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Ok(Value::Int(row.try_get_unchecked::<i64, _>(i)?)),
                "REAL" => {
                    // Shortest round-trip text, so 2.5 stays 2.5
                    let f = row.try_get_unchecked::<f64, _>(i)?;
                    parse_decimal(&f.to_string())
                        .map(Value::Decimal)
                        .ok_or_else(|| sqlx::Error::Decode(format!("invalid REAL {f}").into()))
                }
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(i)?;
                    Ok(Value::Text(String::from_utf8_lossy(&bytes).into_owned()))
                }
                _ => Ok(Value::Text(row.try_get_unchecked::<String, _>(i)?)),
            }
        })
        .collect()
}

#[async_trait]
impl Connection for SqliteConnection {
    fn dialect(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64, ConnectionError> {
        debug!("{statement}");
        let result = bind(statement)
            .execute(self.conn()?)
            .await
            .map_err(|e| ConnectionError::query(statement, e))?;
        self.last_insert_id = u64::try_from(result.last_insert_rowid()).ok();
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &mut self,
        statement: &Statement,
    ) -> Result<Vec<Vec<Value>>, ConnectionError> {
        debug!("{statement}");
        let rows = bind(statement)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| ConnectionError::query(statement, e))?;
        rows.iter()
            .map(|row| decode_row(row).map_err(|e| ConnectionError::query(statement, e)))
            .collect()
    }

    fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    async fn commit(&mut self) -> Result<(), ConnectionError> {
        if !self.autocommit {
            self.control("COMMIT").await?;
            self.control("BEGIN").await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ConnectionError> {
        if !self.autocommit {
            self.control("ROLLBACK").await?;
            self.control("BEGIN").await?;
        }
        Ok(())
    }

    async fn autocommit(&mut self, enabled: Option<bool>) -> Result<bool, ConnectionError> {
        let previous = self.autocommit;
        match enabled {
            Some(false) if previous => self.control("BEGIN").await?,
            Some(true) if !previous => self.control("COMMIT").await?,
            _ => {}
        }
        if let Some(enabled) = enabled {
            self.autocommit = enabled;
        }
        Ok(previous)
    }

    async fn list_tables(&mut self) -> Result<Vec<String>, ConnectionError> {
        let statement = Statement::raw(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        );
        let rows = self.fetch_all(&statement).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|v| v.as_str().map(String::from))
            .collect())
    }

    async fn set_replication(
        &mut self,
        _enabled: Option<bool>,
    ) -> Result<Option<bool>, ConnectionError> {
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if let Some(conn) = self.conn.take() {
            sqlx::Connection::close(conn)
                .await
                .map_err(|e| ConnectionError::Transaction(format!("close: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use sync_sql::{Condition, Insert, Select, Transaction};

    async fn servers() -> SqliteConnection {
        let mut conn = SqliteConnection::memory().await.unwrap();
        conn.execute_batch(
            "CREATE TABLE servers (tag TEXT PRIMARY KEY, ram INTEGER, cpu NUMERIC, os TEXT);",
        )
        .await
        .unwrap();
        conn
    }

    #[tokio::test]
    async fn test_round_trip_values() {
        let mut conn = servers().await;
        let insert = Insert::into("servers")
            .value("tag", "srv1")
            .value("ram", 16384)
            .value("cpu", Decimal::new(25, 1))
            .value("os", Value::Null)
            .build();
        assert_eq!(conn.execute(&insert).await.unwrap(), 1);
        assert_eq!(conn.last_insert_id(), Some(1));

        let rows = conn
            .fetch_all(
                &Select::from("servers")
                    .columns(["tag", "ram", "cpu", "os"])
                    .filter(Condition::eq("tag", "srv1"))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Value::from("srv1"),
                Value::Int(16384),
                Value::Decimal(Decimal::new(25, 1)),
                Value::Null,
            ]]
        );
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let mut conn = servers().await;
        let mut tx = Transaction::begin(&mut conn).await.unwrap();
        tx.execute(&Insert::into("servers").value("tag", "srv2").build())
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(conn.autocommit(None).await.unwrap());
        let rows = conn
            .fetch_all(&Select::from("servers").column("tag").build())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_transaction_commit() {
        let mut conn = servers().await;
        let mut tx = Transaction::begin(&mut conn).await.unwrap();
        tx.execute(&Insert::into("servers").value("tag", "srv3").build())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rows = conn
            .fetch_all(&Select::from("servers").column("tag").build())
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![Value::from("srv3")]]);
    }

    #[tokio::test]
    async fn test_list_tables_and_replication() {
        let mut conn = servers().await;
        assert_eq!(conn.list_tables().await.unwrap(), vec!["servers".to_string()]);
        assert_eq!(conn.set_replication(Some(false)).await.unwrap(), None);
        conn.close().await.unwrap();
    }
}
