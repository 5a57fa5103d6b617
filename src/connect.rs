//! Connection factory: picks the adapter from the URL scheme.

use mysql_connection::MySqlConnection;
use sqlite_connection::SqliteConnection;
use sync_sql::{Connection, ConnectionError};
use tracing::debug;

/// Open a connection to `url`.
///
/// Supports `mysql://` and `sqlite:` URLs.
pub async fn connect(url: &str) -> Result<Box<dyn Connection>, ConnectionError> {
    let conn: Box<dyn Connection> = if url.starts_with("mysql://") {
        Box::new(MySqlConnection::connect(url).await?)
    } else if url.starts_with("sqlite:") {
        Box::new(SqliteConnection::connect(url).await?)
    } else {
        return Err(ConnectionError::UnsupportedUrl(url.to_string()));
    };
    debug!("Opened {} connection", conn.dialect());
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_sql::Statement;

    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let mut conn = connect("sqlite::memory:").await.unwrap();
        conn.execute(&Statement::raw("CREATE TABLE t (id INTEGER)"))
            .await
            .unwrap();
        assert_eq!(conn.list_tables().await.unwrap(), vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = connect("postgres://localhost/db").await.err().unwrap();
        assert!(matches!(err, ConnectionError::UnsupportedUrl(_)));
    }
}
