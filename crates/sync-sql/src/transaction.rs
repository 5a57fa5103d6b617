//! Explicit transaction guard.
//!
//! A [`Transaction`] switches autocommit off on begin and restores the
//! previous mode on commit or rollback. Backends roll back explicitly on
//! their error paths; there is no rollback on drop since that would need an
//! async destructor.

use crate::connection::{Connection, ConnectionError};
use crate::statement::Statement;
use sync_core::Value;
use tracing::{debug, warn};

pub struct Transaction<'c> {
    conn: &'c mut dyn Connection,
    previous: bool,
}

impl<'c> Transaction<'c> {
    /// Turn autocommit off and start a transaction.
    pub async fn begin(conn: &'c mut dyn Connection) -> Result<Self, ConnectionError> {
        let previous = conn.autocommit(Some(false)).await?;
        debug!("Transaction started on {}", conn.dialect());
        Ok(Self { conn, previous })
    }

    pub async fn execute(&mut self, statement: &Statement) -> Result<u64, ConnectionError> {
        self.conn.execute(statement).await
    }

    pub async fn fetch_all(
        &mut self,
        statement: &Statement,
    ) -> Result<Vec<Vec<Value>>, ConnectionError> {
        self.conn.fetch_all(statement).await
    }

    /// The underlying connection, for helpers taking `&mut dyn Connection`.
    pub fn conn(&mut self) -> &mut dyn Connection {
        &mut *self.conn
    }

    pub async fn commit(self) -> Result<(), ConnectionError> {
        let result = self.conn.commit().await;
        self.restore(result).await
    }

    pub async fn rollback(self) -> Result<(), ConnectionError> {
        let result = self.conn.rollback().await;
        self.restore(result).await
    }

    /// Commit on `Ok`, roll back on `Err`, and pass `result` through.
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E>
    where
        T: Send,
        E: From<ConnectionError> + Send,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback().await {
                    warn!("Rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    async fn restore(self, result: Result<(), ConnectionError>) -> Result<(), ConnectionError> {
        if let Err(e) = self.conn.autocommit(Some(self.previous)).await {
            warn!("Failed to restore autocommit mode: {e}");
            return result.and(Err(e));
        }
        result
    }
}
