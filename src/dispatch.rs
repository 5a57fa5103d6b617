//! Writes one diff record to the destination.
//!
//! The write chain takes its shape from the destination side and its values
//! from the authoritative row: the source row for inserts and updates, the
//! destination row for deletes. Every value column is written by its own
//! backend call so that a failing column does not take the others with it.

use crate::callback::{fire, CallbackEvent, ChangeCallback};
use crate::config::{Database, Template};
use crate::error::SyncError;
use crate::report::ChangeOutcome;
use std::fmt;
use std::sync::Arc;
use sync_core::{CvChain, Row, Value};
use sync_sql::{Connection, DeleteScope, QueryBackend, WriteOutcome, WriteRequest};
use tracing::{debug, warn};

/// Kind of write a record needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Insert,
    Update,
    Delete,
}

impl SyncMode {
    /// Insert without a destination row, delete without a source row,
    /// update with both.
    pub fn select(source: Option<&Row>, destination: Option<&Row>) -> Result<Self, SyncError> {
        match (source, destination) {
            (Some(_), None) => Ok(Self::Insert),
            (None, Some(_)) => Ok(Self::Delete),
            (Some(_), Some(_)) => Ok(Self::Update),
            (None, None) => Err(SyncError::Invariant(
                "sync called without a source or a destination row".to_string(),
            )),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => f.write_str("insert"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Fold per-column write outcomes.
pub fn aggregate(outcomes: &[WriteOutcome]) -> ChangeOutcome {
    if outcomes.is_empty() || outcomes.iter().all(WriteOutcome::is_failure) {
        ChangeOutcome::Unchanged
    } else if outcomes.iter().all(WriteOutcome::is_success) {
        ChangeOutcome::Changed
    } else {
        ChangeOutcome::PartiallyChanged
    }
}

/// Value chains of the single-column writes of one record.
fn value_writes(
    side: &CvChain,
    mode: SyncMode,
    scope: DeleteScope,
    source: Option<&Row>,
    destination: Option<&Row>,
) -> Vec<CvChain> {
    let column = |(i, v): (usize, &Value)| side.single(i, v.clone());
    match (mode, source, destination) {
        (SyncMode::Update, Some(src), Some(dst)) => src
            .values()
            .iter()
            .zip(dst.values())
            .enumerate()
            .filter(|(_, (s, d))| s != d)
            .filter_map(|(i, (s, _))| column((i, s)))
            .collect(),
        (SyncMode::Insert, Some(src), _) => src
            .values()
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .filter_map(column)
            .collect(),
        (SyncMode::Delete, _, Some(dst)) if scope == DeleteScope::Key => {
            dst.values().first().and_then(|v| side.single(0, v.clone())).into_iter().collect()
        }
        (SyncMode::Delete, _, Some(dst)) => dst
            .values()
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .filter_map(column)
            .collect(),
        _ => Vec::new(),
    }
}

/// Writes records of the templates of one destination database.
pub struct Dispatcher<'a> {
    backend: &'a dyn QueryBackend,
    suspend_replication: bool,
    callbacks: &'a [Arc<dyn ChangeCallback>],
}

impl<'a> Dispatcher<'a> {
    pub fn new(destination: &'a Database) -> Self {
        Self {
            backend: destination.backend.as_ref(),
            suspend_replication: destination.config.suspend_replication,
            callbacks: &destination.callbacks,
        }
    }

    /// Write the difference between `source` and `destination`.
    ///
    /// Returns `Err` only for invariant violations; failed writes lower the
    /// outcome instead.
    pub async fn sync(
        &self,
        conn: &mut dyn Connection,
        template: &Template,
        scope: DeleteScope,
        source: Option<&Row>,
        destination: Option<&Row>,
    ) -> Result<ChangeOutcome, SyncError> {
        let mode = SyncMode::select(source, destination)?;
        let side = &template.destination;
        let Some(authoritative) = (match mode {
            SyncMode::Delete => destination,
            SyncMode::Insert | SyncMode::Update => source,
        }) else {
            return Err(SyncError::Invariant(format!("{mode} without its row")));
        };
        let key = side.key.bind(authoritative.keys());
        let values = value_writes(&side.value, mode, scope, source, destination);
        if values.is_empty() {
            debug!("Nothing to {mode} for {} ({key})", template.name);
            return Ok(ChangeOutcome::Unchanged);
        }

        let previous = self.suspend_replication(conn).await;
        let mut outcomes = Vec::with_capacity(values.len());
        let mut result = Ok(());
        for value in values {
            let request = WriteRequest::new(side, key.clone(), value);
            let written = match mode {
                SyncMode::Insert => self.backend.insert(conn, &request).await,
                SyncMode::Update => self.backend.update(conn, &request).await,
                SyncMode::Delete => self.backend.delete(conn, &request, scope).await,
            };
            match written {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.restore_replication(conn, previous).await;
        result?;

        let outcome = aggregate(&outcomes);
        match outcome {
            ChangeOutcome::PartiallyChanged => warn!(
                "Partial {mode} of {} ({key}), action may be needed",
                template.name
            ),
            ChangeOutcome::Unchanged => warn!("Failed to {mode} {} ({key})", template.name),
            ChangeOutcome::Changed => debug!("{mode} of {} ({key}) done", template.name),
        }

        if outcome.is_change() {
            let event = CallbackEvent::change(&template.name, authoritative.keys(), mode, outcome);
            fire(self.callbacks, &event, conn).await;
            fire(&template.callbacks, &event, conn).await;
        }
        Ok(outcome)
    }

    async fn suspend_replication(&self, conn: &mut dyn Connection) -> Option<bool> {
        if !self.suspend_replication {
            return None;
        }
        match conn.set_replication(Some(false)).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Could not suspend replication: {e}");
                None
            }
        }
    }

    async fn restore_replication(&self, conn: &mut dyn Connection, previous: Option<bool>) {
        if let Some(previous) = previous {
            if let Err(e) = conn.set_replication(Some(previous)).await {
                warn!("Could not restore replication: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{CvEntry, DataType, Link};

    fn chain() -> CvChain {
        CvChain::new(vec![
            CvEntry::new(Link::Column { name: "ram".into() }, DataType::Integer),
            CvEntry::new(Link::Column { name: "os".into() }, DataType::String),
        ])
    }

    fn row(ram: Value, os: Value) -> Row {
        Row::new(vec![Value::from("srv1")], vec![ram, os])
    }

    #[test]
    fn test_mode_selection() {
        let r = row(Value::Int(1), Value::Null);
        assert_eq!(SyncMode::select(Some(&r), None).unwrap(), SyncMode::Insert);
        assert_eq!(SyncMode::select(None, Some(&r)).unwrap(), SyncMode::Delete);
        assert_eq!(SyncMode::select(Some(&r), Some(&r)).unwrap(), SyncMode::Update);
        assert!(matches!(
            SyncMode::select(None, None),
            Err(SyncError::Invariant(_))
        ));
    }

    #[test]
    fn test_aggregate() {
        use WriteOutcome::*;
        assert_eq!(aggregate(&[Success, Success]), ChangeOutcome::Changed);
        assert_eq!(aggregate(&[Failure, Failure]), ChangeOutcome::Unchanged);
        assert_eq!(aggregate(&[Success, Failure]), ChangeOutcome::PartiallyChanged);
        assert_eq!(aggregate(&[PartialSuccess]), ChangeOutcome::PartiallyChanged);
    }

    #[test]
    fn test_update_writes_only_differing_columns() {
        let src = row(Value::Int(16), Value::from("linux"));
        let dst = row(Value::Int(8), Value::from("linux"));
        let writes = value_writes(&chain(), SyncMode::Update, DeleteScope::Value, Some(&src), Some(&dst));
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0][0].link, Link::Column { name: "ram".into() });
        assert_eq!(writes[0][0].value, Some(Value::Int(16)));
    }

    #[test]
    fn test_insert_skips_null_columns() {
        let src = row(Value::Null, Value::from("linux"));
        let writes = value_writes(&chain(), SyncMode::Insert, DeleteScope::Value, Some(&src), None);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0][0].value, Some(Value::from("linux")));
    }

    #[test]
    fn test_delete_scopes() {
        let dst = row(Value::Int(8), Value::from("linux"));
        let by_value = value_writes(&chain(), SyncMode::Delete, DeleteScope::Value, None, Some(&dst));
        assert_eq!(by_value.len(), 2);
        let by_key = value_writes(&chain(), SyncMode::Delete, DeleteScope::Key, None, Some(&dst));
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[0][0].value, Some(Value::Int(8)));
    }
}
