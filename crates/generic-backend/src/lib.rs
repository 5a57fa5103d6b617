//! Flat-table query backend.
//!
//! Every cv-entry of a generic side is a [`Link::Column`]. Reads select the
//! key and value columns from the side's `from` clause; writes target its
//! `table` with the key columns as the row identity. Column names may be
//! qualified (`s.ram`) for joined reads; writes use the unqualified name.
//!
//! # Example
//!
//! ```yaml
//! source:
//!   key:
//!     - [{ kind: column, name: tag }, string]
//!   value:
//!     - [{ kind: column, name: ram }, integer]
//!   options:
//!     table: servers
//!     filter: "retired = 0"
//! ```

use async_trait::async_trait;
use sync_core::{
    ensure_columns, BackendArgs, ChainError, CvChain, CvEntry, GenericArgs, Link, Row,
    SideOptions, TemplateSide, Value,
};
use sync_sql::{
    fetch_scalar, BackendError, BackendKind, Condition, Connection, Delete, DeletePolicy,
    DeleteScope, Insert, QueryBackend, Select, Statement, Transaction, Update, WriteOutcome,
    WriteRequest,
};
use tracing::{debug, error, warn};

/// Query backend for plain relational tables.
#[derive(Debug, Clone)]
pub struct GenericBackend {
    policy: DeletePolicy,
}

impl GenericBackend {
    pub fn new(policy: DeletePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DeletePolicy {
        self.policy
    }
}

fn generic_args(side: &TemplateSide) -> Result<&GenericArgs, BackendError> {
    match &side.args {
        BackendArgs::Generic(args) => Ok(args),
        BackendArgs::Structured(_) => Err(BackendError::Invariant(
            "generic backend called with structured side arguments".to_string(),
        )),
    }
}

fn column_name(entry: &CvEntry) -> &str {
    match &entry.link {
        Link::Column { name } => name,
        // prepare() rejects every other link
        other => other.kind(),
    }
}

/// Column name without its table qualifier.
fn write_column(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn key_conditions(key: &CvChain) -> Vec<Condition> {
    key.iter()
        .map(|e| Condition::eq(write_column(column_name(e)), e.value_or_null().clone()))
        .collect()
}

fn with_conditions(update: Update, conditions: Vec<Condition>) -> Update {
    conditions.into_iter().fold(update, Update::filter)
}

/// The write target of a side, or `None` for read-only sides.
fn target<'a>(args: &'a GenericArgs, request: &WriteRequest<'_>) -> Option<&'a str> {
    let table = args.table.as_deref();
    if table.is_none() {
        warn!(
            "Side reading from '{}' has no table and is read-only, cannot write {}",
            args.from, request.key
        );
    }
    table
}

async fn execute(conn: &mut dyn Connection, statement: &Statement) -> Option<u64> {
    match conn.execute(statement).await {
        Ok(affected) => Some(affected),
        Err(e) => {
            error!("{e}");
            None
        }
    }
}

#[async_trait]
impl QueryBackend for GenericBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Generic
    }

    fn prepare(
        &self,
        key: CvChain,
        value: CvChain,
        options: &SideOptions,
    ) -> Result<TemplateSide, BackendError> {
        if value.is_empty() {
            return Err(ChainError::EmptyValueChain.into());
        }
        if key.is_empty() {
            return Err(BackendError::Options {
                backend: BackendKind::Generic,
                message: "key chain is empty".to_string(),
            });
        }
        ensure_columns(&key)?;
        ensure_columns(&value)?;

        let from = options
            .from
            .clone()
            .or_else(|| options.table.clone())
            .ok_or_else(|| BackendError::Options {
                backend: BackendKind::Generic,
                message: "either 'table' or 'from' is required".to_string(),
            })?;

        Ok(TemplateSide {
            key,
            value,
            args: BackendArgs::Generic(GenericArgs {
                table: options.table.clone(),
                from,
                filter: options.filter.clone(),
                deleted_column: options.deleted_column.clone(),
            }),
        })
    }

    async fn read(
        &self,
        conn: &mut dyn Connection,
        side: &TemplateSide,
    ) -> Result<Vec<Row>, BackendError> {
        let args = generic_args(side)?;
        let mut select = Select::from(&args.from)
            .columns(side.key.iter().chain(side.value.iter()).map(column_name));
        for entry in side.key.iter().chain(side.value.iter()) {
            if let Some(value) = &entry.value {
                select = select.filter(Condition::eq(column_name(entry), value.clone()));
            }
        }
        if let Some(filter) = &args.filter {
            select = select.filter(Condition::raw(filter));
        }
        if let Some(deleted) = &args.deleted_column {
            select = select.filter(Condition::raw(format!("{deleted} IS NULL OR {deleted} = 0")));
        }
        for entry in side.key.iter() {
            select = select.order_by(column_name(entry));
        }

        let raw = conn.fetch_all(&select.build()).await?;
        let mut rows = Vec::with_capacity(raw.len());
        for cells in raw {
            match side.normalize_row(cells) {
                Ok(row) => rows.push(row),
                Err(e) => warn!("Skipping row from '{}': {e}", args.from),
            }
        }
        debug!("Read {} rows from '{}'", rows.len(), args.from);
        Ok(rows)
    }

    async fn update(
        &self,
        conn: &mut dyn Connection,
        request: &WriteRequest<'_>,
    ) -> Result<WriteOutcome, BackendError> {
        request.ensure_single_value("update")?;
        let args = generic_args(request.side)?;
        let entry = &request.value[0];
        if entry.value_or_null().is_null() {
            return self.delete(conn, request, DeleteScope::Value).await;
        }
        let Some(table) = target(args, request) else {
            return Ok(WriteOutcome::Failure);
        };

        let update = with_conditions(
            Update::table(table).set(
                write_column(column_name(entry)),
                entry.value_or_null().clone(),
            ),
            key_conditions(&request.key),
        );
        match execute(conn, &update.build()).await {
            Some(0) => {
                debug!("No row for {} in '{table}', inserting", request.key);
                self.insert(conn, request).await
            }
            Some(_) => Ok(WriteOutcome::Success),
            None => Ok(WriteOutcome::Failure),
        }
    }

    async fn insert(
        &self,
        conn: &mut dyn Connection,
        request: &WriteRequest<'_>,
    ) -> Result<WriteOutcome, BackendError> {
        request.ensure_single_value("insert")?;
        let args = generic_args(request.side)?;
        let Some(table) = target(args, request) else {
            return Ok(WriteOutcome::Failure);
        };
        let entry = &request.value[0];
        let column = write_column(column_name(entry));
        let value = entry.value_or_null().clone();

        let existing = key_conditions(&request.key)
            .into_iter()
            .fold(Select::from(table).column("1"), Select::filter)
            .limit(1)
            .build();

        let mut tx = match Transaction::begin(conn).await {
            Ok(tx) => tx,
            Err(e) => {
                error!("{e}");
                return Ok(WriteOutcome::Failure);
            }
        };
        let exists = match fetch_scalar(tx.conn(), &existing).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                error!("{e}");
                if let Err(e) = tx.rollback().await {
                    warn!("Rollback failed: {e}");
                }
                return Ok(WriteOutcome::Failure);
            }
        };

        let statement = if exists {
            let mut update = Update::table(table).set(column, value);
            if let Some(deleted) = &args.deleted_column {
                update = update.set(write_column(deleted), 0);
            }
            with_conditions(update, key_conditions(&request.key)).build()
        } else {
            request
                .key
                .iter()
                .fold(Insert::into(table), |insert, e| {
                    insert.value(write_column(column_name(e)), e.value_or_null().clone())
                })
                .value(column, value)
                .build()
        };

        match tx.execute(&statement).await {
            Ok(_) => match tx.commit().await {
                Ok(()) => Ok(WriteOutcome::Success),
                Err(e) => {
                    error!("{e}");
                    Ok(WriteOutcome::Failure)
                }
            },
            Err(e) => {
                error!("{e}");
                if let Err(e) = tx.rollback().await {
                    warn!("Rollback failed: {e}");
                }
                Ok(WriteOutcome::Failure)
            }
        }
    }

    async fn delete(
        &self,
        conn: &mut dyn Connection,
        request: &WriteRequest<'_>,
        scope: DeleteScope,
    ) -> Result<WriteOutcome, BackendError> {
        request.ensure_single_value("delete")?;
        let args = generic_args(request.side)?;
        let Some(table) = target(args, request) else {
            return Ok(WriteOutcome::Failure);
        };

        let statement = match scope {
            DeleteScope::Value => {
                let entry = &request.value[0];
                let column = write_column(column_name(entry));
                let mut conditions = key_conditions(&request.key);
                if let Some(value) = entry.value.as_ref().filter(|v| !v.is_null()) {
                    conditions.push(Condition::eq(column, value.clone()));
                }
                with_conditions(Update::table(table).set(column, Value::Null), conditions).build()
            }
            DeleteScope::Key => match (&args.deleted_column, self.policy) {
                (Some(deleted), DeletePolicy::Soft) => with_conditions(
                    Update::table(table).set(write_column(deleted), 1),
                    key_conditions(&request.key),
                )
                .build(),
                _ => key_conditions(&request.key)
                    .into_iter()
                    .fold(Delete::from(table), Delete::filter)
                    .build(),
            },
        };

        match execute(conn, &statement).await {
            Some(0) => {
                warn!("Nothing to delete for {} in '{table}'", request.key);
                Ok(WriteOutcome::Failure)
            }
            Some(_) => Ok(WriteOutcome::Success),
            None => Ok(WriteOutcome::Failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::DataType;

    fn column(name: &str, data_type: DataType) -> CvEntry {
        CvEntry::new(Link::Column { name: name.into() }, data_type)
    }

    fn chains() -> (CvChain, CvChain) {
        (
            CvChain::new(vec![column("tag", DataType::String)]),
            CvChain::new(vec![column("ram", DataType::Integer)]),
        )
    }

    #[test]
    fn test_prepare_requires_table_or_from() {
        let backend = GenericBackend::new(DeletePolicy::Soft);
        let (key, value) = chains();
        let err = backend
            .prepare(key.clone(), value.clone(), &SideOptions::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::Options { .. }));

        let side = backend
            .prepare(
                key,
                value,
                &SideOptions {
                    from: Some("servers s JOIN racks r ON r.id = s.rack".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        match side.args {
            BackendArgs::Generic(args) => {
                assert_eq!(args.table, None);
                assert!(args.from.starts_with("servers s"));
            }
            other => panic!("unexpected args {other:?}"),
        }
    }

    #[test]
    fn test_prepare_rejects_non_columns() {
        let backend = GenericBackend::new(DeletePolicy::Hard);
        let (key, _) = chains();
        let value = CvChain::new(vec![CvEntry::new(Link::Title, DataType::String)]);
        let err = backend
            .prepare(
                key,
                value,
                &SideOptions {
                    table: Some("servers".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::Chain(ChainError::NotAColumn(_))));
    }

    #[test]
    fn test_write_column_strips_qualifier() {
        assert_eq!(write_column("s.ram"), "ram");
        assert_eq!(write_column("ram"), "ram");
    }
}
