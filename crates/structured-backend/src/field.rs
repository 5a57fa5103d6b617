//! Field row writes.
//!
//! Every write touches the live table and the history table of the field in
//! the same way. Callers run these inside a [`sync_sql::Transaction`].

use crate::entity::Lookup;
use crate::schema::{
    data_table, field_columns, ip_to_int, revision_table, Entity, LANGUAGE_NONE,
};
use crate::term::resolve_tid;
use serde::{Deserialize, Serialize};
use sync_core::{DataType, Value};
use sync_sql::{
    fetch_scalar, Condition, Connection, ConnectionError, Delete, DeletePolicy, Insert, Select,
    Update,
};
use tracing::{debug, warn};

/// Field value written to every newly created entity of a bundle.
///
/// ```yaml
/// defaults:
///   - { entity_type: node, bundle: server, field: field_state, type: "term:state", value: active }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefault {
    pub entity_type: String,
    pub bundle: String,
    pub field: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub value: Value,
}

/// Room left in a field of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Next free delta
    Next(i64),
    /// At its cardinality
    Full(i64),
    /// No field_config entry
    Unconfigured,
}

fn entity_filter(entity: &Entity) -> Vec<Condition> {
    vec![
        Condition::eq("entity_type", entity.entity_type),
        Condition::eq("entity_id", entity.id),
    ]
}

fn live_filter(entity: &Entity) -> Vec<Condition> {
    let mut conditions = entity_filter(entity);
    conditions.push(Condition::eq("deleted", 0));
    conditions
}

/// Storage cells of a value, resolving terms and addresses.
///
/// Returns `None` after logging when the value cannot be stored.
pub async fn storage_cells(
    conn: &mut dyn Connection,
    field: &str,
    data_type: &DataType,
    value: &Value,
) -> Result<Option<Vec<(String, Value)>>, ConnectionError> {
    let columns = field_columns(field, data_type);
    let stored = match data_type {
        DataType::Term { vocabulary } => match resolve_tid(conn, vocabulary, value).await? {
            Lookup::Found(tid) => vec![Value::Int(tid)],
            Lookup::Missing => {
                warn!("Term '{value}' not found in vocabulary '{vocabulary}' for {field}");
                return Ok(None);
            }
            Lookup::Ambiguous(n) => {
                warn!("Term '{value}' matches {n} terms in vocabulary '{vocabulary}' for {field}");
                return Ok(None);
            }
        },
        DataType::Ip => match ip_to_int(value) {
            Some(address) => vec![Value::Int(address), Value::Int(address)],
            None => {
                warn!("'{value}' is not an IPv4 address for {field}");
                return Ok(None);
            }
        },
        DataType::String | DataType::Integer | DataType::Decimal | DataType::Id => {
            vec![value.clone()]
        }
    };
    Ok(Some(columns.into_iter().zip(stored).collect()))
}

/// Cardinality check for adding one value to `field` of `entity`.
pub async fn capacity(
    conn: &mut dyn Connection,
    field: &str,
    entity: &Entity,
) -> Result<Capacity, ConnectionError> {
    let cardinality = Select::from("field_config")
        .column("cardinality")
        .filter(Condition::eq("field_name", field))
        .filter(Condition::eq("deleted", 0))
        .build();
    let Some(cardinality) = fetch_scalar(conn, &cardinality).await?.and_then(|v| v.as_i64())
    else {
        return Ok(Capacity::Unconfigured);
    };

    let max_delta = live_filter(entity)
        .into_iter()
        .fold(Select::from(data_table(field)).column("MAX(delta)"), Select::filter)
        .build();
    let next = fetch_scalar(conn, &max_delta)
        .await?
        .and_then(|v| v.as_i64())
        .map_or(0, |max| max + 1);

    if cardinality != -1 && next >= cardinality {
        Ok(Capacity::Full(cardinality))
    } else {
        Ok(Capacity::Next(next))
    }
}

/// Insert one value at `delta` in the live and history tables.
pub async fn insert_value(
    conn: &mut dyn Connection,
    field: &str,
    entity: &Entity,
    delta: i64,
    cells: &[(String, Value)],
) -> Result<(), ConnectionError> {
    for table in [data_table(field), revision_table(field)] {
        let insert = cells.iter().fold(
            Insert::into(table)
                .value("entity_type", entity.entity_type)
                .value("bundle", entity.bundle.as_str())
                .value("deleted", 0)
                .value("entity_id", entity.id)
                .value("revision_id", entity.revision_id)
                .value("language", LANGUAGE_NONE)
                .value("delta", delta),
            |insert, (column, value)| insert.value(column.as_str(), value.clone()),
        );
        conn.execute(&insert.build()).await?;
    }
    debug!("Inserted {field}[{delta}] on {entity}");
    Ok(())
}

/// Overwrite the first live value; returns the number of live rows changed.
pub async fn update_value(
    conn: &mut dyn Connection,
    field: &str,
    entity: &Entity,
    cells: &[(String, Value)],
) -> Result<u64, ConnectionError> {
    let min_delta = live_filter(entity)
        .into_iter()
        .fold(Select::from(data_table(field)).column("MIN(delta)"), Select::filter)
        .build();
    let Some(delta) = fetch_scalar(conn, &min_delta).await?.and_then(|v| v.as_i64()) else {
        return Ok(0);
    };

    let set = |table: String| {
        cells
            .iter()
            .fold(Update::table(table), |u, (c, v)| u.set(c.as_str(), v.clone()))
    };
    let live = live_filter(entity)
        .into_iter()
        .fold(set(data_table(field)), Update::filter)
        .filter(Condition::eq("delta", delta));
    let affected = conn.execute(&live.build()).await?;

    let history = live_filter(entity)
        .into_iter()
        .fold(set(revision_table(field)), Update::filter)
        .filter(Condition::eq("revision_id", entity.revision_id))
        .filter(Condition::eq("delta", delta));
    conn.execute(&history.build()).await?;
    Ok(affected)
}

/// Delete live values of `field`, all of them or those matching `matching`.
///
/// The soft policy flags rows `deleted = 1`, first removing older flagged
/// rows at the same delta. Returns the number of live values removed.
pub async fn delete_values(
    conn: &mut dyn Connection,
    field: &str,
    entity: &Entity,
    matching: Option<&(String, Value)>,
    policy: DeletePolicy,
) -> Result<u64, ConnectionError> {
    let with_match = |mut conditions: Vec<Condition>| {
        if let Some((column, value)) = matching {
            conditions.push(Condition::eq(column.as_str(), value.clone()));
        }
        conditions
    };

    match policy {
        DeletePolicy::Hard => {
            let live = with_match(entity_filter(entity))
                .into_iter()
                .fold(Delete::from(data_table(field)), Delete::filter);
            let removed = conn.execute(&live.build()).await?;
            let history = with_match(entity_filter(entity))
                .into_iter()
                .fold(Delete::from(revision_table(field)), Delete::filter);
            conn.execute(&history.build()).await?;
            Ok(removed)
        }
        DeletePolicy::Soft => {
            let deltas = with_match(live_filter(entity))
                .into_iter()
                .fold(Select::from(data_table(field)).column("delta"), Select::filter)
                .order_by("delta")
                .build();
            let deltas: Vec<i64> = conn
                .fetch_all(&deltas)
                .await?
                .into_iter()
                .filter_map(|row| row.first().and_then(Value::as_i64))
                .collect();

            for &delta in &deltas {
                for (table, revision) in [
                    (data_table(field), None),
                    (revision_table(field), Some(entity.revision_id)),
                ] {
                    let mut scope = entity_filter(entity);
                    scope.push(Condition::eq("delta", delta));
                    if let Some(revision) = revision {
                        scope.push(Condition::eq("revision_id", revision));
                    }

                    let tombstones = scope
                        .iter()
                        .cloned()
                        .fold(Delete::from(table.as_str()), Delete::filter)
                        .filter(Condition::eq("deleted", 1));
                    conn.execute(&tombstones.build()).await?;

                    let flag = scope
                        .into_iter()
                        .fold(Update::table(table.as_str()).set("deleted", 1), Update::filter)
                        .filter(Condition::eq("deleted", 0));
                    conn.execute(&flag.build()).await?;
                }
            }
            Ok(deltas.len() as u64)
        }
    }
}

/// Fields attached to an entity type and bundle.
pub async fn instance_fields(
    conn: &mut dyn Connection,
    entity_type: &str,
    bundle: &str,
) -> Result<Vec<String>, ConnectionError> {
    let statement = Select::from("field_config_instance")
        .column("field_name")
        .filter(Condition::eq("entity_type", entity_type))
        .filter(Condition::eq("bundle", bundle))
        .filter(Condition::eq("deleted", 0))
        .order_by("field_name")
        .build();
    Ok(conn
        .fetch_all(&statement)
        .await?
        .into_iter()
        .filter_map(|row| row.first().and_then(|v| v.as_str().map(String::from)))
        .collect())
}

/// Delete the values of every field attached to `entity`.
pub async fn delete_entity_fields(
    conn: &mut dyn Connection,
    entity: &Entity,
    policy: DeletePolicy,
) -> Result<(), ConnectionError> {
    for field in instance_fields(conn, entity.entity_type, &entity.bundle).await? {
        delete_values(conn, &field, entity, None, policy).await?;
    }
    Ok(())
}

/// Write configured defaults of a freshly created entity, except `skip`.
pub async fn apply_defaults(
    conn: &mut dyn Connection,
    entity: &Entity,
    defaults: &[FieldDefault],
    skip: Option<&str>,
) -> Result<(), ConnectionError> {
    let applicable = defaults.iter().filter(|d| {
        d.entity_type == entity.entity_type
            && d.bundle == entity.bundle
            && Some(d.field.as_str()) != skip
    });
    for default in applicable {
        match storage_cells(conn, &default.field, &default.data_type, &default.value).await? {
            Some(cells) => insert_value(conn, &default.field, entity, 0, &cells).await?,
            None => warn!("Skipping default {} on {entity}", default.field),
        }
    }
    Ok(())
}
