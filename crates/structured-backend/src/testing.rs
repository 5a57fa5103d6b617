//! Schema fixture for tests.
//!
//! Creates the node, revision, taxonomy, field-collection, relation and field
//! tables on any [`Connection`], with the column layout and primary keys the
//! backend relies on. Used by the tests of this crate and by the end-to-end
//! tests of the engine against in-memory SQLite.

use crate::schema::{
    data_table, field_columns, host_item_column, host_revision_column, revision_table,
    COLLECTION_ITEM, ENDPOINTS, ENDPOINT_ID, ENDPOINT_INDEX, ENDPOINT_TYPE, RELATION,
};
use sync_core::{DataType, Value};
use sync_sql::{Connection, ConnectionError, Insert, Statement};

const CORE_TABLES: &str = "
    CREATE TABLE node (
        nid INTEGER PRIMARY KEY AUTOINCREMENT,
        vid INTEGER NOT NULL DEFAULT 0,
        type VARCHAR(32) NOT NULL,
        language VARCHAR(12) NOT NULL DEFAULT '',
        title VARCHAR(255) NOT NULL,
        uid INTEGER NOT NULL DEFAULT 0,
        status INTEGER NOT NULL DEFAULT 1,
        created INTEGER NOT NULL DEFAULT 0,
        changed INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE node_revision (
        vid INTEGER PRIMARY KEY AUTOINCREMENT,
        nid INTEGER NOT NULL,
        uid INTEGER NOT NULL DEFAULT 0,
        title VARCHAR(255) NOT NULL,
        log TEXT NOT NULL DEFAULT '',
        timestamp INTEGER NOT NULL DEFAULT 0,
        status INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE field_config (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        field_name VARCHAR(32) NOT NULL,
        type VARCHAR(128) NOT NULL,
        cardinality INTEGER NOT NULL DEFAULT 1,
        deleted INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE field_config_instance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        field_id INTEGER NOT NULL,
        field_name VARCHAR(32) NOT NULL,
        entity_type VARCHAR(32) NOT NULL,
        bundle VARCHAR(128) NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE taxonomy_vocabulary (
        vid INTEGER PRIMARY KEY AUTOINCREMENT,
        name VARCHAR(255) NOT NULL,
        machine_name VARCHAR(255) NOT NULL
    );
    CREATE TABLE taxonomy_term_data (
        tid INTEGER PRIMARY KEY AUTOINCREMENT,
        vid INTEGER NOT NULL,
        name VARCHAR(255) NOT NULL
    );
    CREATE TABLE field_collection_item (
        item_id INTEGER PRIMARY KEY AUTOINCREMENT,
        revision_id INTEGER NOT NULL DEFAULT 0,
        field_name VARCHAR(32) NOT NULL,
        archived INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE field_collection_item_revision (
        revision_id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id INTEGER NOT NULL
    );
    CREATE TABLE relation (
        rid INTEGER PRIMARY KEY AUTOINCREMENT,
        relation_type VARCHAR(255) NOT NULL,
        vid INTEGER NOT NULL DEFAULT 0,
        uid INTEGER NOT NULL DEFAULT 0,
        created INTEGER NOT NULL DEFAULT 0,
        changed INTEGER NOT NULL DEFAULT 0,
        arity INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE relation_revision (
        vid INTEGER PRIMARY KEY AUTOINCREMENT,
        rid INTEGER NOT NULL,
        relation_type VARCHAR(255) NOT NULL,
        uid INTEGER NOT NULL DEFAULT 0,
        changed INTEGER NOT NULL DEFAULT 0,
        arity INTEGER NOT NULL DEFAULT 0
    )
";

/// Run a `;`-separated script of parameterless statements.
pub async fn run_script(conn: &mut dyn Connection, script: &str) -> Result<(), ConnectionError> {
    for sql in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        conn.execute(&Statement::raw(sql)).await?;
    }
    Ok(())
}

fn column_type(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::String => "VARCHAR(255)",
        DataType::Decimal => "DECIMAL(10,2)",
        DataType::Integer | DataType::Term { .. } | DataType::Id | DataType::Ip => "INTEGER",
    }
}

/// Live and history tables of a field with the given value columns.
fn field_tables_ddl(field: &str, columns: &[(String, &str)]) -> String {
    let columns: String = columns
        .iter()
        .map(|(name, ty)| format!(", {name} {ty}"))
        .collect();
    let common = "entity_type VARCHAR(128) NOT NULL, bundle VARCHAR(128) NOT NULL, \
                  deleted INTEGER NOT NULL DEFAULT 0, entity_id INTEGER NOT NULL, \
                  revision_id INTEGER, language VARCHAR(32) NOT NULL, delta INTEGER NOT NULL";
    format!(
        "CREATE TABLE {} ({common}{columns}, \
         PRIMARY KEY (entity_type, entity_id, deleted, delta, language));\
         CREATE TABLE {} ({common}{columns}, \
         PRIMARY KEY (entity_type, entity_id, revision_id, deleted, delta, language))",
        data_table(field),
        revision_table(field),
    )
}

async fn register(
    conn: &mut dyn Connection,
    field: &str,
    field_type: &str,
    cardinality: i64,
    instances: &[(&str, &str)],
) -> Result<(), ConnectionError> {
    let config = Insert::into("field_config")
        .value("field_name", field)
        .value("type", field_type)
        .value("cardinality", cardinality)
        .build();
    conn.execute(&config).await?;
    let field_id = conn.last_insert_id().map_or(0, |id| id as i64);
    for (entity_type, bundle) in instances {
        let instance = Insert::into("field_config_instance")
            .value("field_id", field_id)
            .value("field_name", field)
            .value("entity_type", *entity_type)
            .value("bundle", *bundle)
            .build();
        conn.execute(&instance).await?;
    }
    Ok(())
}

/// Create the entity tables and the relation endpoints field.
pub async fn create_schema(conn: &mut dyn Connection) -> Result<(), ConnectionError> {
    run_script(conn, CORE_TABLES).await?;
    let endpoints = [
        (ENDPOINT_TYPE.to_string(), "VARCHAR(128)"),
        (ENDPOINT_ID.to_string(), "INTEGER"),
        (ENDPOINT_INDEX.to_string(), "INTEGER"),
    ];
    run_script(conn, &field_tables_ddl(ENDPOINTS, &endpoints)).await?;
    register(conn, ENDPOINTS, "relation_endpoint", -1, &[]).await
}

/// Create a field of `data_type` attached to each `(entity_type, bundle)`.
///
/// `cardinality` is the maximum number of values per entity, -1 for
/// unlimited.
pub async fn create_field(
    conn: &mut dyn Connection,
    field: &str,
    data_type: &DataType,
    cardinality: i64,
    instances: &[(&str, &str)],
) -> Result<(), ConnectionError> {
    let columns: Vec<(String, &str)> = field_columns(field, data_type)
        .into_iter()
        .map(|name| (name, column_type(data_type)))
        .collect();
    run_script(conn, &field_tables_ddl(field, &columns)).await?;
    register(conn, field, &data_type.to_string(), cardinality, instances).await
}

/// Create a field-collection host field on nodes of `bundle`.
pub async fn create_host_field(
    conn: &mut dyn Connection,
    field: &str,
    cardinality: i64,
    bundle: &str,
) -> Result<(), ConnectionError> {
    let columns = [
        (host_item_column(field), "INTEGER"),
        (host_revision_column(field), "INTEGER"),
    ];
    run_script(conn, &field_tables_ddl(field, &columns)).await?;
    register(conn, field, "field_collection", cardinality, &[("node", bundle)]).await
}

/// Attach an existing field to the items of a host field.
pub async fn attach_to_items(
    conn: &mut dyn Connection,
    field: &str,
    host_field: &str,
) -> Result<(), ConnectionError> {
    let instance = Insert::into("field_config_instance")
        .value("field_id", 0)
        .value("field_name", field)
        .value("entity_type", COLLECTION_ITEM)
        .value("bundle", host_field)
        .build();
    conn.execute(&instance).await.map(|_| ())
}

/// Attach an existing field to relations of `relation_type`.
pub async fn attach_to_relations(
    conn: &mut dyn Connection,
    field: &str,
    relation_type: &str,
) -> Result<(), ConnectionError> {
    let instance = Insert::into("field_config_instance")
        .value("field_id", 0)
        .value("field_name", field)
        .value("entity_type", RELATION)
        .value("bundle", relation_type)
        .build();
    conn.execute(&instance).await.map(|_| ())
}

/// Create a vocabulary with its terms; returns the vocabulary id.
pub async fn create_vocabulary(
    conn: &mut dyn Connection,
    machine_name: &str,
    terms: &[&str],
) -> Result<i64, ConnectionError> {
    let vocabulary = Insert::into("taxonomy_vocabulary")
        .value("name", machine_name)
        .value("machine_name", machine_name)
        .build();
    conn.execute(&vocabulary).await?;
    let vid = conn.last_insert_id().map_or(0, |id| id as i64);
    for term in terms {
        let term = Insert::into("taxonomy_term_data")
            .value("vid", vid)
            .value("name", Value::from(*term))
            .build();
        conn.execute(&term).await?;
    }
    Ok(vid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_tables_ddl() {
        let ddl = field_tables_ddl("field_ip", &[("field_ip_start".into(), "INTEGER")]);
        assert!(ddl.starts_with("CREATE TABLE field_data_field_ip (entity_type"));
        assert!(ddl.contains(", field_ip_start INTEGER, PRIMARY KEY"));
        assert!(ddl.contains("CREATE TABLE field_revision_field_ip"));
    }
}
