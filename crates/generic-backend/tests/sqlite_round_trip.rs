//! Generic backend against an in-memory SQLite database.

use generic_backend::GenericBackend;
use sqlite_connection::SqliteConnection;
use sync_core::{CvChain, CvEntry, DataType, Link, Row, SideOptions, TemplateSide, Value};
use sync_sql::{DeletePolicy, DeleteScope, QueryBackend, WriteOutcome, WriteRequest};

const SCHEMA: &str = "
    CREATE TABLE servers (
        tag TEXT PRIMARY KEY,
        ram INTEGER,
        addr TEXT,
        retired INTEGER NOT NULL DEFAULT 0
    );
    INSERT INTO servers (tag, ram, addr) VALUES ('srv2', 8192, '10.0.0.2');
    INSERT INTO servers (tag, ram, addr) VALUES ('srv1', 16384, NULL);
";

fn column(name: &str, data_type: DataType) -> CvEntry {
    CvEntry::new(Link::Column { name: name.into() }, data_type)
}

async fn setup(policy: DeletePolicy, options: SideOptions) -> (GenericBackend, SqliteConnection, TemplateSide) {
    let mut conn = SqliteConnection::memory().await.unwrap();
    conn.execute_batch(SCHEMA).await.unwrap();
    let backend = GenericBackend::new(policy);
    let side = backend
        .prepare(
            CvChain::new(vec![column("tag", DataType::String)]),
            CvChain::new(vec![
                column("ram", DataType::Integer),
                column("addr", DataType::Ip),
            ]),
            &options,
        )
        .unwrap();
    (backend, conn, side)
}

fn table(name: &str) -> SideOptions {
    SideOptions {
        table: Some(name.into()),
        ..Default::default()
    }
}

fn request<'a>(side: &'a TemplateSide, tag: &str, index: usize, value: Value) -> WriteRequest<'a> {
    WriteRequest::new(
        side,
        side.key.bind(&[Value::from(tag)]),
        side.value.single(index, value).unwrap(),
    )
}

#[tokio::test]
async fn test_read_orders_by_key() {
    let (backend, mut conn, side) = setup(DeletePolicy::Hard, table("servers")).await;
    let rows = backend.read(&mut conn, &side).await.unwrap();
    assert_eq!(
        rows,
        vec![
            Row::new(vec![Value::from("srv1")], vec![Value::Int(16384), Value::Null]),
            Row::new(
                vec![Value::from("srv2")],
                vec![Value::Int(8192), Value::from("10.0.0.2")]
            ),
        ]
    );
}

#[tokio::test]
async fn test_read_with_bound_value_and_filter() {
    let (backend, mut conn, side) = setup(
        DeletePolicy::Hard,
        SideOptions {
            table: Some("servers".into()),
            filter: Some("ram > 10000".into()),
            ..Default::default()
        },
    )
    .await;
    let rows = backend.read(&mut conn, &side).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].keys(), &[Value::from("srv1")]);

    let mut bound = side.clone();
    bound.key = side.key.bind(&[Value::from("srv2")]);
    let rows = backend.read(&mut conn, &bound).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_update_then_insert_fallback() {
    let (backend, mut conn, side) = setup(DeletePolicy::Hard, table("servers")).await;

    let outcome = backend
        .update(&mut conn, &request(&side, "srv1", 0, Value::Int(32768)))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Success);

    // No srv3 row yet: the update falls back to an insert
    let outcome = backend
        .update(&mut conn, &request(&side, "srv3", 1, Value::from("10.0.0.3")))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Success);

    let rows = backend.read(&mut conn, &side).await.unwrap();
    assert_eq!(rows[0].values(), &[Value::Int(32768), Value::Null]);
    assert_eq!(
        rows[2],
        Row::new(vec![Value::from("srv3")], vec![Value::Null, Value::from("10.0.0.3")])
    );
}

#[tokio::test]
async fn test_delete_scopes() {
    let (backend, mut conn, side) = setup(DeletePolicy::Hard, table("servers")).await;

    let outcome = backend
        .delete(
            &mut conn,
            &request(&side, "srv2", 0, Value::Int(8192)),
            DeleteScope::Value,
        )
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Success);
    let rows = backend.read(&mut conn, &side).await.unwrap();
    assert_eq!(rows[1].values(), &[Value::Null, Value::from("10.0.0.2")]);

    let outcome = backend
        .delete(
            &mut conn,
            &request(&side, "srv2", 0, Value::Null),
            DeleteScope::Key,
        )
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Success);
    let rows = backend.read(&mut conn, &side).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_delete_of_absent_row_fails() {
    let (backend, mut conn, side) = setup(DeletePolicy::Hard, table("servers")).await;

    for scope in [DeleteScope::Key, DeleteScope::Value] {
        let outcome = backend
            .delete(&mut conn, &request(&side, "nosuch", 0, Value::Int(1)), scope)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Failure, "{scope:?}");
    }

    // A value that is no longer there is not deleted either
    let outcome = backend
        .delete(
            &mut conn,
            &request(&side, "srv1", 0, Value::Int(1)),
            DeleteScope::Value,
        )
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Failure);
    let rows = backend.read(&mut conn, &side).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].values(), &[Value::Int(16384), Value::Null]);
}

#[tokio::test]
async fn test_soft_delete_flags_row() {
    let (backend, mut conn, side) = setup(
        DeletePolicy::Soft,
        SideOptions {
            table: Some("servers".into()),
            deleted_column: Some("retired".into()),
            ..Default::default()
        },
    )
    .await;

    backend
        .delete(
            &mut conn,
            &request(&side, "srv1", 0, Value::Null),
            DeleteScope::Key,
        )
        .await
        .unwrap();
    let rows = backend.read(&mut conn, &side).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].keys(), &[Value::from("srv2")]);

    // Writing to a flagged row revives it
    backend
        .insert(&mut conn, &request(&side, "srv1", 0, Value::Int(1)))
        .await
        .unwrap();
    let rows = backend.read(&mut conn, &side).await.unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_read_only_side_refuses_writes() {
    let (backend, mut conn, side) = setup(
        DeletePolicy::Hard,
        SideOptions {
            from: Some("servers".into()),
            ..Default::default()
        },
    )
    .await;
    let outcome = backend
        .insert(&mut conn, &request(&side, "srv9", 0, Value::Int(1)))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Failure);
}

#[tokio::test]
async fn test_multi_entry_value_chain_is_an_invariant_violation() {
    let (backend, mut conn, side) = setup(DeletePolicy::Hard, table("servers")).await;
    let request = WriteRequest::new(&side, side.key.bind(&[Value::from("srv1")]), side.value.clone());
    let err = backend.update(&mut conn, &request).await.unwrap_err();
    assert!(err.is_invariant());
}
