//! End-to-end runs from a flat inventory table into the node / field schema,
//! both in in-memory SQLite.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlite_connection::SqliteConnection;
use std::sync::{Arc, Mutex};
use structured_backend::testing;
use sync_core::{DataType, Row, Value};
use sync_sql::{Connection, Statement, WriteOutcome, WriteRequest};
use template_sync::callback::{CallbackSpec, PostActionSpec};
use template_sync::config::{Action, SyncConfig, TemplateConfig, ValidatedConfig};
use template_sync::filter::{FilterMode, KeyFilter, KeyTuple, NameFilter};
use template_sync::{ExitCode, Registry, Reporter, RunSummary, Runner, SyncError};

const CONFIG: &str = r#"
source:
  backend: generic
  url: "sqlite::memory:"
destination:
  backend: structured
  url: "sqlite::memory:"
  author_uid: 1
templates:
  - name: servers
    source:
      key: [[{ kind: column, name: tag }, string]]
      value: [[{ kind: column, name: ram }, integer]]
      options: { table: inventory }
    destination:
      key: [[{ kind: node, bundle: server, id: title }, string]]
      value: [[{ kind: field, name: field_ram }, decimal]]
    transform:
      forward: [{ kind: scale, column: 1, divide: 1024, decimals: 1 }]
      reverse: [{ kind: scale, column: 1, multiply: 1024, decimals: 0 }]
  - name: addresses
    multivalued: true
    prune: true
    source:
      key: [[{ kind: column, name: tag }, string]]
      value: [[{ kind: column, name: ip }, ip]]
      options: { table: addresses }
    destination:
      key: [[{ kind: node, bundle: server, id: title }, string]]
      value: [[{ kind: field, name: field_ip }, ip]]
"#;

/// Keeps emitted reports.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl Reporter for Capture {
    async fn emit(&self, report: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(report.to_string());
        Ok(())
    }
}

struct Env {
    source: SqliteConnection,
    destination: SqliteConnection,
}

impl Env {
    async fn new() -> Self {
        let mut source = SqliteConnection::memory().await.unwrap();
        source
            .execute_batch(
                "CREATE TABLE inventory (tag TEXT PRIMARY KEY, ram INTEGER);
                 CREATE TABLE addresses (tag TEXT NOT NULL, ip TEXT NOT NULL)",
            )
            .await
            .unwrap();

        let mut destination = SqliteConnection::memory().await.unwrap();
        testing::create_schema(&mut destination).await.unwrap();
        let server = [("node", "server")];
        testing::create_field(&mut destination, "field_ram", &DataType::Decimal, 1, &server)
            .await
            .unwrap();
        testing::create_field(&mut destination, "field_ip", &DataType::Ip, -1, &server)
            .await
            .unwrap();
        Self {
            source,
            destination,
        }
    }

    async fn source_sql(&mut self, sql: &str) {
        self.source.execute_batch(sql).await.unwrap();
    }

    /// Run `config` and return its summary and emitted report.
    async fn run(&mut self, config: &ValidatedConfig) -> (Result<RunSummary, SyncError>, Option<String>) {
        run(config, &mut self.source, &mut self.destination).await
    }

    /// Run `config` with the connections swapped, as a reversed run reads
    /// from the configured destination.
    async fn run_reversed(
        &mut self,
        config: &ValidatedConfig,
    ) -> (Result<RunSummary, SyncError>, Option<String>) {
        run(config, &mut self.destination, &mut self.source).await
    }

    /// Write a destination value through the structured backend.
    async fn seed(&mut self, config: &ValidatedConfig, template: usize, tag: &str, value: Value) {
        let side = &config.templates[template].destination;
        let request = WriteRequest::new(
            side,
            side.key.bind(&[Value::from(tag)]),
            side.value.single(0, value).unwrap(),
        );
        let outcome = config
            .destination
            .backend
            .insert(&mut self.destination, &request)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Success);
    }

    async fn destination_rows(&mut self, config: &ValidatedConfig, template: usize) -> Vec<Row> {
        let mut rows = config
            .destination
            .backend
            .read(&mut self.destination, &config.templates[template].destination)
            .await
            .unwrap();
        rows.sort_by_key(|r| r.to_string());
        rows
    }
}

async fn run(
    config: &ValidatedConfig,
    source: &mut SqliteConnection,
    destination: &mut SqliteConnection,
) -> (Result<RunSummary, SyncError>, Option<String>) {
    let capture = Capture::default();
    let reporters: Vec<Box<dyn Reporter>> = vec![Box::new(capture.clone())];
    let result = Runner::new(config).run(source, destination, &reporters).await;
    let reports = capture.0.lock().unwrap().clone();
    assert!(reports.len() <= 1);
    (result, reports.into_iter().next())
}

fn config(action: Action, edit: impl FnOnce(&mut SyncConfig)) -> ValidatedConfig {
    let mut config = SyncConfig::from_yaml(CONFIG).unwrap();
    config.action = action;
    edit(&mut config);
    config.validate(&Registry::default()).unwrap()
}

fn gigabytes(tenths: i64) -> Value {
    Value::Decimal(Decimal::new(tenths, 1))
}

#[tokio::test]
async fn test_sync_inserts_scaled_value_then_diff_is_clean() {
    let mut env = Env::new().await;
    env.source_sql("INSERT INTO inventory (tag, ram) VALUES ('srv1', 16384)")
        .await;

    let sync = config(Action::Sync, |_| {});
    let (result, report) = env.run(&sync).await;
    let summary = result.unwrap();
    assert_eq!(summary, RunSummary { records: 1, changes: 1 });
    let report = report.unwrap();
    assert!(report.contains("(srv1): source present [16], destination missing -> changed"));

    let rows = env.destination_rows(&sync, 0).await;
    assert_eq!(rows, vec![Row::new(vec![Value::from("srv1")], vec![gigabytes(160)])]);

    let diff = config(Action::Diff, |_| {});
    let (result, report) = env.run(&diff).await;
    assert_eq!(result.unwrap(), RunSummary::default());
    assert_eq!(report, None);
}

#[tokio::test]
async fn test_update_of_changed_value() {
    let mut env = Env::new().await;
    env.source_sql("INSERT INTO inventory (tag, ram) VALUES ('srv1', 32768)")
        .await;
    let sync = config(Action::Sync, |_| {});
    env.seed(&sync, 0, "srv1", gigabytes(160)).await;

    let (result, report) = env.run(&sync).await;
    assert_eq!(result.unwrap().changes, 1);
    assert!(report
        .unwrap()
        .contains("source present [32], destination value differs [16] -> changed"));
    assert_eq!(env.destination_rows(&sync, 0).await[0].values(), &[gigabytes(320)]);
}

#[tokio::test]
async fn test_bidir_reports_but_never_deletes_destination_only_rows() {
    let mut env = Env::new().await;
    let diff = config(Action::Diff, |c| c.bidir = true);
    env.seed(&diff, 0, "srv9", gigabytes(40)).await;

    let (result, report) = env.run(&diff).await;
    assert_eq!(result.unwrap().records, 1);
    assert!(report
        .unwrap()
        .contains("(srv9): source missing, destination present [4] -> unchanged"));

    let sync = config(Action::Sync, |c| c.bidir = true);
    let (result, _) = env.run(&sync).await;
    assert_eq!(result.unwrap().changes, 0);
    let rows = env.destination_rows(&sync, 0).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].keys(), &[Value::from("srv9")]);
}

#[tokio::test]
async fn test_diff_is_idempotent_and_read_only() {
    let mut env = Env::new().await;
    env.source_sql(
        "INSERT INTO inventory (tag, ram) VALUES ('srv1', 16384);
         INSERT INTO inventory (tag, ram) VALUES ('srv2', 8192)",
    )
    .await;
    let diff = config(Action::Diff, |c| c.bidir = true);
    env.seed(&diff, 0, "srv2", gigabytes(40)).await;

    let (first, first_report) = env.run(&diff).await;
    let (second, second_report) = env.run(&diff).await;
    assert_eq!(first.unwrap(), second.unwrap());
    assert!(first_report.is_some());
    assert_eq!(first_report, second_report);
    assert_eq!(env.destination_rows(&diff, 0).await.len(), 1);
}

#[tokio::test]
async fn test_multivalued_value_differs_and_prune() {
    let mut env = Env::new().await;
    env.source_sql(
        "INSERT INTO addresses (tag, ip) VALUES ('srv1', '10.0.0.1');
         INSERT INTO addresses (tag, ip) VALUES ('srv1', '10.0.0.2')",
    )
    .await;
    let diff = config(Action::Diff, |_| {});
    env.seed(&diff, 1, "srv1", Value::from("10.0.0.1")).await;
    env.seed(&diff, 1, "srv1", Value::from("10.0.0.3")).await;

    let (result, report) = env.run(&diff).await;
    assert_eq!(result.unwrap().records, 1);
    assert!(report
        .unwrap()
        .contains("(srv1): source present [10.0.0.2], destination value differs -> unchanged"));

    let sync = config(Action::Sync, |_| {});
    let (result, _) = env.run(&sync).await;
    assert_eq!(result.unwrap().changes, 2);
    let ips: Vec<Value> = env
        .destination_rows(&sync, 1)
        .await
        .iter()
        .map(|r| r.values()[0].clone())
        .collect();
    assert_eq!(ips, vec![Value::from("10.0.0.1"), Value::from("10.0.0.2")]);
}

#[tokio::test]
async fn test_exclude_wins_over_include() {
    let mut env = Env::new().await;
    env.source_sql(
        "INSERT INTO inventory (tag, ram) VALUES ('srv1', 16384);
         INSERT INTO inventory (tag, ram) VALUES ('srv2', 8192)",
    )
    .await;
    let sync = config(Action::Sync, |c| {
        c.key_filter = Some(KeyFilter::new(
            FilterMode::Include,
            vec![KeyTuple::parse("srv1"), KeyTuple::parse("srv2")],
        ));
        c.templates[0].keys = Some(KeyFilter::new(FilterMode::Exclude, vec![KeyTuple::parse("srv1")]));
    });

    let (result, _) = env.run(&sync).await;
    assert_eq!(result.unwrap().changes, 1);
    let rows = env.destination_rows(&sync, 0).await;
    assert_eq!(rows, vec![Row::new(vec![Value::from("srv2")], vec![gigabytes(80)])]);
}

#[tokio::test]
async fn test_template_filter_skips_reads() {
    let mut env = Env::new().await;
    env.source_sql("DROP TABLE addresses").await;
    let diff = config(Action::Diff, |c| {
        c.template_filter = Some(NameFilter::new(
            FilterMode::Exclude,
            vec!["addresses".into()],
        ));
    });
    let (result, _) = env.run(&diff).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_read_failure_runs_only_always_post_actions() {
    let mut env = Env::new().await;
    env.source_sql("DROP TABLE inventory").await;
    env.destination
        .execute(&Statement::raw("CREATE TABLE audit (event TEXT)"))
        .await
        .unwrap();
    let post_action = |event: &str, always: bool| PostActionSpec {
        callback: CallbackSpec::Sql {
            statement: format!("INSERT INTO audit (event) VALUES ('{event}')"),
        },
        always,
    };
    let diff = config(Action::Diff, |c| {
        c.post_actions = vec![post_action("always", true), post_action("normal", false)];
    });

    let (result, _) = env.run(&diff).await;
    let err = result.unwrap_err();
    assert!(matches!(&err, SyncError::Read { template, .. } if template == "servers"));
    assert_eq!(err.exit_code(), ExitCode::Backend);

    let events = env
        .destination
        .fetch_all(&Statement::raw("SELECT event FROM audit"))
        .await
        .unwrap();
    assert_eq!(events, vec![vec![Value::from("always")]]);
}

#[tokio::test]
async fn test_reverse_writes_back_to_the_inventory() {
    let mut env = Env::new().await;
    let sync = config(Action::Sync, |c| c.reverse = true);
    env.seed(&sync, 0, "srv1", gigabytes(160)).await;

    let (result, _) = env.run_reversed(&sync).await;
    assert_eq!(result.unwrap().changes, 1);

    let rows = env
        .source
        .fetch_all(&Statement::raw("SELECT tag, ram FROM inventory"))
        .await
        .unwrap();
    assert_eq!(rows, vec![vec![Value::from("srv1"), Value::Int(16384)]]);
}

const SPECS: &str = r#"
name: specs
source:
  key: [[{ kind: column, name: tag }, string]]
  value:
    - [{ kind: column, name: os }, "term:os"]
    - [{ kind: column, name: cores }, integer]
  options: { table: specs }
destination:
  key: [[{ kind: node, bundle: server, id: title }, string]]
  value:
    - [{ kind: field, name: field_os }, "term:os"]
    - [{ kind: field, name: field_cores }, integer]
change_callbacks:
  - { kind: sql, statement: "INSERT INTO change_log (origin) VALUES ('template')" }
"#;

#[tokio::test]
async fn test_partial_change_fires_callbacks_in_order() {
    let mut env = Env::new().await;
    env.source_sql(
        "CREATE TABLE specs (tag TEXT PRIMARY KEY, os TEXT, cores INTEGER);
         INSERT INTO specs (tag, os, cores) VALUES ('srv1', 'solaris', 8);
         INSERT INTO specs (tag, os, cores) VALUES ('srv2', 'solaris', NULL)",
    )
    .await;
    let server = [("node", "server")];
    testing::create_vocabulary(&mut env.destination, "os", &["linux"])
        .await
        .unwrap();
    testing::create_field(
        &mut env.destination,
        "field_os",
        &DataType::Term {
            vocabulary: "os".into(),
        },
        1,
        &server,
    )
    .await
    .unwrap();
    testing::create_field(&mut env.destination, "field_cores", &DataType::Integer, 1, &server)
        .await
        .unwrap();
    env.destination
        .execute(&Statement::raw(
            "CREATE TABLE change_log (seq INTEGER PRIMARY KEY AUTOINCREMENT, origin TEXT)",
        ))
        .await
        .unwrap();

    let sync = config(Action::Sync, |c| {
        c.templates.push(serde_yaml::from_str::<TemplateConfig>(SPECS).unwrap());
        c.template_filter = Some(NameFilter::new(FilterMode::Include, vec!["specs".into()]));
        c.destination.change_callbacks = vec![CallbackSpec::Sql {
            statement: "INSERT INTO change_log (origin) VALUES ('database')".into(),
        }];
    });
    // srv2 exists, so its only write (an unknown term) creates nothing
    env.seed(&sync, 0, "srv2", gigabytes(40)).await;

    let (result, report) = env.run(&sync).await;
    assert_eq!(result.unwrap(), RunSummary { records: 2, changes: 1 });
    let report = report.unwrap();
    assert!(report.contains("Diff report: 2 records, 0 changed, 1 partially changed"));
    assert!(report.contains(
        "(srv1): source present [solaris, 8], destination missing \
         -> partially changed - action may be needed"
    ));
    assert!(report.contains("(srv2): source present [solaris, NULL], destination missing -> unchanged"));

    // Database callbacks before template callbacks, nothing for the failed srv2
    let log = env
        .destination
        .fetch_all(&Statement::raw("SELECT origin FROM change_log ORDER BY seq"))
        .await
        .unwrap();
    assert_eq!(
        log,
        vec![vec![Value::from("database")], vec![Value::from("template")]]
    );
}
