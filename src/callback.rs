//! Callbacks fired around a run and after each change.
//!
//! # YAML Format
//!
//! ```yaml
//! pre_actions:
//!   - { kind: sql, statement: "UPDATE sync_state SET running = 1" }
//! post_actions:
//!   - callback: { kind: command, program: /usr/local/bin/notify, args: [done] }
//!     always: true
//! change_callbacks:
//!   - { kind: log, message: cmdb changed }
//! ```
//!
//! Callbacks receive the destination connection of the run. Failures are
//! logged and never stop the run.

use crate::config::Action;
use crate::dispatch::SyncMode;
use crate::registry::Registry;
use crate::report::ChangeOutcome;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use sync_core::{join_values, Value};
use sync_sql::{Connection, Statement};
use tracing::{info, warn};

/// Point of the run a callback fires at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreAction,
    Change,
    GlobalChange,
    PostAction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreAction => f.write_str("pre_action"),
            Self::Change => f.write_str("change"),
            Self::GlobalChange => f.write_str("global_change"),
            Self::PostAction => f.write_str("post_action"),
        }
    }
}

/// What a callback is told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEvent {
    pub stage: Stage,
    pub action: Action,
    /// Template of a change
    pub template: Option<String>,
    /// Key of the changed row
    pub key: Vec<Value>,
    pub mode: Option<SyncMode>,
    pub outcome: Option<ChangeOutcome>,
    /// Changes made so far in the run
    pub changes: usize,
    /// The run is ending on an error
    pub aborted: bool,
}

impl CallbackEvent {
    pub fn run(stage: Stage, action: Action, changes: usize) -> Self {
        Self {
            stage,
            action,
            template: None,
            key: Vec::new(),
            mode: None,
            outcome: None,
            changes,
            aborted: false,
        }
    }

    pub fn change(template: &str, key: &[Value], mode: SyncMode, outcome: ChangeOutcome) -> Self {
        Self {
            stage: Stage::Change,
            action: Action::Sync,
            template: Some(template.to_string()),
            key: key.to_vec(),
            mode: Some(mode),
            outcome: Some(outcome),
            changes: 0,
            aborted: false,
        }
    }

    /// Environment passed to command callbacks.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("SYNC_STAGE", self.stage.to_string()),
            ("SYNC_ACTION", self.action.to_string()),
            ("SYNC_CHANGES", self.changes.to_string()),
            ("SYNC_ABORTED", self.aborted.to_string()),
        ];
        if let Some(template) = &self.template {
            env.push(("SYNC_TEMPLATE", template.clone()));
            env.push(("SYNC_KEY", join_values(&self.key)));
        }
        if let Some(mode) = self.mode {
            env.push(("SYNC_MODE", mode.to_string()));
        }
        if let Some(outcome) = self.outcome {
            env.push(("SYNC_OUTCOME", outcome.to_string()));
        }
        env
    }
}

impl fmt::Display for CallbackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.stage)?;
        if let Some(template) = &self.template {
            write!(f, " {template} ({})", join_values(&self.key))?;
        }
        if let (Some(mode), Some(outcome)) = (self.mode, self.outcome) {
            write!(f, " {mode} -> {outcome}")?;
        }
        Ok(())
    }
}

/// A callback run by the engine.
#[async_trait]
pub trait ChangeCallback: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, event: &CallbackEvent, conn: &mut dyn Connection) -> anyhow::Result<()>;
}

impl fmt::Debug for dyn ChangeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A callback as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum CallbackSpec {
    /// Log the event
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Run a program with the event in `SYNC_*` environment variables
    Command {
        program: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
    /// Execute a statement on the destination database
    Sql { statement: String },
    /// A callback registered by the host program
    Named { name: String },
}

impl CallbackSpec {
    /// Resolve the callback; the error names an unregistered callback.
    pub fn build(&self, registry: &Registry) -> Result<Arc<dyn ChangeCallback>, String> {
        let callback: Arc<dyn ChangeCallback> = match self {
            Self::Log { message } => Arc::new(LogCallback {
                message: message.clone().unwrap_or_else(|| "callback".to_string()),
            }),
            Self::Command { program, args } => Arc::new(CommandCallback {
                program: program.clone(),
                args: args.clone(),
            }),
            Self::Sql { statement } => Arc::new(SqlCallback {
                statement: statement.clone(),
            }),
            Self::Named { name } => return registry.callback(name).ok_or_else(|| name.clone()),
        };
        Ok(callback)
    }
}

/// A post-action with its abnormal-exit flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostActionSpec {
    pub callback: CallbackSpec,

    /// Also run when the run ends on an error
    #[serde(default)]
    pub always: bool,
}

struct LogCallback {
    message: String,
}

#[async_trait]
impl ChangeCallback for LogCallback {
    fn name(&self) -> &str {
        "log"
    }

    async fn call(&self, event: &CallbackEvent, _conn: &mut dyn Connection) -> anyhow::Result<()> {
        info!("{}: {event}", self.message);
        Ok(())
    }
}

struct CommandCallback {
    program: String,
    args: Vec<String>,
}

#[async_trait]
impl ChangeCallback for CommandCallback {
    fn name(&self) -> &str {
        &self.program
    }

    async fn call(&self, event: &CallbackEvent, _conn: &mut dyn Connection) -> anyhow::Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .envs(event.env())
            .status()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {status}", self.program);
        }
        Ok(())
    }
}

struct SqlCallback {
    statement: String,
}

#[async_trait]
impl ChangeCallback for SqlCallback {
    fn name(&self) -> &str {
        "sql"
    }

    async fn call(&self, _event: &CallbackEvent, conn: &mut dyn Connection) -> anyhow::Result<()> {
        let statement = Statement::raw(self.statement.as_str());
        conn.execute(&statement)
            .await
            .with_context(|| format!("Callback statement failed: {}", self.statement))?;
        Ok(())
    }
}

/// Run `callbacks` in order, logging failures.
pub async fn fire(
    callbacks: &[Arc<dyn ChangeCallback>],
    event: &CallbackEvent,
    conn: &mut dyn Connection,
) {
    for callback in callbacks {
        if let Err(e) = callback.call(event, conn).await {
            warn!("Callback {} failed on {event}: {e:#}", callback.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ChangeOutcome;
    use sqlite_connection::SqliteConnection;

    #[test]
    fn test_specs_from_yaml() {
        let yaml = r#"
- { kind: log }
- { kind: command, program: notify, args: [done] }
- { kind: sql, statement: "DELETE FROM cache" }
- { kind: named, name: ticket }
"#;
        let specs: Vec<CallbackSpec> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(specs[0], CallbackSpec::Log { message: None });
        assert_eq!(
            specs[1],
            CallbackSpec::Command {
                program: "notify".into(),
                args: vec!["done".into()]
            }
        );
        assert!(specs[3].build(&Registry::default()).is_err());
        assert!(serde_yaml::from_str::<CallbackSpec>("{ kind: log, level: 3 }").is_err());
    }

    #[test]
    fn test_change_event_env() {
        let event = CallbackEvent::change(
            "servers",
            &[Value::from("srv1")],
            SyncMode::Insert,
            ChangeOutcome::Changed,
        );
        let env = event.env();
        assert!(env.contains(&("SYNC_STAGE", "change".to_string())));
        assert!(env.contains(&("SYNC_KEY", "srv1".to_string())));
        assert!(env.contains(&("SYNC_MODE", "insert".to_string())));
        assert_eq!(event.to_string(), "sync change servers (srv1) insert -> changed");
    }

    #[tokio::test]
    async fn test_sql_callback_and_failures() {
        let mut conn = SqliteConnection::memory().await.unwrap();
        conn.execute(&Statement::raw("CREATE TABLE runs (n INTEGER)"))
            .await
            .unwrap();
        let callbacks = vec![
            CallbackSpec::Sql {
                statement: "INSERT INTO nope VALUES (1)".into(),
            }
            .build(&Registry::default())
            .unwrap(),
            CallbackSpec::Sql {
                statement: "INSERT INTO runs VALUES (1)".into(),
            }
            .build(&Registry::default())
            .unwrap(),
        ];
        let event = CallbackEvent::run(Stage::PostAction, Action::Sync, 2);
        fire(&callbacks, &event, &mut conn).await;

        let rows = conn
            .fetch_all(&Statement::raw("SELECT n FROM runs"))
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![Value::Int(1)]]);
    }
}
