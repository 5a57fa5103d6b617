//! Configuration file loading and validation.
//!
//! A run is described by one YAML file:
//!
//! ```yaml
//! action: diff
//! delete_policy: soft
//! report: { group_by: template, output: /var/log/sync-report.txt }
//! source:
//!   backend: generic
//!   url: mysql://inventory@db1/inventory
//! destination:
//!   backend: structured
//!   url: mysql://sync@cmdb/drupal
//!   author_uid: 1
//! templates:
//!   - name: servers
//!     ...
//! ```
//!
//! [`SyncConfig::validate`] checks every template side against its backend
//! and resolves transforms and callbacks before any database is contacted.

mod database;
mod template;

pub use database::{Database, DatabaseConfig};
pub use template::{SideConfig, Template, TemplateConfig, TransformConfig};

use crate::callback::{CallbackSpec, ChangeCallback, PostActionSpec};
use crate::filter::{KeyFilter, NameFilter};
use crate::registry::Registry;
use crate::report::ReportConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_sql::{BackendError, DeletePolicy};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Template '{template}', {role} side: {source}")]
    Side {
        template: String,
        role: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Template '{template}': {message}")]
    Shape { template: String, message: String },

    #[error("Duplicate template name '{0}'")]
    DuplicateTemplate(String),

    #[error("Template '{template}': unknown transform '{name}'")]
    UnknownTransform { template: String, name: String },

    #[error("Unknown callback '{0}'")]
    UnknownCallback(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Whether a run only reports differences or also writes them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Diff,
    Sync,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Diff => f.write_str("diff"),
            Self::Sync => f.write_str("sync"),
        }
    }
}

/// The configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub action: Action,

    /// Swap source and destination for the whole run
    #[serde(default)]
    pub reverse: bool,

    /// Also report destination rows the source does not have
    #[serde(default)]
    pub bidir: bool,

    #[serde(default)]
    pub delete_policy: DeletePolicy,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_filter: Option<NameFilter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_filter: Option<KeyFilter>,

    pub source: DatabaseConfig,
    pub destination: DatabaseConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_actions: Vec<CallbackSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_actions: Vec<PostActionSpec>,

    /// Fired once at the end of a run that changed anything
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change_callbacks: Vec<CallbackSpec>,

    pub templates: Vec<TemplateConfig>,
}

impl SyncConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Render as YAML with database passwords masked.
    pub fn to_redacted_yaml(&self) -> Result<String, ConfigError> {
        let mut config = self.clone();
        config.source.url = config.source.redacted_url();
        config.destination.url = config.destination.redacted_url();
        Ok(serde_yaml::to_string(&config)?)
    }

    pub fn validate(&self, registry: &Registry) -> Result<ValidatedConfig, ConfigError> {
        let source = self.source.validate("source", self.delete_policy, registry)?;
        let destination = self
            .destination
            .validate("destination", self.delete_policy, registry)?;

        let mut names = HashSet::new();
        let mut templates = Vec::with_capacity(self.templates.len());
        for template in &self.templates {
            if !names.insert(template.name.as_str()) {
                return Err(ConfigError::DuplicateTemplate(template.name.clone()));
            }
            templates.push(template.validate(
                source.backend.as_ref(),
                destination.backend.as_ref(),
                registry,
            )?);
        }
        if let Some(filter) = &self.template_filter {
            for name in filter.names.iter().filter(|n| !names.contains(n.as_str())) {
                warn!("Template filter names unknown template '{name}'");
            }
        }

        let post_actions = self
            .post_actions
            .iter()
            .map(|spec| -> Result<PostAction, ConfigError> {
                Ok(PostAction {
                    callback: spec.callback.build(registry).map_err(ConfigError::UnknownCallback)?,
                    always: spec.always,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ValidatedConfig {
            action: self.action,
            reverse: self.reverse,
            bidir: self.bidir,
            report: self.report.clone(),
            template_filter: self.template_filter.clone(),
            key_filter: self.key_filter.clone(),
            source,
            destination,
            pre_actions: build_callbacks(&self.pre_actions, registry)?,
            post_actions,
            change_callbacks: build_callbacks(&self.change_callbacks, registry)?,
            templates,
        })
    }
}

fn build_callbacks(
    specs: &[CallbackSpec],
    registry: &Registry,
) -> Result<Vec<Arc<dyn ChangeCallback>>, ConfigError> {
    specs
        .iter()
        .map(|spec| spec.build(registry).map_err(ConfigError::UnknownCallback))
        .collect()
}

/// A resolved post-action.
#[derive(Clone)]
pub struct PostAction {
    pub callback: Arc<dyn ChangeCallback>,
    /// Also run when the run ends on an error
    pub always: bool,
}

impl fmt::Debug for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostAction")
            .field("callback", &self.callback.name())
            .field("always", &self.always)
            .finish()
    }
}

/// A configuration checked against its backends, ready to run.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub action: Action,
    pub reverse: bool,
    pub bidir: bool,
    pub report: ReportConfig,
    pub template_filter: Option<NameFilter>,
    pub key_filter: Option<KeyFilter>,
    pub source: Database,
    pub destination: Database,
    pub pre_actions: Vec<Arc<dyn ChangeCallback>>,
    pub post_actions: Vec<PostAction>,
    pub change_callbacks: Vec<Arc<dyn ChangeCallback>>,
    pub templates: Vec<Template>,
}
