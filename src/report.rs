//! Diff records, the run-scoped diff report and report emission.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use sync_core::{Row, Value};
use tracing::info;

/// Presence of a row on one side of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Key (and value, for multi-valued templates) found
    Matched,
    /// Key not found
    Missing,
    /// Key found, value not
    ValueDiffers,
}

impl Presence {
    /// Tri-state form: `Some(true)` matched, `Some(false)` missing, `None`
    /// value differs.
    pub fn as_tristate(self) -> Option<bool> {
        match self {
            Self::Matched => Some(true),
            Self::Missing => Some(false),
            Self::ValueDiffers => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Matched => "present",
            Self::Missing => "missing",
            Self::ValueDiffers => "value differs",
        }
    }
}

/// What a sync did for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Changed,
    /// Some columns were written, others failed
    PartiallyChanged,
    /// Nothing was written: diff mode, skipped or failed
    Unchanged,
}

impl ChangeOutcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::Changed => "changed",
            Self::PartiallyChanged => "partially changed - action may be needed",
            Self::Unchanged => "unchanged",
        }
    }

    /// Whether anything reached the destination.
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for ChangeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One difference between the two sides of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    /// Index of the template in the configuration
    pub template: usize,
    pub in_source: Presence,
    pub source: Option<Row>,
    pub in_destination: Presence,
    pub destination: Option<Row>,
    pub outcome: ChangeOutcome,
}

impl DiffRecord {
    /// Source row with no usable destination counterpart.
    pub fn forward(template: usize, source: Row, in_destination: Presence, destination: Option<Row>) -> Self {
        Self {
            template,
            in_source: Presence::Matched,
            source: Some(source),
            in_destination,
            destination,
            outcome: ChangeOutcome::Unchanged,
        }
    }

    /// Destination row without a source counterpart.
    pub fn destination_only(template: usize, destination: Row) -> Self {
        Self {
            template,
            in_source: Presence::Missing,
            source: None,
            in_destination: Presence::Matched,
            destination: Some(destination),
            outcome: ChangeOutcome::Unchanged,
        }
    }

    pub fn is_destination_only(&self) -> bool {
        self.source.is_none()
    }

    pub fn key(&self) -> &[Value] {
        match self.source.as_ref().or(self.destination.as_ref()) {
            Some(row) => row.keys(),
            None => &[],
        }
    }
}

/// How the report groups its records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Template,
    Key,
}

/// Report section of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    #[serde(default)]
    pub group_by: GroupBy,

    /// File the rendered report is written to, in addition to the log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Template(usize),
    Key(Vec<Value>),
}

/// Insertion-ordered diff records of one run.
#[derive(Debug, Clone)]
pub struct DiffReport {
    group_by: GroupBy,
    groups: Vec<(GroupKey, Vec<DiffRecord>)>,
    index: HashMap<GroupKey, usize>,
}

impl DiffReport {
    pub fn new(group_by: GroupBy) -> Self {
        Self {
            group_by,
            groups: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn push(&mut self, record: DiffRecord) {
        let key = match self.group_by {
            GroupBy::Template => GroupKey::Template(record.template),
            GroupBy::Key => GroupKey::Key(record.key().to_vec()),
        };
        match self.index.get(&key) {
            Some(&i) => self.groups[i].1.push(record),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, vec![record]));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, records)| records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Records in group order.
    pub fn records(&self) -> impl Iterator<Item = &DiffRecord> {
        self.groups.iter().flat_map(|(_, records)| records.iter())
    }

    fn count(&self, outcome: ChangeOutcome) -> usize {
        self.records().filter(|r| r.outcome == outcome).count()
    }

    /// Render the report, naming templates by `names[record.template]`.
    pub fn render(&self, names: &[String]) -> String {
        let name = |i: usize| names.get(i).map_or("?", String::as_str);
        let mut out = format!(
            "Diff report: {} records, {} changed, {} partially changed\n",
            self.len(),
            self.count(ChangeOutcome::Changed),
            self.count(ChangeOutcome::PartiallyChanged),
        );
        for (key, records) in &self.groups {
            match key {
                GroupKey::Template(t) => out.push_str(&format!("template {}:\n", name(*t))),
                GroupKey::Key(k) => out.push_str(&format!("key ({}):\n", display_values(k))),
            }
            for record in records {
                let subject = match key {
                    GroupKey::Template(_) => format!("({})", display_values(record.key())),
                    GroupKey::Key(_) => name(record.template).to_string(),
                };
                out.push_str(&format!(
                    "  {subject}: source {}{}, destination {}{} -> {}\n",
                    record.in_source.label(),
                    values(record.source.as_ref()),
                    record.in_destination.label(),
                    values(record.destination.as_ref()),
                    record.outcome,
                ));
            }
        }
        out
    }
}

fn values(row: Option<&Row>) -> String {
    match row {
        Some(row) if !row.values().is_empty() => format!(" [{}]", display_values(row.values())),
        _ => String::new(),
    }
}

/// Equal decimals render the same whatever their scale.
fn display_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|value| match value {
            Value::Decimal(d) => d.normalize().to_string(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Channel a rendered report is emitted through.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn emit(&self, report: &str) -> anyhow::Result<()>;
}

/// Emits the report as `info` log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn emit(&self, report: &str) -> anyhow::Result<()> {
        for line in report.lines() {
            info!("{line}");
        }
        Ok(())
    }
}

/// Writes the report to a file, replacing previous content.
#[derive(Debug, Clone)]
pub struct FileReporter {
    path: PathBuf,
}

impl FileReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Reporter for FileReporter {
    async fn emit(&self, report: &str) -> anyhow::Result<()> {
        tokio::fs::write(&self.path, report)
            .await
            .with_context(|| format!("Failed to write report to {}", self.path.display()))?;
        info!("Report written to {}", self.path.display());
        Ok(())
    }
}
