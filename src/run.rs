//! The run orchestrator.
//!
//! A run goes through
//!
//! ```text
//! pre-actions -> for each template { read -> transform -> filter -> group -> diff/sync }
//!             -> global change callbacks -> post-actions -> report
//! ```
//!
//! Templates run in declared order so that later templates see the entities
//! created by earlier ones. A failed read ends the template loop; post-actions
//! flagged `always` and the report still run.

use crate::callback::{fire, CallbackEvent, Stage};
use crate::config::{Action, ConfigError, Database, Template, ValidatedConfig};
use crate::context::RunContext;
use crate::differ::Differ;
use crate::dispatch::Dispatcher;
use crate::error::SyncError;
use crate::filter::KeyFilters;
use crate::report::{DiffRecord, Reporter};
use std::collections::HashMap;
use sync_core::{Row, TemplateSide, Value};
use sync_sql::{Connection, DeleteScope};
use tracing::{debug, error, info, warn};

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records: usize,
    pub changes: usize,
}

/// Source and destination rows of one key, in first-seen key order.
type Group = (Vec<Row>, Vec<Row>);

fn group_by_key(source: Vec<Row>, destination: Vec<Row>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
    for (is_source, rows) in [(true, source), (false, destination)] {
        for row in rows {
            let i = *index.entry(row.keys().to_vec()).or_insert_with(|| {
                groups.push(Group::default());
                groups.len() - 1
            });
            if is_source {
                groups[i].0.push(row);
            } else {
                groups[i].1.push(row);
            }
        }
    }
    groups
}

/// Runs a validated configuration, resolving `reverse` once.
pub struct Runner<'a> {
    config: &'a ValidatedConfig,
    source: &'a Database,
    destination: &'a Database,
    templates: Vec<Template>,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a ValidatedConfig) -> Self {
        if config.reverse {
            Self {
                config,
                source: &config.destination,
                destination: &config.source,
                templates: config.templates.iter().map(Template::reversed).collect(),
            }
        } else {
            Self {
                config,
                source: &config.source,
                destination: &config.destination,
                templates: config.templates.clone(),
            }
        }
    }

    /// The database rows are read from and compared against.
    pub fn source(&self) -> &Database {
        self.source
    }

    /// The database changes are written to.
    pub fn destination(&self) -> &Database {
        self.destination
    }

    pub async fn run(
        &self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
        reporters: &[Box<dyn Reporter>],
    ) -> Result<RunSummary, SyncError> {
        let action = self.config.action;
        let mut ctx = RunContext::new(self.config.report.group_by, &self.config.post_actions);
        info!(
            "Starting {action} of {} templates from {} to {}",
            self.templates.len(),
            self.source.config.redacted_url(),
            self.destination.config.redacted_url()
        );

        let event = CallbackEvent::run(Stage::PreAction, action, 0);
        fire(&self.config.pre_actions, &event, destination).await;

        let result = self.templates(&mut ctx, source, destination).await;
        if let Err(e) = &result {
            error!("Run aborted: {e}");
        }

        if ctx.changes() > 0 {
            let event = CallbackEvent::run(Stage::GlobalChange, action, ctx.changes());
            fire(&self.config.change_callbacks, &event, destination).await;
        }

        let mut event = CallbackEvent::run(Stage::PostAction, action, ctx.changes());
        event.aborted = result.is_err();
        for post_action in ctx.take_post_actions(event.aborted) {
            fire(std::slice::from_ref(&post_action.callback), &event, destination).await;
        }

        if !ctx.report.is_empty() {
            let names: Vec<String> = self.templates.iter().map(|t| t.name.clone()).collect();
            let rendered = ctx.report.render(&names);
            for reporter in reporters {
                if let Err(e) = reporter.emit(&rendered).await {
                    error!("Failed to emit report: {e:#}");
                }
            }
        }

        result?;
        let summary = RunSummary {
            records: ctx.report.len(),
            changes: ctx.changes(),
        };
        info!(
            "Finished {action}: {} differences, {} changes",
            summary.records, summary.changes
        );
        Ok(summary)
    }

    async fn templates(
        &self,
        ctx: &mut RunContext,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
    ) -> Result<(), SyncError> {
        let dispatcher = Dispatcher::new(self.destination);
        for (index, template) in self.templates.iter().enumerate() {
            if let Some(filter) = &self.config.template_filter {
                if !filter.allows(&template.name) {
                    debug!("Skipping template {}", template.name);
                    continue;
                }
            }
            info!("Processing template {}", template.name);

            let source_rows = self.read(self.source, source, template, &template.source).await?;
            let destination_rows = self
                .read(self.destination, destination, template, &template.destination)
                .await?;
            let source_rows = self.transform(template, source_rows)?;

            let filters = KeyFilters {
                global: self.config.key_filter.as_ref(),
                template: template.keys.as_ref(),
            };
            let keep = |rows: Vec<Row>| -> Vec<Row> {
                rows.into_iter().filter(|r| filters.allows(r.keys())).collect()
            };
            let source_rows = keep(source_rows);
            let destination_rows = keep(destination_rows);

            if template.multivalued {
                for (source_group, destination_group) in group_by_key(source_rows, destination_rows) {
                    let prune = template.prune
                        && self.config.action == Action::Sync
                        && !source_group.is_empty();
                    let differ = Differ::new(self.config.bidir || prune);
                    let outcome = differ.diff_rows(index, true, &source_group, &destination_group);
                    self.apply(ctx, &dispatcher, destination, template, outcome.records, prune)
                        .await?;
                }
            } else {
                let differ = Differ::new(self.config.bidir);
                let outcome = differ.diff_rows(index, false, &source_rows, &destination_rows);
                self.apply(ctx, &dispatcher, destination, template, outcome.records, false)
                    .await?;
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        database: &Database,
        conn: &mut dyn Connection,
        template: &Template,
        side: &TemplateSide,
    ) -> Result<Vec<Row>, SyncError> {
        let rows = database
            .backend
            .read(conn, side)
            .await
            .map_err(|source| SyncError::Read {
                template: template.name.clone(),
                role: database.role,
                source,
            })?;
        debug!("Read {} {} rows of {}", rows.len(), database.role, template.name);
        Ok(rows)
    }

    /// Transform source rows and normalize them by the destination types.
    fn transform(&self, template: &Template, rows: Vec<Row>) -> Result<Vec<Row>, SyncError> {
        let key_len = template.destination.key.len();
        let width = template.destination.width();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let row = match template.forward.apply(row) {
                Ok(Some(row)) => row,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping {} row: {e}", template.name);
                    continue;
                }
            };
            if template.custom_transforms && (row.key_len() != key_len || row.len() != width) {
                return Err(ConfigError::Shape {
                    template: template.name.clone(),
                    message: format!(
                        "transformed row {row} does not have {key_len} key and {} value columns",
                        width - key_len
                    ),
                }
                .into());
            }
            let (mut cells, values) = row.into_parts();
            cells.extend(values);
            match template.destination.normalize_row(cells) {
                Ok(row) => out.push(row),
                Err(e) => warn!("Skipping {} row: {e}", template.name),
            }
        }
        Ok(out)
    }

    /// Record diff records, writing them first when syncing.
    ///
    /// Destination-only records are deleted when `prune` is set and never
    /// otherwise. Deletes run before inserts and updates.
    async fn apply(
        &self,
        ctx: &mut RunContext,
        dispatcher: &Dispatcher<'_>,
        conn: &mut dyn Connection,
        template: &Template,
        records: Vec<DiffRecord>,
        prune: bool,
    ) -> Result<(), SyncError> {
        let sync = self.config.action == Action::Sync;
        let (deletes, forward): (Vec<_>, Vec<_>) =
            records.into_iter().partition(DiffRecord::is_destination_only);
        for mut record in deletes {
            if prune {
                record.outcome = dispatcher
                    .sync(conn, template, template.delete_scope, None, record.destination.as_ref())
                    .await?;
            }
            ctx.record(record);
        }
        for mut record in forward {
            if sync {
                record.outcome = dispatcher
                    .sync(
                        conn,
                        template,
                        DeleteScope::Value,
                        record.source.as_ref(),
                        record.destination.as_ref(),
                    )
                    .await?;
            }
            ctx.record(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: &str) -> Row {
        Row::new(vec![Value::from(key)], vec![Value::from(value)])
    }

    #[test]
    fn test_group_by_key_keeps_first_seen_order() {
        let groups = group_by_key(
            vec![row("K2", "a"), row("K1", "b"), row("K2", "c")],
            vec![row("K3", "d"), row("K1", "e")],
        );
        let keys: Vec<String> = groups
            .iter()
            .map(|(s, d)| s.first().or(d.first()).map(|r| r.keys()[0].to_string()).unwrap_or_default())
            .collect();
        assert_eq!(keys, vec!["K2", "K1", "K3"]);
        assert_eq!(groups[0].0.len(), 2);
        assert_eq!(groups[1].1, vec![row("K1", "e")]);
        assert!(groups[2].0.is_empty());
    }
}
