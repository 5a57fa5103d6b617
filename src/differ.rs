//! Row matching between the two sides of a template.
//!
//! Single-valued templates match rows by key. Only the first destination
//! row of a key takes part in the value comparison; later rows with the same
//! key count as matched but are not compared.
//!
//! Multi-valued templates match rows by key and value. A source row without
//! an exact match is a value difference when the destination has the key
//! with other values, and a missing key otherwise.
//!
//! A source row whose value columns are all `NULL` and that has no
//! destination counterpart is not a difference.

use crate::report::{DiffRecord, Presence};
use std::collections::{HashMap, HashSet};
use sync_core::{Row, Value};

/// Records of one diff and whether any of them needs a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOutcome {
    pub records: Vec<DiffRecord>,
    /// A forward record exists
    pub changes_needed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Differ {
    /// Also report destination rows never matched by a source row
    pub bidirectional: bool,
}

impl Differ {
    pub fn new(bidirectional: bool) -> Self {
        Self { bidirectional }
    }

    pub fn diff_rows(
        &self,
        template: usize,
        multivalued: bool,
        source: &[Row],
        destination: &[Row],
    ) -> DiffOutcome {
        let mut matched = vec![false; destination.len()];
        let records = if multivalued {
            forward_multi(template, source, destination, &mut matched)
        } else {
            forward_single(template, source, destination, &mut matched)
        };
        let changes_needed = !records.is_empty();

        let mut records = records;
        if self.bidirectional {
            records.extend(
                destination
                    .iter()
                    .zip(&matched)
                    .filter(|(row, seen)| !**seen && !row.values_all_null())
                    .map(|(row, _)| DiffRecord::destination_only(template, row.clone())),
            );
        }
        DiffOutcome {
            records,
            changes_needed,
        }
    }
}

fn index_by<'r>(rows: &'r [Row], part: impl Fn(&'r Row) -> &'r [Value]) -> HashMap<&'r [Value], Vec<usize>> {
    let mut index: HashMap<&[Value], Vec<usize>> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        index.entry(part(row)).or_default().push(i);
    }
    index
}

fn forward_single(
    template: usize,
    source: &[Row],
    destination: &[Row],
    matched: &mut [bool],
) -> Vec<DiffRecord> {
    let by_key = index_by(destination, Row::keys);
    let mut records = Vec::new();
    for row in source {
        match by_key.get(row.keys()) {
            Some(indices) => {
                for &i in indices {
                    matched[i] = true;
                }
                let first = &destination[indices[0]];
                if first.values() != row.values() {
                    records.push(DiffRecord::forward(
                        template,
                        row.clone(),
                        Presence::ValueDiffers,
                        Some(first.clone()),
                    ));
                }
            }
            None if row.values_all_null() => {}
            None => records.push(DiffRecord::forward(template, row.clone(), Presence::Missing, None)),
        }
    }
    records
}

fn forward_multi(
    template: usize,
    source: &[Row],
    destination: &[Row],
    matched: &mut [bool],
) -> Vec<DiffRecord> {
    let by_row = index_by(destination, Row::cells);
    let keys: HashSet<&[Value]> = destination.iter().map(Row::keys).collect();
    let mut records = Vec::new();
    for row in source {
        if let Some(indices) = by_row.get(row.cells()) {
            for &i in indices {
                matched[i] = true;
            }
            continue;
        }
        if row.values_all_null() {
            continue;
        }
        let presence = if keys.contains(row.keys()) {
            Presence::ValueDiffers
        } else {
            Presence::Missing
        };
        records.push(DiffRecord::forward(template, row.clone(), presence, None));
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ChangeOutcome;

    fn row(key: &str, value: impl Into<Value>) -> Row {
        Row::new(vec![Value::from(key)], vec![value.into()])
    }

    #[test]
    fn test_single_valued_missing_and_differing() {
        let source = vec![row("srv1", 16), row("srv2", 8), row("srv3", 4)];
        let destination = vec![row("srv2", 8), row("srv3", 2)];
        let outcome = Differ::default().diff_rows(0, false, &source, &destination);

        assert!(outcome.changes_needed);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].in_destination, Presence::Missing);
        assert_eq!(outcome.records[0].key(), &[Value::from("srv1")]);
        assert_eq!(outcome.records[1].in_destination, Presence::ValueDiffers);
        assert_eq!(outcome.records[1].destination, Some(row("srv3", 2)));
        assert!(outcome
            .records
            .iter()
            .all(|r| r.outcome == ChangeOutcome::Unchanged));
    }

    #[test]
    fn test_single_valued_first_match_wins() {
        let source = vec![row("srv1", 16)];
        let destination = vec![row("srv1", 16), row("srv1", 32)];
        let outcome = Differ::new(true).diff_rows(0, false, &source, &destination);
        assert_eq!(outcome, DiffOutcome::default());
    }

    #[test]
    fn test_null_source_row_is_not_a_difference() {
        let source = vec![row("srv1", Value::Null)];
        let outcome = Differ::default().diff_rows(0, false, &source, &[]);
        assert!(outcome.records.is_empty());
        assert!(!outcome.changes_needed);
    }

    #[test]
    fn test_multi_valued_value_differs() {
        let source = vec![row("K1", "V1"), row("K1", "V2")];
        let destination = vec![row("K1", "V1")];
        let outcome = Differ::default().diff_rows(3, true, &source, &destination);

        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.template, 3);
        assert_eq!(record.source, Some(row("K1", "V2")));
        assert_eq!(record.in_destination.as_tristate(), None);
        assert_eq!(record.destination, None);
    }

    #[test]
    fn test_multi_valued_missing_key() {
        let source = vec![row("K2", "V1")];
        let destination = vec![row("K1", "V1")];
        let outcome = Differ::default().diff_rows(0, true, &source, &destination);
        assert_eq!(outcome.records[0].in_destination, Presence::Missing);
    }

    #[test]
    fn test_bidirectional_destination_only() {
        let source = vec![row("K1", "V1")];
        let destination = vec![row("K1", "V1"), row("K1", "V3"), row("K9", "V1")];

        let outcome = Differ::new(true).diff_rows(0, true, &source, &destination);
        assert!(!outcome.changes_needed);
        let extra: Vec<_> = outcome.records.iter().map(|r| r.destination.clone()).collect();
        assert_eq!(extra, vec![Some(row("K1", "V3")), Some(row("K9", "V1"))]);
        assert!(outcome.records.iter().all(DiffRecord::is_destination_only));

        let outcome = Differ::new(false).diff_rows(0, true, &source, &destination);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_diff_is_idempotent() {
        let source = vec![row("srv1", 16), row("srv2", 8)];
        let destination = vec![row("srv2", 4), row("srv9", 1)];
        let differ = Differ::new(true);
        assert_eq!(
            differ.diff_rows(0, false, &source, &destination),
            differ.diff_rows(0, false, &source, &destination)
        );
    }
}
