//! State of one run.

use crate::config::PostAction;
use crate::report::{DiffRecord, DiffReport, GroupBy};

/// Report, pending post-actions and change count of a run.
///
/// Created at the start of a run and dropped at its end.
#[derive(Debug)]
pub struct RunContext {
    pub report: DiffReport,
    pending_post_actions: Vec<PostAction>,
    changes: usize,
}

impl RunContext {
    pub fn new(group_by: GroupBy, post_actions: &[PostAction]) -> Self {
        Self {
            report: DiffReport::new(group_by),
            pending_post_actions: post_actions.to_vec(),
            changes: 0,
        }
    }

    pub fn record(&mut self, record: DiffRecord) {
        if record.outcome.is_change() {
            self.changes += 1;
        }
        self.report.push(record);
    }

    /// Records that reached the destination.
    pub fn changes(&self) -> usize {
        self.changes
    }

    /// Post-actions due now: all of them after a normal run, only the
    /// `always` ones after an aborted run.
    ///
    /// Each post-action is handed out at most once; the rest are dropped.
    pub fn take_post_actions(&mut self, aborted: bool) -> Vec<PostAction> {
        let pending = std::mem::take(&mut self.pending_post_actions);
        if aborted {
            pending.into_iter().filter(|a| a.always).collect()
        } else {
            pending
        }
    }
}
