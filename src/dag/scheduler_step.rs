// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::run_record::{RetryRequest, ScheduledTask};
use crate::engine::TaskName;

/// Structured result of a single scheduler "step".
///
/// The async runtime turns this into executor dispatches, retry timers and
/// aborts; tests use it to step a run by hand.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks moved to `Running` in this step; dispatch them now.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Failed attempts that get another try after a delay.
    pub retries: Vec<RetryRequest>,
    /// Tasks that exhausted their retries in this step.
    pub newly_exhausted: Vec<TaskName>,
    /// Tasks skipped because an upstream task exhausted.
    pub newly_skipped: Vec<TaskName>,
    /// Tasks cancelled in this step.
    pub newly_cancelled: Vec<TaskName>,
    /// Cancelled tasks that still have an attempt in flight.
    pub to_abort: Vec<TaskName>,
    /// Whether this step brought every task to a terminal state.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub fn is_empty(&self) -> bool {
        self.newly_scheduled.is_empty()
            && self.retries.is_empty()
            && self.newly_exhausted.is_empty()
            && self.newly_skipped.is_empty()
            && self.newly_cancelled.is_empty()
            && self.to_abort.is_empty()
            && !self.run_just_finished
    }
}
