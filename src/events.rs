// src/events.rs

//! Structured events for task state transitions and run outcomes.
//!
//! Every event is logged on the `etldag::events` target with its fields as
//! `tracing` key/values, so a subscriber can route them to alerting without
//! parsing messages. The same values are kept in the run report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::TaskName;
use crate::types::{RunOutcome, TaskState};

/// One state change of one task inside one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskTransition {
    pub run_id: u64,
    pub logical_date: DateTime<Utc>,
    pub task: TaskName,
    pub from: TaskState,
    pub to: TaskState,
    pub attempt: u32,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskTransition {
    pub fn emit(&self) {
        match self.to {
            TaskState::Failed | TaskState::Exhausted => warn!(
                target: "etldag::events",
                event = "task_state",
                run_id = self.run_id,
                logical_date = %self.logical_date,
                task = %self.task,
                from = %self.from,
                to = %self.to,
                attempt = self.attempt,
                error = self.error.as_deref().unwrap_or(""),
                "task state changed"
            ),
            _ => info!(
                target: "etldag::events",
                event = "task_state",
                run_id = self.run_id,
                logical_date = %self.logical_date,
                task = %self.task,
                from = %self.from,
                to = %self.to,
                attempt = self.attempt,
                "task state changed"
            ),
        }
    }
}

/// Emit the final outcome of a run.
pub fn emit_run_finished(
    run_id: u64,
    logical_date: DateTime<Utc>,
    outcome: RunOutcome,
    cancelled: bool,
) {
    match outcome {
        RunOutcome::Succeeded => info!(
            target: "etldag::events",
            event = "run_finished",
            run_id,
            logical_date = %logical_date,
            outcome = %outcome,
            "run finished"
        ),
        _ => warn!(
            target: "etldag::events",
            event = "run_finished",
            run_id,
            logical_date = %logical_date,
            outcome = %outcome,
            cancelled,
            "run finished"
        ),
    }
}
