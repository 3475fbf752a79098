// src/dag/run_record.rs

//! Per-run task records, dispatch descriptions and the final run report.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::TaskName;
use crate::errors::{EtlDagError, Result};
use crate::events::TaskTransition;
use crate::types::{RunOutcome, TaskState};

/// Execution record of one task inside one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub state: TaskState,
    /// Attempts started so far in this run.
    pub attempts: u32,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// End of the latest attempt.
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub rows_affected: Option<u64>,
}

impl TaskRecord {
    pub fn new() -> Self {
        Self {
            state: TaskState::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            last_error: None,
            rows_affected: None,
        }
    }
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// A task the scheduler wants the executor to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub name: TaskName,
    /// All tasks of the same run share the same `run_id`.
    pub run_id: u64,
    pub logical_date: DateTime<Utc>,
    /// 1-based attempt number; echoed back on completion.
    pub attempt: u32,
    pub timeout: Option<Duration>,
}

/// A retry the IO shell must arm a timer for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub task: TaskName,
    /// The attempt that will run once the delay elapses.
    pub next_attempt: u32,
    pub delay: Duration,
}

/// Immutable summary of a finished (or still running) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: u64,
    pub logical_date: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub tasks: BTreeMap<TaskName, TaskRecord>,
    pub transitions: Vec<TaskTransition>,
}

impl RunReport {
    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.tasks.get(task).map(|r| r.state)
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Tasks in the given state, sorted by name.
    pub fn tasks_in(&self, state: TaskState) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, r)| r.state == state)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Turn a failed report into the run-level error it represents.
    pub fn into_result(self) -> Result<RunReport> {
        if self.outcome != RunOutcome::Failed {
            return Ok(self);
        }

        // First task (in transition order) to exhaust its retries.
        let exhausted = self
            .transitions
            .iter()
            .find(|t| t.to == TaskState::Exhausted)
            .map(|t| t.task.clone());

        match exhausted.and_then(|name| self.tasks.get(&name).map(|r| (name, r))) {
            Some((task, record)) => Err(EtlDagError::Exhausted {
                task,
                attempts: record.attempts,
                last_error: record.last_error.clone().unwrap_or_default(),
            }),
            None => Err(EtlDagError::Other(anyhow::anyhow!(
                "run {} for {} was cancelled",
                self.run_id,
                self.logical_date
            ))),
        }
    }
}
