use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of operator a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    /// Marker task that does nothing (pipeline start / end).
    Noop,
    /// Run a SQL script against a warehouse connection.
    Sql,
    /// Copy objects from object storage into a staging table.
    StageToWarehouse,
    /// Populate a fact table from a transformation query.
    LoadFact,
    /// Populate a dimension table from a transformation query.
    LoadDimension,
    /// Row-count assertions over a list of tables.
    DataQuality,
}

impl Default for OperatorKind {
    fn default() -> Self {
        OperatorKind::Noop
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperatorKind::Noop => "noop",
            OperatorKind::Sql => "sql",
            OperatorKind::StageToWarehouse => "stage_to_warehouse",
            OperatorKind::LoadFact => "load_fact",
            OperatorKind::LoadDimension => "load_dimension",
            OperatorKind::DataQuality => "data_quality",
        };
        f.write_str(s)
    }
}

/// How a load operator treats rows already present in its target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Insert on top of whatever is already there.
    Append,
    /// Delete everything in the target first, then insert.
    TruncateInsert,
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(LoadMode::Append),
            "truncate_insert" | "delete_load" => Ok(LoadMode::TruncateInsert),
            other => Err(format!(
                "invalid load mode: {other} (expected \"append\" or \"truncate_insert\")"
            )),
        }
    }
}

/// State of one task inside one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for upstream tasks.
    Pending,
    /// All upstream tasks succeeded; waiting for a dispatch slot.
    Ready,
    /// Handed to an executor.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Last attempt failed; a retry is scheduled after the retry delay.
    Failed,
    /// Retry budget used up. Terminal.
    Exhausted,
    /// An upstream task exhausted, so this one can never run. Terminal.
    Skipped,
    /// The run was cancelled before this task finished. Terminal.
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Exhausted | TaskState::Skipped | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Exhausted => "exhausted",
            TaskState::Skipped => "skipped",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Running => "running",
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}
