// src/engine/mod.rs

//! Orchestration engine for etldag.
//!
//! This module ties together:
//! - the per-run scheduler (pure state machine, see [`crate::dag`])
//! - the per-run event loop that reacts to task completions, retry timers
//!   and cancellation requests
//! - the supervisor that turns schedule ticks into runs, bounded by
//!   `max_active_runs`
//!
//! The pure core lives in [`core`]; the async/IO shell of a run is
//! [`runtime`]; cross-run admission is [`queue`] and [`supervisor`].

use std::time::Duration;

use crate::operators::RowsAffected;

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Outcome of one task attempt as reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success(RowsAffected),
    Failed(String),
    /// The attempt ran past the task's timeout. Counts as a failure.
    TimedOut(Duration),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }

    pub fn error_message(&self) -> String {
        match self {
            TaskOutcome::Success(_) => String::new(),
            TaskOutcome::Failed(msg) => msg.clone(),
            TaskOutcome::TimedOut(limit) => {
                format!("attempt timed out after {}s", limit.as_secs_f64())
            }
        }
    }
}

/// Events flowing into a run's event loop.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// An executor finished an attempt.
    TaskCompleted {
        task: TaskName,
        attempt: u32,
        outcome: TaskOutcome,
    },
    /// A retry delay elapsed; `attempt` is the attempt about to start.
    RetryDue { task: TaskName, attempt: u32 },
    /// Cancel the run (Ctrl-C, operator request).
    CancelRequested,
}

pub mod core;
pub mod event_handlers;
pub mod queue;
pub mod runtime;
pub mod supervisor;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use queue::{Admission, RunQueue};
pub use runtime::{RunClock, Runtime};
pub use supervisor::{RunHandle, Supervisor, SupervisorEvent, SupervisorOptions};
