// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`graph`] holds the immutable, validated graph of tasks.
//! - [`task`] defines task specs and their retry / default settings.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which tasks are ready to run, retried, exhausted or skipped.
//! - [`run_record`] holds per-run records and the run report.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod run_record;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task;

pub use graph::{DagGraph, TaskId};
pub use run_record::{RetryRequest, RunReport, ScheduledTask, TaskRecord};
pub use scheduler::{Scheduler, SchedulerOptions};
pub use scheduler_step::SchedulerStep;
pub use state_manager::StateManager;
pub use task::{RetryPolicy, TaskDefaults, TaskOverrides, TaskParams, TaskSpec};
