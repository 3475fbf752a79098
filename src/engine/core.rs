// src/engine/core.rs

//! Pure core runtime state machine for one run.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RunEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from the run's channel
//! - sending `ScheduledTask`s to the executor
//! - arming retry timers and aborting cancelled attempts
//!
//! The core is intended to be unit tested without any Tokio, channels or
//! executors.

use chrono::{DateTime, Utc};

use crate::dag::{RunReport, Scheduler};
use crate::engine::RunEvent;
use crate::engine::event_handlers::{
    CoreStep, commands_from_step, handle_cancel, handle_retry_due, handle_task_completion,
};
use crate::types::RunOutcome;

/// Pure core runtime state: the scheduler of exactly one run.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn run_id(&self) -> u64 {
        self.scheduler.run_id()
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    pub fn outcome(&self) -> RunOutcome {
        self.scheduler.outcome()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn report(&self) -> RunReport {
        self.scheduler.report()
    }

    /// Seed the run with its root tasks.
    pub fn start(&mut self, now: DateTime<Utc>) -> CoreStep {
        let step = self.scheduler.start(now);
        commands_from_step(step)
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RunEvent, now: DateTime<Utc>) -> CoreStep {
        match event {
            RunEvent::TaskCompleted {
                task,
                attempt,
                outcome,
            } => handle_task_completion(&mut self.scheduler, task, attempt, outcome, now),
            RunEvent::RetryDue { task, attempt } => {
                handle_retry_due(&mut self.scheduler, task, attempt, now)
            }
            RunEvent::CancelRequested => handle_cancel(&mut self.scheduler, now),
        }
    }
}
