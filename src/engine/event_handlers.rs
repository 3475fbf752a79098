// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::dag::{RetryRequest, ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::{TaskName, TaskOutcome};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Arm a timer that posts `RetryDue` once the delay elapses.
    ArmRetry(RetryRequest),
    /// Signal in-flight attempts of these tasks to stop.
    AbortTasks(Vec<TaskName>),
    /// Every task is terminal; the run is over.
    FinishRun,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer event loop should keep running.
    pub keep_running: bool,
}

/// Translate a scheduler step into shell commands.
///
/// Aborts come first so a cancelled attempt is stopped before anything
/// else happens; `FinishRun` always comes last.
pub fn commands_from_step(step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();

    if !step.to_abort.is_empty() {
        commands.push(CoreCommand::AbortTasks(step.to_abort));
    }

    for retry in step.retries {
        commands.push(CoreCommand::ArmRetry(retry));
    }

    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchTasks(step.newly_scheduled));
    }

    let keep_running = !step.run_just_finished;
    if step.run_just_finished {
        commands.push(CoreCommand::FinishRun);
    }

    CoreStep {
        commands,
        keep_running,
    }
}

/// Handle the completion of a task attempt.
pub fn handle_task_completion(
    scheduler: &mut Scheduler,
    task: TaskName,
    attempt: u32,
    outcome: TaskOutcome,
    now: DateTime<Utc>,
) -> CoreStep {
    debug!(task = %task, attempt, success = outcome.is_success(), "handling completion");
    let step = scheduler.handle_completion(&task, attempt, outcome, now);
    commands_from_step(step)
}

/// Handle the end of a retry delay.
pub fn handle_retry_due(
    scheduler: &mut Scheduler,
    task: TaskName,
    attempt: u32,
    now: DateTime<Utc>,
) -> CoreStep {
    let step = scheduler.handle_retry_due(&task, attempt, now);
    commands_from_step(step)
}

/// Handle a cancellation request.
pub fn handle_cancel(scheduler: &mut Scheduler, now: DateTime<Utc>) -> CoreStep {
    let step = scheduler.cancel(now);
    let mut core_step = commands_from_step(step);
    // A cancel on an already finished run produces nothing; still stop.
    if scheduler.is_finished() {
        core_step.keep_running = false;
    }
    core_step
}
