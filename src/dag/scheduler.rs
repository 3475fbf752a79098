// src/dag/scheduler.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::graph::{DagGraph, TaskId};
use crate::dag::run_record::{RetryRequest, RunReport, TaskRecord};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{RunIdentity, StateManager};
use crate::engine::{TaskName, TaskOutcome};
use crate::events::{TaskTransition, emit_run_finished};
use crate::types::{RunOutcome, TaskState};

/// Knobs that shape how one run is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Maximum number of tasks running at the same time in this run.
    pub concurrency: usize,
    /// After the first task exhausts, retries are only scheduled for this long.
    pub failure_grace: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: 16,
            failure_grace: Duration::from_secs(30 * 60),
        }
    }
}

/// Scheduler holds a shared, immutable DAG plus the mutable state of one run.
///
/// It is responsible for:
/// - seeding the run with the DAG roots
/// - deciding when a task is ready (every upstream task succeeded)
/// - recording attempts, successes and failures
/// - asking for delayed retries while the retry budget lasts
/// - skipping everything downstream of an exhausted task
/// - deciding the run outcome
///
/// It performs no IO and never looks at a clock: every call takes `now`, so
/// a run can be stepped by hand in tests.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<DagGraph>,
    run: RunIdentity,
    options: SchedulerOptions,
    /// Indexed by `TaskId::index()`.
    records: Vec<TaskRecord>,
    transitions: Vec<TaskTransition>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    /// When the first task of this run exhausted its retries.
    exhausted_at: Option<DateTime<Utc>>,
    /// When each task in `Failed` is due for its next attempt.
    retry_due: BTreeMap<TaskId, DateTime<Utc>>,
    cancelled: bool,
}

impl Scheduler {
    pub fn new(
        graph: Arc<DagGraph>,
        run_id: u64,
        logical_date: DateTime<Utc>,
        options: SchedulerOptions,
    ) -> Self {
        let records = vec![TaskRecord::new(); graph.len()];
        Self {
            graph,
            run: RunIdentity {
                run_id,
                logical_date,
            },
            options: SchedulerOptions {
                concurrency: options.concurrency.max(1),
                ..options
            },
            records,
            transitions: Vec::new(),
            started_at: None,
            ended_at: None,
            exhausted_at: None,
            retry_due: BTreeMap::new(),
            cancelled: false,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run.run_id
    }

    pub fn logical_date(&self) -> DateTime<Utc> {
        self.run.logical_date
    }

    pub fn graph(&self) -> &Arc<DagGraph> {
        &self.graph
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Whether some task already exhausted its retries.
    ///
    /// The run is bound to fail once this is true, even while independent
    /// branches are still finishing.
    pub fn has_failed(&self) -> bool {
        self.exhausted_at.is_some() || self.cancelled
    }

    pub fn outcome(&self) -> RunOutcome {
        if !self.is_finished() {
            return RunOutcome::Running;
        }
        if !self.cancelled
            && self
                .records
                .iter()
                .all(|r| r.state == TaskState::Succeeded)
        {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        }
    }

    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        let id = self.graph.id_of(task)?;
        Some(self.records[id.index()].state)
    }

    pub fn record_of(&self, task: &str) -> Option<&TaskRecord> {
        let id = self.graph.id_of(task)?;
        Some(&self.records[id.index()])
    }

    /// Whether every upstream task of `task` succeeded in this run.
    ///
    /// Returns `None` if the task is unknown.
    pub fn deps_satisfied(&self, task: &str) -> Option<bool> {
        let id = self.graph.id_of(task)?;
        Some(
            self.graph
                .upstream_ids(id)
                .all(|up| self.records[up.index()].state == TaskState::Succeeded),
        )
    }

    /// Names of tasks currently in `state`, in topological order.
    pub fn tasks_in(&self, state: TaskState) -> Vec<TaskName> {
        self.graph
            .topological_ids()
            .iter()
            .filter(|id| self.records[id.index()].state == state)
            .map(|id| self.graph.name_of(*id).to_string())
            .collect()
    }

    /// Snapshot of the run so far.
    pub fn report(&self) -> RunReport {
        let tasks: BTreeMap<TaskName, TaskRecord> = self
            .graph
            .topological_ids()
            .iter()
            .map(|id| (self.graph.name_of(*id).to_string(), self.records[id.index()].clone()))
            .collect();

        RunReport {
            run_id: self.run.run_id,
            logical_date: self.run.logical_date,
            outcome: self.outcome(),
            cancelled: self.cancelled,
            started_at: self.started_at.unwrap_or(self.run.logical_date),
            ended_at: self.ended_at,
            tasks,
            transitions: self.transitions.clone(),
        }
    }

    /// Start the run: roots become `Ready` and are dispatched.
    pub fn start(&mut self, now: DateTime<Utc>) -> SchedulerStep {
        if self.is_started() {
            warn!(run_id = self.run.run_id, "start called twice; ignoring");
            return SchedulerStep::default();
        }

        self.started_at = Some(now);
        info!(
            run_id = self.run.run_id,
            logical_date = %self.run.logical_date,
            tasks = self.graph.len(),
            "starting run"
        );

        let mut step = SchedulerStep::default();
        let concurrency = self.options.concurrency;
        {
            let mut manager = self.manager();
            manager.mark_roots_ready(now);
            step.newly_scheduled = manager.collect_dispatchable(concurrency, now);
        }
        step.run_just_finished = self.maybe_finish_run(now);
        step
    }

    /// Handle the completion of one attempt of `task`.
    pub fn handle_completion(
        &mut self,
        task: &str,
        attempt: u32,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(id) = self.graph.id_of(task) else {
            warn!(task = %task, "completion for unknown task; ignoring");
            return step;
        };

        let record = &mut self.records[id.index()];
        if record.state != TaskState::Running || record.attempts != attempt {
            warn!(
                task = %task,
                run_id = self.run.run_id,
                attempt,
                current_attempt = record.attempts,
                state = %record.state,
                "stale completion; ignoring"
            );
            return step;
        }
        record.ended_at = Some(now);

        match outcome {
            TaskOutcome::Success(rows) => {
                record.rows_affected = Some(rows);
                debug!(task = %task, run_id = self.run.run_id, rows, "task succeeded");
                let mut manager = self.manager();
                manager.transition(id, TaskState::Succeeded, now, None);
                manager.mark_ready_successors(id, now);
            }
            TaskOutcome::Failed(_) | TaskOutcome::TimedOut(_) => {
                let error = outcome.error_message();
                self.handle_failure(id, error, now, &mut step);
            }
        }

        let concurrency = self.options.concurrency;
        step.newly_scheduled = self.manager().collect_dispatchable(concurrency, now);
        step.run_just_finished = self.maybe_finish_run(now);
        step
    }

    /// Handle the end of a retry delay for `task`.
    pub fn handle_retry_due(&mut self, task: &str, attempt: u32, now: DateTime<Utc>) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(id) = self.graph.id_of(task) else {
            warn!(task = %task, "retry for unknown task; ignoring");
            return step;
        };

        let record = &self.records[id.index()];
        if record.state != TaskState::Failed || record.attempts + 1 != attempt {
            debug!(
                task = %task,
                run_id = self.run.run_id,
                attempt,
                state = %record.state,
                "stale retry timer; ignoring"
            );
            return step;
        }
        self.retry_due.remove(&id);

        if self.retry_window_open(now) {
            self.manager().transition(id, TaskState::Ready, now, None);
        } else {
            let error = format!(
                "retry abandoned: failure grace period elapsed ({})",
                record.last_error.as_deref().unwrap_or("no error recorded")
            );
            self.exhaust(id, error, now, &mut step);
        }

        let concurrency = self.options.concurrency;
        step.newly_scheduled = self.manager().collect_dispatchable(concurrency, now);
        step.run_just_finished = self.maybe_finish_run(now);
        step
    }

    /// Cancel the run: every non-terminal task becomes `Cancelled`.
    ///
    /// Tasks that already succeeded are left alone.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.is_finished() {
            debug!(run_id = self.run.run_id, "cancel on finished run; ignoring");
            return step;
        }

        info!(run_id = self.run.run_id, "cancelling run");
        self.cancelled = true;
        self.retry_due.clear();
        let (cancelled, running) = self.manager().cancel_all(now);
        step.newly_cancelled = cancelled;
        step.to_abort = running;
        step.run_just_finished = self.maybe_finish_run(now);
        step
    }

    fn handle_failure(
        &mut self,
        id: TaskId,
        error: String,
        now: DateTime<Utc>,
        step: &mut SchedulerStep,
    ) {
        let spec = self.graph.spec(id);
        let attempts = self.records[id.index()].attempts;

        if !spec.retry.allows_another(attempts) {
            self.exhaust(id, error, now, step);
            return;
        }

        let delay = spec.retry.delay_for(attempts);
        let due = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d));
        if !self.retry_fits(due) {
            let error = format!(
                "retry abandoned: failure grace period ends before attempt {} is due ({error})",
                attempts + 1
            );
            self.exhaust(id, error, now, step);
            return;
        }

        warn!(
            task = %spec.name,
            run_id = self.run.run_id,
            attempt = attempts,
            retry_limit = spec.retry.limit,
            delay_secs = delay.as_secs(),
            error = %error,
            "task attempt failed; retry scheduled"
        );
        step.retries.push(RetryRequest {
            task: spec.name.clone(),
            next_attempt: attempts + 1,
            delay,
        });
        if let Some(due) = due {
            self.retry_due.insert(id, due);
        }
        self.manager()
            .transition(id, TaskState::Failed, now, Some(error));
    }

    fn exhaust(&mut self, id: TaskId, error: String, now: DateTime<Utc>, step: &mut SchedulerStep) {
        let name = self.graph.name_of(id).to_string();
        warn!(
            task = %name,
            run_id = self.run.run_id,
            attempts = self.records[id.index()].attempts,
            error = %error,
            "task exhausted its retries; skipping downstream tasks"
        );

        let first_exhaustion = self.exhausted_at.is_none();
        self.exhausted_at.get_or_insert(now);
        self.retry_due.remove(&id);

        {
            let mut manager = self.manager();
            manager.transition(id, TaskState::Exhausted, now, Some(error));
            let mut skipped = manager.skip_descendants(id, now);
            step.newly_exhausted.push(name);
            step.newly_skipped.append(&mut skipped);
        }

        if first_exhaustion {
            self.abandon_late_retries(now, step);
        }
    }

    /// Exhaust every task waiting on a retry that falls due after the grace
    /// deadline, so the run does not idle until those timers fire.
    fn abandon_late_retries(&mut self, now: DateTime<Utc>, step: &mut SchedulerStep) {
        let late: Vec<TaskId> = self
            .retry_due
            .iter()
            .filter(|&(_, &due)| !self.retry_fits(Some(due)))
            .map(|(&id, _)| id)
            .collect();

        for id in late {
            self.retry_due.remove(&id);
            let record = &self.records[id.index()];
            if record.state != TaskState::Failed {
                continue;
            }
            let error = format!(
                "retry abandoned: failure grace period ends before attempt {} is due ({})",
                record.attempts + 1,
                record.last_error.as_deref().unwrap_or("no error recorded")
            );
            self.exhaust(id, error, now, step);
        }
    }

    /// End of the retry window: `failure_grace` after the first exhaustion.
    fn grace_deadline(&self) -> Option<DateTime<Utc>> {
        let first = self.exhausted_at?;
        chrono::Duration::from_std(self.options.failure_grace)
            .ok()
            .and_then(|grace| first.checked_add_signed(grace))
    }

    fn retry_window_open(&self, now: DateTime<Utc>) -> bool {
        self.grace_deadline().is_none_or(|deadline| now < deadline)
    }

    /// Whether a retry falling due at `due` still lands inside the window.
    /// `None` means the due time overflowed.
    fn retry_fits(&self, due: Option<DateTime<Utc>>) -> bool {
        match (self.grace_deadline(), due) {
            (None, _) => true,
            (Some(deadline), Some(due)) => due < deadline,
            (Some(_), None) => false,
        }
    }

    /// If every task is terminal, mark the run finished.
    ///
    /// Returns `true` if this call finished the run.
    fn maybe_finish_run(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_finished() {
            return false;
        }

        if !self.manager().all_tasks_terminal() {
            return false;
        }

        self.ended_at = Some(now);
        let outcome = self.outcome();
        emit_run_finished(self.run.run_id, self.run.logical_date, outcome, self.cancelled);
        true
    }

    fn manager(&mut self) -> StateManager<'_> {
        StateManager::new(&self.graph, &mut self.records, &mut self.transitions, self.run)
    }
}
