// src/dag/state_manager.rs

//! Per-run state management for tasks in the scheduler.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::graph::{DagGraph, TaskId};
use crate::dag::run_record::{ScheduledTask, TaskRecord};
use crate::engine::TaskName;
use crate::events::TaskTransition;
use crate::types::TaskState;

/// Identity of the run a [`StateManager`] is working on.
#[derive(Debug, Clone, Copy)]
pub struct RunIdentity {
    pub run_id: u64,
    pub logical_date: DateTime<Utc>,
}

/// Manages per-run state transitions for tasks.
///
/// Borrows the immutable graph and the run's task table (indexed by
/// [`TaskId`]) and records every transition it makes.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    records: &'a mut [TaskRecord],
    transitions: &'a mut Vec<TaskTransition>,
    run: RunIdentity,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a DagGraph,
        records: &'a mut [TaskRecord],
        transitions: &'a mut Vec<TaskTransition>,
        run: RunIdentity,
    ) -> Self {
        Self {
            graph,
            records,
            transitions,
            run,
        }
    }

    pub fn state(&self, id: TaskId) -> TaskState {
        self.records[id.index()].state
    }

    pub fn record_mut(&mut self, id: TaskId) -> &mut TaskRecord {
        &mut self.records[id.index()]
    }

    /// Move `id` to `to`, remembering the transition and emitting it as a
    /// structured event.
    pub fn transition(
        &mut self,
        id: TaskId,
        to: TaskState,
        now: DateTime<Utc>,
        error: Option<String>,
    ) {
        let record = &mut self.records[id.index()];
        let from = record.state;
        if from == to {
            return;
        }
        record.state = to;
        if error.is_some() {
            record.last_error = error.clone();
        }

        let transition = TaskTransition {
            run_id: self.run.run_id,
            logical_date: self.run.logical_date,
            task: self.graph.name_of(id).to_string(),
            from,
            to,
            attempt: record.attempts,
            at: now,
            error,
        };
        transition.emit();
        self.transitions.push(transition);
    }

    /// Mark every root task `Ready`.
    pub fn mark_roots_ready(&mut self, now: DateTime<Utc>) {
        let roots: Vec<TaskId> = self
            .graph
            .topological_ids()
            .iter()
            .copied()
            .filter(|id| self.graph.upstream_ids(*id).next().is_none())
            .collect();

        for id in roots {
            if self.state(id) == TaskState::Pending {
                self.transition(id, TaskState::Ready, now, None);
            }
        }
    }

    /// After `id` succeeded, move each downstream task whose upstream tasks
    /// have *all* succeeded from `Pending` to `Ready`.
    pub fn mark_ready_successors(&mut self, id: TaskId, now: DateTime<Utc>) -> Vec<TaskId> {
        let ready = {
            let records = &*self.records;
            self.graph.ready_successor_ids(id, |up| {
                records[up.index()].state == TaskState::Succeeded
            })
        };

        let mut newly_ready = Vec::new();
        for succ in ready {
            if self.state(succ) == TaskState::Pending {
                debug!(
                    task = %self.graph.name_of(succ),
                    run_id = self.run.run_id,
                    "all upstream tasks succeeded; marking Ready"
                );
                self.transition(succ, TaskState::Ready, now, None);
                newly_ready.push(succ);
            }
        }
        newly_ready
    }

    /// Mark every transitive downstream task of an exhausted task as `Skipped`.
    ///
    /// Returns the names of the tasks that were newly skipped.
    pub fn skip_descendants(&mut self, exhausted: TaskId, now: DateTime<Utc>) -> Vec<TaskName> {
        let mut skipped = Vec::new();

        for id in self.graph.descendant_ids(exhausted) {
            match self.state(id) {
                TaskState::Pending | TaskState::Ready => {
                    self.transition(id, TaskState::Skipped, now, None);
                    skipped.push(self.graph.name_of(id).to_string());
                }
                other => {
                    // A descendant can only get past Ready once its upstream
                    // chain succeeded, which cannot happen here.
                    warn!(
                        task = %self.graph.name_of(id),
                        state = %other,
                        "descendant of exhausted task not pending; leaving as is"
                    );
                }
            }
        }

        skipped
    }

    pub fn running_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == TaskState::Running)
            .count()
    }

    /// Move `Ready` tasks to `Running`, in topological order, until the run
    /// has `concurrency` tasks running. Returns what should be dispatched.
    pub fn collect_dispatchable(
        &mut self,
        concurrency: usize,
        now: DateTime<Utc>,
    ) -> Vec<ScheduledTask> {
        let mut slots = concurrency.saturating_sub(self.running_count());
        let mut dispatched = Vec::new();

        let candidates: Vec<TaskId> = self
            .graph
            .topological_ids()
            .iter()
            .copied()
            .filter(|id| self.state(*id) == TaskState::Ready)
            .collect();

        for id in candidates {
            if slots == 0 {
                debug!(
                    run_id = self.run.run_id,
                    concurrency,
                    "concurrency limit reached; remaining ready tasks wait"
                );
                break;
            }
            slots -= 1;

            let record = self.record_mut(id);
            record.attempts += 1;
            record.started_at = Some(now);
            record.ended_at = None;
            let attempt = record.attempts;

            let spec = self.graph.spec(id);
            if attempt > 1 {
                info!(
                    task = %spec.name,
                    run_id = self.run.run_id,
                    attempt,
                    "dispatching retry attempt"
                );
            } else {
                info!(task = %spec.name, run_id = self.run.run_id, "dispatching task");
            }

            let scheduled = ScheduledTask {
                name: spec.name.clone(),
                run_id: self.run.run_id,
                logical_date: self.run.logical_date,
                attempt,
                timeout: spec.timeout,
            };
            self.transition(id, TaskState::Running, now, None);
            dispatched.push(scheduled);
        }

        dispatched
    }

    /// Move every non-terminal task to `Cancelled`.
    ///
    /// Returns `(cancelled, were_running)`: all tasks that got cancelled and
    /// the subset that had an attempt in flight.
    pub fn cancel_all(&mut self, now: DateTime<Utc>) -> (Vec<TaskName>, Vec<TaskName>) {
        let mut cancelled = Vec::new();
        let mut running = Vec::new();

        let ids: Vec<TaskId> = self.graph.topological_ids().to_vec();
        for id in ids {
            let state = self.state(id);
            if state.is_terminal() {
                continue;
            }
            let name = self.graph.name_of(id).to_string();
            if state == TaskState::Running {
                self.record_mut(id).ended_at = Some(now);
                running.push(name.clone());
            }
            self.transition(id, TaskState::Cancelled, now, None);
            cancelled.push(name);
        }

        (cancelled, running)
    }

    /// Whether every task reached a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        self.records.iter().all(|r| r.state.is_terminal())
    }
}
