// src/engine/supervisor.rs

//! Cross-run orchestration: turns schedule ticks into concurrent runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::model::DagSettings;
use crate::dag::{DagGraph, RunReport, Scheduler, SchedulerOptions};
use crate::errors::Result;
use crate::exec::ExecutorFactory;

use super::core::CoreRuntime;
use super::queue::{Admission, RunQueue};
use super::runtime::Runtime;
use super::RunEvent;

/// Events the supervisor reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A schedule tick; the logical date of the run it asks for.
    Tick(DateTime<Utc>),
    /// Cancel every active run, drop queued ticks and stop.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub max_active_runs: usize,
    pub queue_length: usize,
    pub scheduler: SchedulerOptions,
    /// Stop once at least one run happened and nothing is active or queued.
    pub exit_when_idle: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            max_active_runs: 5,
            queue_length: 16,
            scheduler: SchedulerOptions::default(),
            exit_when_idle: false,
        }
    }
}

impl SupervisorOptions {
    pub fn from_settings(dag: &DagSettings) -> Self {
        Self {
            max_active_runs: dag.max_active_runs,
            queue_length: dag.queue_length,
            scheduler: SchedulerOptions {
                concurrency: dag.concurrency,
                failure_grace: dag.failure_grace,
            },
            exit_when_idle: false,
        }
    }

    pub fn with_exit_when_idle(mut self, exit_when_idle: bool) -> Self {
        self.exit_when_idle = exit_when_idle;
        self
    }
}

/// Handle to one active run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: u64,
    pub logical_date: DateTime<Utc>,
    tx: mpsc::Sender<RunEvent>,
}

impl RunHandle {
    /// Ask the run to cancel. Returns `false` if the run is already gone.
    pub async fn cancel(&self) -> bool {
        self.tx.send(RunEvent::CancelRequested).await.is_ok()
    }
}

/// Starts one [`Runtime`] per admitted tick, each on its own Tokio task.
///
/// - At most `max_active_runs` runs execute at the same time; the rest wait
///   in a [`RunQueue`].
/// - Every run has its own scheduler and task table; only the graph (and
///   whatever the executor factory shares) is common.
/// - A failed run is logged and reported; later ticks keep being scheduled.
pub struct Supervisor<F: ExecutorFactory> {
    graph: Arc<DagGraph>,
    factory: F,
    options: SupervisorOptions,
    queue: RunQueue,
    runs: JoinSet<Result<RunReport>>,
    /// Tokio task id of each run -> its logical date.
    task_dates: HashMap<tokio::task::Id, DateTime<Utc>>,
    handles: BTreeMap<DateTime<Utc>, RunHandle>,
    next_run_id: u64,
    report_tx: Option<mpsc::Sender<RunReport>>,
    reports: Vec<RunReport>,
    started_any: bool,
    shutting_down: bool,
}

impl<F: ExecutorFactory> Supervisor<F> {
    pub fn new(graph: Arc<DagGraph>, factory: F, options: SupervisorOptions) -> Self {
        Self {
            graph,
            factory,
            queue: RunQueue::new(options.max_active_runs, options.queue_length),
            options,
            runs: JoinSet::new(),
            task_dates: HashMap::new(),
            handles: BTreeMap::new(),
            next_run_id: 1,
            report_tx: None,
            reports: Vec::new(),
            started_any: false,
            shutting_down: false,
        }
    }

    /// Forward finished run reports to `tx` instead of keeping them.
    pub fn with_report_sender(mut self, tx: mpsc::Sender<RunReport>) -> Self {
        self.report_tx = Some(tx);
        self
    }

    pub fn active_runs(&self) -> impl Iterator<Item = &RunHandle> {
        self.handles.values()
    }

    /// Main loop.
    ///
    /// Returns once the event channel is closed (or `Shutdown` arrived) and
    /// every run has finished, or, with `exit_when_idle`, as soon as there
    /// is nothing left to do. Reports not forwarded to a report sender are
    /// returned in completion order.
    pub async fn run(mut self, mut events: mpsc::Receiver<SupervisorEvent>) -> Result<Vec<RunReport>> {
        info!(
            max_active_runs = self.options.max_active_runs,
            queue_length = self.options.queue_length,
            "supervisor started"
        );

        let mut events_closed = false;

        loop {
            tokio::select! {
                event = events.recv(), if !events_closed => match event {
                    Some(SupervisorEvent::Tick(date)) => self.on_tick(date),
                    Some(SupervisorEvent::Shutdown) => self.shutdown().await,
                    None => {
                        debug!("supervisor event channel closed");
                        events_closed = true;
                    }
                },

                Some(joined) = self.runs.join_next_with_id(), if !self.runs.is_empty() => {
                    self.on_run_joined(joined).await;
                }

                else => break,
            }

            let stopping = events_closed || self.shutting_down;
            let idle = self.runs.is_empty() && self.queue.is_idle();
            if idle && (stopping || (self.options.exit_when_idle && self.started_any)) {
                break;
            }
        }

        info!(finished = self.reports.len(), "supervisor exiting");
        Ok(self.reports)
    }

    fn on_tick(&mut self, logical_date: DateTime<Utc>) {
        if self.shutting_down {
            debug!(logical_date = %logical_date, "shutting down; ignoring tick");
            return;
        }

        match self.queue.admit(logical_date) {
            Admission::Start => self.spawn_run(logical_date),
            Admission::Queued => info!(
                logical_date = %logical_date,
                waiting = self.queue.pending_count(),
                "max_active_runs reached; run queued"
            ),
            Admission::Duplicate => {}
        }
    }

    fn spawn_run(&mut self, logical_date: DateTime<Utc>) {
        let run_id = self.next_run_id;
        self.next_run_id += 1;
        self.started_any = true;

        let (tx, rx) = mpsc::channel::<RunEvent>(64);
        let executor = self.factory.create(Arc::clone(&self.graph), tx.clone());
        let scheduler = Scheduler::new(
            Arc::clone(&self.graph),
            run_id,
            logical_date,
            self.options.scheduler,
        );
        let runtime = Runtime::new(CoreRuntime::new(scheduler), tx.clone(), rx, executor);

        let abort = self.runs.spawn(runtime.run());
        self.task_dates.insert(abort.id(), logical_date);
        self.handles.insert(
            logical_date,
            RunHandle {
                run_id,
                logical_date,
                tx,
            },
        );

        info!(
            run_id,
            logical_date = %logical_date,
            active = self.handles.len(),
            "run started"
        );
    }

    async fn on_run_joined(
        &mut self,
        joined: std::result::Result<(tokio::task::Id, Result<RunReport>), tokio::task::JoinError>,
    ) {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, Some(outcome)),
            Err(join_err) => {
                error!(error = %join_err, "run task aborted or panicked");
                (join_err.id(), None)
            }
        };

        let Some(logical_date) = self.task_dates.remove(&id) else {
            warn!("finished run task has no logical date; ignoring");
            return;
        };
        self.handles.remove(&logical_date);

        match outcome {
            Some(Ok(report)) => {
                if report.succeeded() {
                    info!(run_id = report.run_id, logical_date = %logical_date, "run succeeded");
                } else {
                    warn!(
                        run_id = report.run_id,
                        logical_date = %logical_date,
                        cancelled = report.cancelled,
                        exhausted = ?report.tasks_in(crate::types::TaskState::Exhausted),
                        "run failed"
                    );
                }
                self.publish(report).await;
            }
            Some(Err(err)) => {
                error!(logical_date = %logical_date, error = %err, "run aborted with an error");
            }
            None => {}
        }

        if let Some(next) = self.queue.complete(logical_date) {
            if self.shutting_down {
                debug!(logical_date = %next, "shutting down; not starting queued run");
            } else {
                self.spawn_run(next);
            }
        }
    }

    async fn publish(&mut self, report: RunReport) {
        match &self.report_tx {
            Some(tx) => {
                if let Err(err) = tx.send(report).await {
                    debug!("report receiver gone; keeping report");
                    self.reports.push(err.0);
                }
            }
            None => self.reports.push(report),
        }
    }

    async fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;

        let dropped = self.queue.clear_pending();
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "shutdown: dropping queued runs");
        }

        info!(active = self.handles.len(), "shutdown: cancelling active runs");
        let cancelled = join_all(self.handles.values().map(|handle| async move {
            (handle.run_id, handle.cancel().await)
        }))
        .await;
        for (run_id, delivered) in cancelled {
            if !delivered {
                debug!(run_id, "run already gone during shutdown");
            }
        }
    }
}
