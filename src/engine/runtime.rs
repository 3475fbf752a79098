// src/engine/runtime.rs

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dag::{RetryRequest, RunReport, ScheduledTask};
use crate::engine::TaskName;
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::{CoreCommand, RunEvent};

/// Wall-clock time derived from Tokio's monotonic clock.
///
/// The wall time is sampled once when the run starts and advanced by the
/// Tokio clock afterwards, so paused-time tests see retry delays elapse in
/// the timestamps recorded by the scheduler too.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    wall_start: DateTime<Utc>,
    mono_start: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(wall_start: DateTime<Utc>) -> Self {
        Self {
            wall_start,
            mono_start: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono_start.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_start + elapsed
    }
}

/// Drives one run in response to `RunEvent`s, and delegates task
/// execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// run semantics. It reads events, dispatches tasks, arms retry timers and
/// aborts cancelled attempts.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RunEvent>,
    /// Handed to retry timers so they can post `RetryDue`.
    event_tx: mpsc::Sender<RunEvent>,
    executor: E,
    clock: RunClock,
    timers: Vec<JoinHandle<()>>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_tx: mpsc::Sender<RunEvent>,
        event_rx: mpsc::Receiver<RunEvent>,
        executor: E,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            executor,
            clock: RunClock::start(),
            timers: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: RunClock) -> Self {
        self.clock = clock;
        self
    }

    /// Main event loop.
    ///
    /// - Seeds the run with its root tasks.
    /// - Consumes `RunEvent`s and feeds them into the core.
    /// - Executes commands returned by the core until the run finishes.
    pub async fn run(mut self) -> Result<RunReport> {
        let run_id = self.core.run_id();
        info!(run_id, "run runtime started");

        let step = self.core.start(self.clock.now());
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    // Unreachable while we hold `event_tx`, but never spin.
                    warn!(run_id, "run event channel closed; stopping");
                    break;
                }
            };

            debug!(run_id, ?event, "runtime received event");

            let step = self.core.step(event, self.clock.now());
            for command in step.commands {
                self.execute_command(command).await?;
            }
            keep_running = step.keep_running;
        }

        for timer in self.timers.drain(..) {
            timer.abort();
        }

        let report = self.core.report();
        info!(run_id, outcome = %report.outcome, "run runtime exiting");
        Ok(report)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => self.spawn_ready(tasks).await?,
            CoreCommand::ArmRetry(retry) => self.arm_retry(retry),
            CoreCommand::AbortTasks(tasks) => self.abort(tasks).await?,
            CoreCommand::FinishRun => {
                debug!(run_id = self.core.run_id(), "core issued FinishRun");
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        {
            let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
            debug!(?names, run_id = self.core.run_id(), "spawning ready tasks");
        }

        self.executor.spawn_ready_tasks(tasks).await
    }

    async fn abort(&mut self, tasks: Vec<TaskName>) -> Result<()> {
        debug!(?tasks, run_id = self.core.run_id(), "aborting in-flight tasks");
        self.executor.abort_tasks(tasks).await
    }

    /// Sleep in a separate task so the event loop keeps serving other
    /// branches while the delay runs.
    fn arm_retry(&mut self, retry: RetryRequest) {
        let tx = self.event_tx.clone();
        self.timers.retain(|t| !t.is_finished());
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(retry.delay).await;
            let _ = tx
                .send(RunEvent::RetryDue {
                    task: retry.task,
                    attempt: retry.next_attempt,
                })
                .await;
        }));
    }
}
