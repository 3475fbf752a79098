use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use etldag::dag::{DagGraph, ScheduledTask};
use etldag::engine::{RunEvent, TaskName, TaskOutcome};
use etldag::errors::Result;
use etldag::exec::{ExecutorBackend, ExecutorFactory};
use etldag::operators::{ExecutorError, Operator, RowsAffected, TaskContext};
use etldag::types::OperatorKind;

/// What a scripted attempt does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOutcome {
    Succeed,
    Fail(String),
    /// Never completes (until aborted).
    Hang,
}

/// Per-task, per-attempt outcomes. Anything not scripted succeeds.
#[derive(Debug, Clone, Default)]
pub struct FakeScript {
    by_attempt: HashMap<(TaskName, u32), FakeOutcome>,
    always: HashMap<TaskName, FakeOutcome>,
    durations: HashMap<TaskName, Duration>,
}

impl FakeScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `attempt` of `task`.
    pub fn fail(mut self, task: &str, attempt: u32, error: &str) -> Self {
        self.by_attempt
            .insert((task.to_string(), attempt), FakeOutcome::Fail(error.to_string()));
        self
    }

    /// Fail every attempt of `task`.
    pub fn fail_always(mut self, task: &str, error: &str) -> Self {
        self.always
            .insert(task.to_string(), FakeOutcome::Fail(error.to_string()));
        self
    }

    pub fn hang(mut self, task: &str) -> Self {
        self.always.insert(task.to_string(), FakeOutcome::Hang);
        self
    }

    /// Every attempt of `task` takes `duration` (Tokio time) before it reports.
    pub fn duration(mut self, task: &str, duration: Duration) -> Self {
        self.durations.insert(task.to_string(), duration);
        self
    }

    pub fn outcome_for(&self, task: &str, attempt: u32) -> FakeOutcome {
        self.by_attempt
            .get(&(task.to_string(), attempt))
            .or_else(|| self.always.get(task))
            .cloned()
            .unwrap_or(FakeOutcome::Succeed)
    }

    fn duration_of(&self, task: &str) -> Option<Duration> {
        self.durations.get(task).copied()
    }
}

/// One thing the fake executor observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Started {
        run_id: u64,
        logical_date: DateTime<Utc>,
        task: TaskName,
        attempt: u32,
    },
    Finished {
        run_id: u64,
        task: TaskName,
        attempt: u32,
        success: bool,
    },
    Aborted {
        task: TaskName,
    },
}

/// Shared, ordered log of everything fake executors did.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// `(task, attempt)` of every start of `run_id`, in order.
    pub fn starts(&self, run_id: u64) -> Vec<(TaskName, u32)> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::Started {
                    run_id: r,
                    task,
                    attempt,
                    ..
                } if r == run_id => Some((task, attempt)),
                _ => None,
            })
            .collect()
    }

    /// Position in the log of the start of `task`'s `attempt` in `run_id`.
    pub fn start_index(&self, run_id: u64, task: &str, attempt: u32) -> Option<usize> {
        self.entries().iter().position(|e| {
            matches!(e, LogEntry::Started { run_id: r, task: t, attempt: a, .. }
                if *r == run_id && t == task && *a == attempt)
        })
    }

    /// Position in the log of the end of `task`'s `attempt` in `run_id`.
    pub fn finish_index(&self, run_id: u64, task: &str, attempt: u32) -> Option<usize> {
        self.entries().iter().position(|e| {
            matches!(e, LogEntry::Finished { run_id: r, task: t, attempt: a, .. }
                if *r == run_id && t == task && *a == attempt)
        })
    }

    /// Distinct run ids seen, in first-start order.
    pub fn run_ids(&self) -> Vec<u64> {
        let mut ids = Vec::new();
        for e in self.entries() {
            if let LogEntry::Started { run_id, .. } = e {
                if !ids.contains(&run_id) {
                    ids.push(run_id);
                }
            }
        }
        ids
    }
}

/// A fake executor that:
/// - records which tasks were "run"
/// - reports each attempt as scripted, after its scripted duration.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RunEvent>,
    script: Arc<FakeScript>,
    log: ExecutionLog,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RunEvent>, script: Arc<FakeScript>, log: ExecutionLog) -> Self {
        Self {
            runtime_tx,
            script,
            log,
        }
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let script = Arc::clone(&self.script);
        let log = self.log.clone();

        Box::pin(async move {
            for t in tasks {
                log.push(LogEntry::Started {
                    run_id: t.run_id,
                    logical_date: t.logical_date,
                    task: t.name.clone(),
                    attempt: t.attempt,
                });

                let outcome = script.outcome_for(&t.name, t.attempt);
                let delay = script.duration_of(&t.name);
                let tx = tx.clone();
                let log = log.clone();

                tokio::spawn(async move {
                    if let Some(d) = delay {
                        tokio::time::sleep(d).await;
                    }
                    let outcome = match outcome {
                        FakeOutcome::Succeed => TaskOutcome::Success(1),
                        FakeOutcome::Fail(msg) => TaskOutcome::Failed(msg),
                        FakeOutcome::Hang => std::future::pending().await,
                    };
                    log.push(LogEntry::Finished {
                        run_id: t.run_id,
                        task: t.name.clone(),
                        attempt: t.attempt,
                        success: outcome.is_success(),
                    });
                    let _ = tx
                        .send(RunEvent::TaskCompleted {
                            task: t.name,
                            attempt: t.attempt,
                            outcome,
                        })
                        .await;
                });
            }
            Ok(())
        })
    }

    fn abort_tasks(
        &mut self,
        tasks: Vec<TaskName>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let log = self.log.clone();
        Box::pin(async move {
            for task in tasks {
                log.push(LogEntry::Aborted { task });
            }
            Ok(())
        })
    }
}

/// Creates one [`FakeExecutor`] per run, all sharing a script and a log.
#[derive(Debug, Clone, Default)]
pub struct FakeExecutorFactory {
    script: Arc<FakeScript>,
    log: ExecutionLog,
}

impl FakeExecutorFactory {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script: Arc::new(script),
            log: ExecutionLog::new(),
        }
    }

    pub fn log(&self) -> ExecutionLog {
        self.log.clone()
    }
}

impl ExecutorFactory for FakeExecutorFactory {
    type Backend = FakeExecutor;

    fn create(&self, _graph: Arc<DagGraph>, runtime_tx: mpsc::Sender<RunEvent>) -> FakeExecutor {
        FakeExecutor::new(runtime_tx, Arc::clone(&self.script), self.log.clone())
    }
}

/// Operator that fails its first `failures` attempts, optionally sleeping
/// `delay` (Tokio time) on every attempt first.
#[derive(Debug, Clone)]
pub struct FlakyOperator {
    pub failures: u32,
    pub delay: Option<Duration>,
    pub rows: RowsAffected,
}

impl FlakyOperator {
    pub fn succeeding() -> Self {
        Self {
            failures: 0,
            delay: None,
            rows: 1,
        }
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures,
            ..Self::succeeding()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::succeeding()
        }
    }
}

#[async_trait]
impl Operator for FlakyOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Noop
    }

    async fn execute(&self, ctx: &TaskContext) -> std::result::Result<RowsAffected, ExecutorError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        ctx.check_cancelled()?;
        if ctx.attempt <= self.failures {
            return Err(ExecutorError::InvalidParams(format!(
                "scripted failure on attempt {}",
                ctx.attempt
            )));
        }
        Ok(self.rows)
    }
}
