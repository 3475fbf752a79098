// src/exec/executor_loop.rs

//! Main executor loop that manages running task attempts of one run.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{DagGraph, ScheduledTask};
use crate::engine::{RunEvent, TaskName};
use crate::exec::task_runner::run_task;
use crate::resources::ResourceRegistry;

/// Requests the backend sends to the executor loop.
#[derive(Debug)]
pub enum ExecRequest {
    Run(ScheduledTask),
    Abort(Vec<TaskName>),
}

/// Internal handle for a currently-running attempt.
///
/// - `cancel` asks the operator to stop (run cancellation).
/// - `handle` is the Tokio task that is actually running the operator.
struct ActiveTask {
    attempt: u32,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop for one run.
///
/// Each scheduled task runs in its own Tokio task, so independent branches
/// make progress concurrently. Per task name there is never more than one
/// attempt in flight: the scheduler only re-dispatches a task after its
/// previous attempt reported back.
///
/// When the returned sender is dropped, every attempt still in flight is
/// cancelled.
pub fn spawn_executor(
    graph: Arc<DagGraph>,
    registry: Arc<ResourceRegistry>,
    runtime_tx: mpsc::Sender<RunEvent>,
) -> mpsc::Sender<ExecRequest> {
    let (tx, mut rx) = mpsc::channel::<ExecRequest>(32);

    tokio::spawn(async move {
        debug!("executor loop started");

        let mut active: HashMap<TaskName, ActiveTask> = HashMap::new();

        while let Some(request) = rx.recv().await {
            active.retain(|_, t| !t.handle.is_finished());
            match request {
                ExecRequest::Run(task) => {
                    handle_scheduled_task(task, &graph, &registry, &mut active, &runtime_tx)
                }
                ExecRequest::Abort(names) => abort_tasks(&names, &mut active),
            }
        }

        for (name, task) in active.drain() {
            if !task.handle.is_finished() {
                debug!(task = %name, "executor loop closing; cancelling attempt");
                task.cancel.cancel();
            }
        }

        debug!("executor loop finished (channel closed)");
    });

    tx
}

/// Handle a newly scheduled task.
fn handle_scheduled_task(
    task: ScheduledTask,
    graph: &Arc<DagGraph>,
    registry: &Arc<ResourceRegistry>,
    active: &mut HashMap<TaskName, ActiveTask>,
    runtime_tx: &mpsc::Sender<RunEvent>,
) {
    let name = task.name.clone();

    let Some(spec) = graph.task(&name) else {
        warn!(task = %name, "scheduled task not in DAG; reporting failure");
        let tx = runtime_tx.clone();
        let attempt = task.attempt;
        tokio::spawn(async move {
            let _ = tx
                .send(RunEvent::TaskCompleted {
                    task: name.clone(),
                    attempt,
                    outcome: crate::engine::TaskOutcome::Failed(format!(
                        "task '{name}' is not part of the DAG"
                    )),
                })
                .await;
        });
        return;
    };

    if let Some(existing) = active.get(&name) {
        if !existing.handle.is_finished() {
            warn!(
                task = %name,
                run_id = task.run_id,
                previous_attempt = existing.attempt,
                attempt = task.attempt,
                "previous attempt still running; cancelling it"
            );
            existing.cancel.cancel();
        }
    }

    let cancel = CancellationToken::new();
    let operator = Arc::clone(&spec.operator);
    let registry = Arc::clone(registry);
    let rt_tx = runtime_tx.clone();
    let token = cancel.clone();
    let attempt = task.attempt;

    let handle = tokio::spawn(async move {
        run_task(task, operator, registry, rt_tx, token).await;
    });

    active.insert(
        name,
        ActiveTask {
            attempt,
            cancel,
            handle,
        },
    );
}

/// Cancel in-flight attempts of the given tasks.
fn abort_tasks(names: &[TaskName], active: &mut HashMap<TaskName, ActiveTask>) {
    for name in names {
        match active.remove(name) {
            Some(task) if !task.handle.is_finished() => {
                info!(task = %name, attempt = task.attempt, "aborting in-flight attempt");
                task.cancel.cancel();
            }
            _ => {
                debug!(task = %name, "abort requested but no attempt in flight");
            }
        }
    }
}
