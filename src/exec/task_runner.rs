// src/exec/task_runner.rs

//! Runs a single attempt of a task's operator.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::{RunEvent, TaskOutcome};
use crate::operators::{ExecutorError, Operator, RowsAffected, TaskContext};
use crate::resources::ResourceRegistry;

/// Run one attempt and report it back as `TaskCompleted`.
///
/// - A per-attempt `timeout` wraps the operator in `tokio::time::timeout`;
///   hitting it is reported as `TaskOutcome::TimedOut`.
/// - If `cancel` fires, the operator future is dropped and **no**
///   `TaskCompleted` is sent: the scheduler has already moved the task to
///   `Cancelled` and would ignore it anyway.
pub async fn run_task(
    task: ScheduledTask,
    operator: Arc<dyn Operator>,
    registry: Arc<ResourceRegistry>,
    runtime_tx: mpsc::Sender<RunEvent>,
    cancel: CancellationToken,
) {
    let ctx = TaskContext {
        task: task.name.clone(),
        run_id: task.run_id,
        logical_date: task.logical_date,
        attempt: task.attempt,
        registry,
        cancel: cancel.clone(),
    };

    info!(
        task = %task.name,
        run_id = task.run_id,
        attempt = task.attempt,
        operator = %operator.kind(),
        "starting task attempt"
    );
    let started = Instant::now();

    let attempt = async {
        match task.timeout {
            Some(limit) => match tokio::time::timeout(limit, operator.execute(&ctx)).await {
                Ok(result) => outcome_from(result),
                Err(_) => TaskOutcome::TimedOut(limit),
            },
            None => outcome_from(operator.execute(&ctx).await),
        }
    };

    let outcome = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            info!(
                task = %task.name,
                run_id = task.run_id,
                attempt = task.attempt,
                "task attempt cancelled"
            );
            return;
        }

        outcome = attempt => outcome,
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        TaskOutcome::Success(rows) => info!(
            task = %task.name,
            run_id = task.run_id,
            attempt = task.attempt,
            rows,
            elapsed_ms,
            "task attempt succeeded"
        ),
        other => warn!(
            task = %task.name,
            run_id = task.run_id,
            attempt = task.attempt,
            elapsed_ms,
            error = %other.error_message(),
            "task attempt failed"
        ),
    }

    let sent = runtime_tx
        .send(RunEvent::TaskCompleted {
            task: task.name.clone(),
            attempt: task.attempt,
            outcome,
        })
        .await;

    if sent.is_err() {
        debug!(
            task = %task.name,
            run_id = task.run_id,
            "run runtime gone; dropping completion"
        );
    }
}

fn outcome_from(result: std::result::Result<RowsAffected, ExecutorError>) -> TaskOutcome {
    match result {
        Ok(rows) => TaskOutcome::Success(rows),
        Err(err) => TaskOutcome::Failed(err.to_string()),
    }
}
