// tests/core_runtime.rs
mod common;
use crate::common::builders::noop_graph;
use crate::common::{hour, init_tracing};

use std::sync::Arc;
use std::time::Duration;

use etldag::dag::{Scheduler, SchedulerOptions};
use etldag::engine::{CoreCommand, CoreRuntime, RunEvent, TaskOutcome};
use etldag::types::RunOutcome;

fn core(tasks: &[(&str, &[&str])]) -> CoreRuntime {
    let graph = Arc::new(noop_graph(tasks).unwrap());
    CoreRuntime::new(Scheduler::new(graph, 3, hour(2), SchedulerOptions::default()))
}

fn dispatched(commands: &[CoreCommand]) -> Vec<(String, u32)> {
    commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::DispatchTasks(tasks) => Some(tasks),
            _ => None,
        })
        .flatten()
        .map(|t| (t.name.clone(), t.attempt))
        .collect()
}

fn completed(task: &str, attempt: u32, outcome: TaskOutcome) -> RunEvent {
    RunEvent::TaskCompleted {
        task: task.to_string(),
        attempt,
        outcome,
    }
}

#[test]
fn start_dispatches_roots_with_run_identity() {
    init_tracing();
    let mut core = core(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);

    let step = core.start(hour(2));
    assert!(step.keep_running);
    match step.commands.as_slice() {
        [CoreCommand::DispatchTasks(tasks)] => {
            assert_eq!(tasks.len(), 2);
            assert!(tasks.iter().all(|t| t.run_id == 3 && t.logical_date == hour(2)));
            assert!(tasks.iter().all(|t| t.attempt == 1));
        }
        other => panic!("unexpected commands: {other:?}"),
    }
}

#[test]
fn failure_arms_a_retry_and_retry_due_redispatches() {
    init_tracing();
    let mut core = core(&[("a", &[])]);
    core.start(hour(2));

    let step = core.step(completed("a", 1, TaskOutcome::Failed("nope".into())), hour(2));
    assert!(step.keep_running);
    match step.commands.as_slice() {
        [CoreCommand::ArmRetry(retry)] => {
            assert_eq!(retry.task, "a");
            assert_eq!(retry.next_attempt, 2);
            assert_eq!(retry.delay, Duration::from_secs(300));
        }
        other => panic!("unexpected commands: {other:?}"),
    }

    let step = core.step(
        RunEvent::RetryDue {
            task: "a".into(),
            attempt: 2,
        },
        hour(2),
    );
    assert_eq!(dispatched(&step.commands), vec![("a".to_string(), 2)]);

    let step = core.step(completed("a", 2, TaskOutcome::Success(10)), hour(2));
    assert!(!step.keep_running);
    assert_eq!(step.commands, vec![CoreCommand::FinishRun]);
    assert!(core.is_finished());
    assert_eq!(core.outcome(), RunOutcome::Succeeded);
    assert_eq!(core.report().tasks["a"].rows_affected, Some(10));
}

#[test]
fn cancel_aborts_running_tasks_first_and_stops() {
    init_tracing();
    let mut core = core(&[("a", &[]), ("b", &["a"])]);
    core.start(hour(2));

    let step = core.step(RunEvent::CancelRequested, hour(2));
    assert!(!step.keep_running);
    assert_eq!(
        step.commands,
        vec![
            CoreCommand::AbortTasks(vec!["a".to_string()]),
            CoreCommand::FinishRun
        ]
    );
    assert_eq!(core.outcome(), RunOutcome::Failed);
    assert!(core.report().cancelled);

    // Cancelling a finished run still tells the shell to stop.
    let step = core.step(RunEvent::CancelRequested, hour(2));
    assert!(!step.keep_running);
    assert!(step.commands.is_empty());
}

#[test]
fn stale_events_produce_no_commands() {
    init_tracing();
    let mut core = core(&[("a", &[])]);
    core.start(hour(2));

    let step = core.step(completed("a", 5, TaskOutcome::Success(1)), hour(2));
    assert!(step.keep_running);
    assert!(step.commands.is_empty());

    let step = core.step(
        RunEvent::RetryDue {
            task: "a".into(),
            attempt: 2,
        },
        hour(2),
    );
    assert!(step.keep_running);
    assert!(step.commands.is_empty());
}
