// tests/runtime_fake_executor.rs

mod common;
use crate::common::builders::{DIMENSION_TASKS, PIPELINE_TASKS, pipeline_graph};
use crate::common::fake_executor::{ExecutionLog, FakeExecutor, FakeScript, LogEntry};
use crate::common::{hour, init_tracing, within};

use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use etldag::dag::{DagGraph, RunReport, Scheduler, SchedulerOptions};
use etldag::engine::{CoreRuntime, RunClock, RunEvent, Runtime};
use etldag::types::{RunOutcome, TaskState};

type TestResult = Result<(), Box<dyn Error>>;

/// One run of `graph` driven by a fake executor following `script`.
fn runtime(
    graph: DagGraph,
    script: FakeScript,
) -> (Runtime<FakeExecutor>, mpsc::Sender<RunEvent>, ExecutionLog) {
    let graph = Arc::new(graph);
    let (tx, rx) = mpsc::channel::<RunEvent>(64);
    let log = ExecutionLog::new();
    let executor = FakeExecutor::new(tx.clone(), Arc::new(script), log.clone());
    let scheduler = Scheduler::new(graph, 1, hour(5), SchedulerOptions::default());
    let runtime = Runtime::new(CoreRuntime::new(scheduler), tx.clone(), rx, executor)
        .with_clock(RunClock::starting_at(hour(5)));
    (runtime, tx, log)
}

async fn run(runtime: Runtime<FakeExecutor>) -> Result<RunReport, Box<dyn Error>> {
    Ok(within(Duration::from_secs(24 * 3600), runtime.run()).await?)
}

#[tokio::test(start_paused = true)]
async fn pipeline_runs_every_task_once_in_dependency_order() -> TestResult {
    init_tracing();
    let (runtime, _tx, log) = runtime(pipeline_graph(), FakeScript::new());

    let report = run(runtime).await?;

    assert_eq!(report.outcome, RunOutcome::Succeeded);
    let starts = log.starts(1);
    assert_eq!(starts.len(), 11);
    assert!(starts.iter().all(|(_, attempt)| *attempt == 1));

    // Every task starts after each of its upstream tasks finished.
    let graph = pipeline_graph();
    for task in PIPELINE_TASKS {
        let started = log.start_index(1, task, 1).unwrap();
        for upstream in graph.upstream_of(task) {
            let finished = log.finish_index(1, upstream, 1).unwrap();
            assert!(finished < started, "{task} started before {upstream} finished");
        }
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fact_load_waits_for_the_retried_staging_attempt() -> TestResult {
    init_tracing();
    let script = FakeScript::new()
        .fail("stage_songs", 1, "S3 throttled")
        .duration("stage_events", Duration::from_secs(30));
    let (runtime, _tx, log) = runtime(pipeline_graph(), script);

    let begun = Instant::now();
    let report = run(runtime).await?;

    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.tasks["stage_songs"].attempts, 2);
    assert_eq!(report.tasks["load_fact"].attempts, 1);

    let retry_finished = log.finish_index(1, "stage_songs", 2).unwrap();
    let fact_started = log.start_index(1, "load_fact", 1).unwrap();
    assert!(retry_finished < fact_started);

    // The default five-minute retry delay elapsed (in paused time).
    assert!(begun.elapsed() >= Duration::from_secs(300));
    let failed_at = report
        .transitions
        .iter()
        .find(|t| t.task == "stage_songs" && t.to == TaskState::Failed)
        .map(|t| t.at)
        .unwrap();
    let retried_at = report.tasks["stage_songs"].started_at.unwrap();
    assert!(retried_at - failed_at >= chrono::Duration::seconds(300));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn quality_exhausting_its_retries_fails_the_run() -> TestResult {
    init_tracing();
    let script = FakeScript::new().fail_always("quality", "songplays has 0 rows");
    let (runtime, _tx, log) = runtime(pipeline_graph(), script);

    let report = run(runtime).await?;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(!report.cancelled);
    assert_eq!(report.state_of("quality"), Some(TaskState::Exhausted));
    assert_eq!(report.tasks["quality"].attempts, 3);
    assert_eq!(report.state_of("end"), Some(TaskState::Skipped));
    for dim in DIMENSION_TASKS {
        assert_eq!(report.state_of(dim), Some(TaskState::Succeeded));
    }
    assert!(log.start_index(1, "end", 1).is_none());

    let err = report.into_result().expect_err("run failed");
    assert!(err.to_string().contains("songplays has 0 rows"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_request_aborts_the_hanging_task() -> TestResult {
    init_tracing();
    let script = FakeScript::new().hang("stage_songs");
    let (runtime, tx, log) = runtime(pipeline_graph(), script);

    let handle = tokio::spawn(runtime.run());

    // Let everything except the hanging branch finish.
    tokio::time::sleep(Duration::from_secs(60)).await;
    tx.send(RunEvent::CancelRequested).await?;

    let report = within(Duration::from_secs(60), handle).await??;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(report.cancelled);
    assert_eq!(report.state_of("stage_events"), Some(TaskState::Succeeded));
    assert_eq!(report.state_of("stage_songs"), Some(TaskState::Cancelled));
    assert_eq!(report.state_of("load_fact"), Some(TaskState::Cancelled));
    assert!(log.entries().contains(&LogEntry::Aborted {
        task: "stage_songs".to_string()
    }));
    Ok(())
}
