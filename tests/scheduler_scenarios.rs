// tests/scheduler_scenarios.rs
mod common;
use crate::common::builders::{DIMENSION_TASKS, noop_graph, noop_spec, pipeline_graph};
use crate::common::{hour, init_tracing};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use etldag::dag::{DagGraph, ScheduledTask, Scheduler, SchedulerOptions, SchedulerStep};
use etldag::engine::TaskOutcome;
use etldag::types::{RunOutcome, TaskState};

fn scheduler_for(graph: DagGraph) -> Scheduler {
    Scheduler::new(Arc::new(graph), 1, hour(5), SchedulerOptions::default())
}

fn names(tasks: &[ScheduledTask]) -> Vec<&str> {
    tasks.iter().map(|t| t.name.as_str()).collect()
}

fn ok(scheduler: &mut Scheduler, task: &str, now: DateTime<Utc>) -> SchedulerStep {
    let attempt = scheduler.record_of(task).unwrap().attempts;
    scheduler.handle_completion(task, attempt, TaskOutcome::Success(1), now)
}

fn fail(scheduler: &mut Scheduler, task: &str, now: DateTime<Utc>) -> SchedulerStep {
    let attempt = scheduler.record_of(task).unwrap().attempts;
    scheduler.handle_completion(task, attempt, TaskOutcome::Failed("boom".to_string()), now)
}

fn after(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    base + chrono::Duration::seconds(secs)
}

/// Drive the pipeline up to (and including) the fan-out after `load_fact`.
fn run_through_fact(scheduler: &mut Scheduler, now: DateTime<Utc>) {
    let step = scheduler.start(now);
    assert_eq!(names(&step.newly_scheduled), vec!["start"]);
    let step = ok(scheduler, "start", now);
    assert_eq!(names(&step.newly_scheduled), vec!["create_tables"]);
    let step = ok(scheduler, "create_tables", now);
    assert_eq!(names(&step.newly_scheduled), vec!["stage_events", "stage_songs"]);
    let step = ok(scheduler, "stage_events", now);
    assert!(step.newly_scheduled.is_empty());
    let step = ok(scheduler, "stage_songs", now);
    assert_eq!(names(&step.newly_scheduled), vec!["load_fact"]);
    let step = ok(scheduler, "load_fact", now);
    assert_eq!(names(&step.newly_scheduled), DIMENSION_TASKS.to_vec());
}

#[test]
fn every_task_succeeding_first_time_succeeds_the_run() {
    init_tracing();
    let mut s = scheduler_for(pipeline_graph());
    let now = hour(5);

    run_through_fact(&mut s, now);
    for dim in DIMENSION_TASKS.iter().take(3) {
        assert!(ok(&mut s, dim, now).newly_scheduled.is_empty());
    }
    let step = ok(&mut s, DIMENSION_TASKS[3], now);
    assert_eq!(names(&step.newly_scheduled), vec!["quality"]);
    let step = ok(&mut s, "quality", now);
    assert_eq!(names(&step.newly_scheduled), vec!["end"]);
    let step = ok(&mut s, "end", now);

    assert!(step.run_just_finished);
    assert_eq!(s.outcome(), RunOutcome::Succeeded);
    let report = s.report();
    assert!(report.succeeded());
    assert_eq!(report.tasks.len(), 11);
    assert!(report.tasks.values().all(|r| r.state == TaskState::Succeeded && r.attempts == 1));
    assert!(report.into_result().is_ok());
}

#[test]
fn quality_failing_every_attempt_fails_the_run_and_skips_end() {
    init_tracing();
    let mut s = scheduler_for(pipeline_graph());
    let mut now = hour(5);

    run_through_fact(&mut s, now);
    for dim in DIMENSION_TASKS {
        ok(&mut s, dim, now);
    }
    assert_eq!(s.state_of("quality"), Some(TaskState::Running));

    for attempt in 1..=3u32 {
        assert_eq!(s.record_of("quality").unwrap().attempts, attempt);
        let step = fail(&mut s, "quality", now);
        if attempt < 3 {
            assert_eq!(step.retries.len(), 1);
            assert_eq!(step.retries[0].next_attempt, attempt + 1);
            assert_eq!(step.retries[0].delay, Duration::from_secs(5 * 60));
            assert_eq!(s.state_of("quality"), Some(TaskState::Failed));
            assert!(!s.is_finished());

            now = after(now, 300);
            let step = s.handle_retry_due("quality", attempt + 1, now);
            assert_eq!(names(&step.newly_scheduled), vec!["quality"]);
            assert_eq!(step.newly_scheduled[0].attempt, attempt + 1);
        } else {
            assert!(step.retries.is_empty());
            assert_eq!(step.newly_exhausted, vec!["quality"]);
            assert_eq!(step.newly_skipped, vec!["end"]);
            assert!(step.run_just_finished);
        }
    }

    assert_eq!(s.outcome(), RunOutcome::Failed);
    assert_eq!(s.state_of("quality"), Some(TaskState::Exhausted));
    assert_eq!(s.state_of("end"), Some(TaskState::Skipped));
    for dim in DIMENSION_TASKS {
        assert_eq!(s.state_of(dim), Some(TaskState::Succeeded));
    }

    let err = s.report().into_result().expect_err("failed run is an error");
    let msg = err.to_string();
    assert!(msg.contains("quality"), "{msg}");
    assert!(msg.contains("3 attempt"), "{msg}");
}

#[test]
fn join_waits_for_the_retried_branch() {
    init_tracing();
    let mut s = scheduler_for(pipeline_graph());
    let now = hour(5);

    s.start(now);
    ok(&mut s, "start", now);
    ok(&mut s, "create_tables", now);

    let step = fail(&mut s, "stage_songs", now);
    assert_eq!(step.retries.len(), 1);
    assert_eq!(s.state_of("stage_songs"), Some(TaskState::Failed));

    // The other branch finishing is not enough for the join.
    let step = ok(&mut s, "stage_events", now);
    assert!(step.newly_scheduled.is_empty());
    assert_eq!(s.state_of("load_fact"), Some(TaskState::Pending));
    assert_eq!(s.deps_satisfied("load_fact"), Some(false));

    let later = after(now, 300);
    let step = s.handle_retry_due("stage_songs", 2, later);
    assert_eq!(names(&step.newly_scheduled), vec!["stage_songs"]);
    assert_eq!(step.newly_scheduled[0].attempt, 2);
    assert_eq!(s.state_of("load_fact"), Some(TaskState::Pending));

    let step = ok(&mut s, "stage_songs", later);
    assert_eq!(names(&step.newly_scheduled), vec!["load_fact"]);
    assert_eq!(s.deps_satisfied("load_fact"), Some(true));

    ok(&mut s, "load_fact", later);
    for dim in DIMENSION_TASKS {
        ok(&mut s, dim, later);
    }
    ok(&mut s, "quality", later);
    ok(&mut s, "end", later);

    assert_eq!(s.outcome(), RunOutcome::Succeeded);
    assert_eq!(s.record_of("stage_songs").unwrap().attempts, 2);

    // The failed attempt stays visible in the transition history.
    let report = s.report();
    assert!(report.transitions.iter().any(|t| t.task == "stage_songs"
        && t.to == TaskState::Failed
        && t.attempt == 1
        && t.error.as_deref() == Some("boom")));
}

#[test]
fn independent_branch_keeps_running_after_a_sibling_exhausts() {
    init_tracing();
    let graph = noop_graph(&[("a", &[]), ("b", &["a"]), ("c", &[]), ("d", &["c"])])
        .unwrap();
    // Ties in the topological order are broken by name.
    assert_eq!(graph.topological_order(), vec!["a", "b", "c", "d"]);

    let mut s = Scheduler::new(Arc::new(graph), 7, hour(1), SchedulerOptions::default());
    let now = hour(1);
    let step = s.start(now);
    assert_eq!(names(&step.newly_scheduled), vec!["a", "c"]);

    // Exhaust `a` (three attempts by default).
    let mut t = now;
    for attempt in 1..=3 {
        let step = fail(&mut s, "a", t);
        if attempt < 3 {
            t = after(t, 300);
            s.handle_retry_due("a", attempt + 1, t);
        } else {
            assert_eq!(step.newly_skipped, vec!["b"]);
        }
    }
    assert!(s.has_failed());
    assert!(!s.is_finished());

    let step = ok(&mut s, "c", t);
    assert_eq!(names(&step.newly_scheduled), vec!["d"]);
    let step = ok(&mut s, "d", t);
    assert!(step.run_just_finished);
    assert_eq!(s.outcome(), RunOutcome::Failed);
    assert_eq!(s.tasks_in(TaskState::Succeeded), vec!["c", "d"]);
}

/// `a` exhausts on its first failure; `b` retries after `b_delay` seconds.
fn grace_scheduler(b_delay: u64, grace: u64) -> Scheduler {
    let tasks = vec![
        noop_spec("a").with_retry_limit(1),
        noop_spec("b").with_retry_delay(Duration::from_secs(b_delay)),
    ];
    let graph = DagGraph::build(tasks, Vec::new()).unwrap();
    let options = SchedulerOptions {
        failure_grace: Duration::from_secs(grace),
        ..SchedulerOptions::default()
    };
    Scheduler::new(Arc::new(graph), 1, hour(0), options)
}

#[test]
fn retry_due_after_the_grace_period_is_abandoned_when_it_fires() {
    init_tracing();
    let mut s = grace_scheduler(30, 60);
    let t = hour(0);
    s.start(t);

    let step = fail(&mut s, "a", t);
    assert_eq!(step.newly_exhausted, vec!["a"]);

    // `b` fails inside the grace period and its retry is due before it closes...
    let step = fail(&mut s, "b", t);
    assert_eq!(step.retries.len(), 1);
    assert_eq!(s.state_of("b"), Some(TaskState::Failed));

    // ...but the timer only fires after the window closed.
    let step = s.handle_retry_due("b", 2, after(t, 300));
    assert!(step.newly_scheduled.is_empty());
    assert_eq!(step.newly_exhausted, vec!["b"]);
    assert!(step.run_just_finished);
    let record = s.record_of("b").unwrap();
    assert_eq!(record.attempts, 1);
    assert!(record.last_error.as_deref().unwrap().contains("grace"));
}

#[test]
fn retry_that_would_land_past_the_grace_deadline_exhausts_immediately() {
    init_tracing();
    let mut s = grace_scheduler(3600, 60);
    let t = hour(0);
    s.start(t);

    fail(&mut s, "a", t);
    let step = fail(&mut s, "b", after(t, 10));

    assert!(step.retries.is_empty());
    assert_eq!(step.newly_exhausted, vec!["b"]);
    assert!(step.run_just_finished);
    assert_eq!(s.outcome(), RunOutcome::Failed);
    let record = s.record_of("b").unwrap();
    assert_eq!(record.state, TaskState::Exhausted);
    assert_eq!(record.attempts, 1);
    let error = record.last_error.as_deref().unwrap();
    assert!(error.contains("grace"));
    assert!(error.contains("boom"));
}

#[test]
fn first_exhaustion_abandons_pending_retries_due_after_the_deadline() {
    init_tracing();
    let mut s = grace_scheduler(3600, 60);
    let t = hour(0);
    s.start(t);

    // `b` is waiting on a one-hour retry when `a` exhausts.
    let step = fail(&mut s, "b", t);
    assert_eq!(step.retries.len(), 1);

    let step = fail(&mut s, "a", after(t, 5));
    assert_eq!(step.newly_exhausted, vec!["a", "b"]);
    assert!(step.run_just_finished);
    assert_eq!(s.state_of("b"), Some(TaskState::Exhausted));

    // The timer firing later changes nothing.
    let step = s.handle_retry_due("b", 2, after(t, 3600));
    assert!(step.is_empty());
}

#[test]
fn pending_retry_inside_the_grace_period_survives_an_exhaustion() {
    init_tracing();
    let mut s = grace_scheduler(30, 600);
    let t = hour(0);
    s.start(t);

    fail(&mut s, "b", t);
    let step = fail(&mut s, "a", after(t, 5));
    assert_eq!(step.newly_exhausted, vec!["a"]);
    assert!(!step.run_just_finished);
    assert_eq!(s.state_of("b"), Some(TaskState::Failed));

    let step = s.handle_retry_due("b", 2, after(t, 30));
    assert_eq!(names(&step.newly_scheduled), vec!["b"]);
    let step = ok(&mut s, "b", after(t, 31));
    assert!(step.run_just_finished);
    assert_eq!(s.state_of("b"), Some(TaskState::Succeeded));
    assert_eq!(s.outcome(), RunOutcome::Failed);
}

#[test]
fn stale_and_duplicate_completions_are_ignored() {
    init_tracing();
    let mut s = scheduler_for(noop_graph(&[("a", &[]), ("b", &["a"])]).unwrap());
    let now = hour(5);
    s.start(now);

    // Wrong attempt number.
    let step = s.handle_completion("a", 2, TaskOutcome::Success(1), now);
    assert!(step.is_empty());
    assert_eq!(s.state_of("a"), Some(TaskState::Running));

    let step = ok(&mut s, "a", now);
    assert_eq!(names(&step.newly_scheduled), vec!["b"]);

    // Same completion again.
    let step = s.handle_completion("a", 1, TaskOutcome::Success(1), now);
    assert!(step.is_empty());

    // Unknown task.
    let step = s.handle_completion("ghost", 1, TaskOutcome::Success(1), now);
    assert!(step.is_empty());

    // A retry timer for a task that is not waiting to retry.
    let step = s.handle_retry_due("b", 2, now);
    assert!(step.is_empty());
    assert_eq!(s.state_of("b"), Some(TaskState::Running));
}

#[test]
fn timeout_counts_as_a_failed_attempt() {
    init_tracing();
    let mut s = scheduler_for(noop_graph(&[("a", &[])]).unwrap());
    let now = hour(5);
    s.start(now);

    let step = s.handle_completion("a", 1, TaskOutcome::TimedOut(Duration::from_secs(2)), now);
    assert_eq!(step.retries.len(), 1);
    let record = s.record_of("a").unwrap();
    assert_eq!(record.state, TaskState::Failed);
    assert!(record.last_error.as_deref().unwrap().contains("timed out"));
}

#[test]
fn concurrency_limits_tasks_running_in_one_run() {
    init_tracing();
    let options = SchedulerOptions {
        concurrency: 2,
        ..SchedulerOptions::default()
    };
    let mut s = Scheduler::new(Arc::new(pipeline_graph()), 1, hour(5), options);
    let now = hour(5);

    s.start(now);
    ok(&mut s, "start", now);
    ok(&mut s, "create_tables", now);
    ok(&mut s, "stage_events", now);
    ok(&mut s, "stage_songs", now);
    let step = ok(&mut s, "load_fact", now);
    assert_eq!(names(&step.newly_scheduled), vec!["load_dim_artist", "load_dim_song"]);
    assert_eq!(s.tasks_in(TaskState::Ready), vec!["load_dim_time", "load_dim_user"]);

    let step = ok(&mut s, "load_dim_song", now);
    assert_eq!(names(&step.newly_scheduled), vec!["load_dim_time"]);
    assert_eq!(s.tasks_in(TaskState::Running).len(), 2);
}

#[test]
fn cancel_stops_every_unfinished_task() {
    init_tracing();
    let mut s = scheduler_for(pipeline_graph());
    let now = hour(5);
    s.start(now);
    ok(&mut s, "start", now);
    ok(&mut s, "create_tables", now);
    ok(&mut s, "stage_events", now);

    let step = s.cancel(now);
    assert_eq!(step.to_abort, vec!["stage_songs"]);
    assert_eq!(step.newly_cancelled.len(), 8);
    assert!(step.run_just_finished);

    assert_eq!(s.outcome(), RunOutcome::Failed);
    assert_eq!(s.state_of("stage_events"), Some(TaskState::Succeeded));
    assert_eq!(s.state_of("stage_songs"), Some(TaskState::Cancelled));
    assert_eq!(s.state_of("end"), Some(TaskState::Cancelled));

    let report = s.report();
    assert!(report.cancelled);
    assert!(report.into_result().is_err());

    // Late completion of the aborted attempt changes nothing.
    let step = s.handle_completion("stage_songs", 1, TaskOutcome::Success(1), now);
    assert!(step.is_empty());
    assert!(s.cancel(now).is_empty());
}

#[test]
fn exponential_backoff_doubles_up_to_the_cap() {
    let graph = noop_graph(&[("a", &[])]).unwrap();
    let spec = graph.task("a").unwrap();
    let mut retry = spec.retry;
    retry.exponential_backoff = true;
    retry.delay = Duration::from_secs(60);
    retry.max_delay = Duration::from_secs(200);

    assert_eq!(retry.delay_for(1), Duration::from_secs(60));
    assert_eq!(retry.delay_for(2), Duration::from_secs(120));
    assert_eq!(retry.delay_for(3), Duration::from_secs(200));
    assert_eq!(retry.delay_for(40), Duration::from_secs(200));
}
