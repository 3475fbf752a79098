// tests/graph_properties.rs
mod common;
use crate::common::builders::noop_spec;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use etldag::dag::{DagGraph, Scheduler, SchedulerOptions};
use etldag::engine::TaskOutcome;
use etldag::errors::EtlDagError;
use etldag::types::{RunOutcome, TaskState};

// Edges between `n` tasks named task_0..task_n, drawn as random index pairs.
fn edges_strategy(max_tasks: usize) -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1..=max_tasks).prop_flat_map(|n| {
        (
            Just(n),
            proptest::collection::vec((0..n, 0..n), 0..(n * 2)),
        )
    })
}

fn name(i: usize) -> String {
    format!("task_{i}")
}

/// Reference cycle check by repeatedly removing nodes with no incoming edges.
fn has_cycle(n: usize, edges: &BTreeSet<(usize, usize)>) -> bool {
    let mut remaining: BTreeSet<usize> = (0..n).collect();
    loop {
        let removable: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|node| {
                !edges
                    .iter()
                    .any(|(a, b)| b == node && remaining.contains(a))
            })
            .collect();
        if removable.is_empty() {
            return !remaining.is_empty();
        }
        for node in removable {
            remaining.remove(&node);
        }
    }
}

proptest! {
    #[test]
    fn build_succeeds_iff_graph_is_acyclic((n, raw) in edges_strategy(8)) {
        let edges: BTreeSet<(usize, usize)> = raw.into_iter().filter(|(a, b)| a != b).collect();
        let specs = (0..n).map(|i| noop_spec(&name(i))).collect();
        let named = edges.iter().map(|(a, b)| (name(*a), name(*b))).collect();

        match DagGraph::build(specs, named) {
            Ok(graph) => {
                prop_assert!(!has_cycle(n, &edges));
                // Every edge goes forward in the topological order.
                let position: BTreeMap<&str, usize> = graph
                    .topological_order()
                    .into_iter()
                    .enumerate()
                    .map(|(i, t)| (t, i))
                    .collect();
                for (a, b) in &edges {
                    prop_assert!(position[name(*a).as_str()] < position[name(*b).as_str()]);
                }
            }
            Err(EtlDagError::DagCycle { tasks }) => {
                prop_assert!(has_cycle(n, &edges));
                prop_assert!(!tasks.is_empty());
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    #[test]
    fn every_run_terminates_with_dependencies_respected(
        (n, raw) in edges_strategy(8),
        failing in proptest::collection::btree_set(0..8usize, 0..3),
    ) {
        // Only forward edges, so the graph is acyclic.
        let edges: BTreeSet<(usize, usize)> = raw
            .into_iter()
            .filter(|(a, b)| a < b)
            .collect();
        let specs = (0..n)
            .map(|i| noop_spec(&name(i)).with_retry_limit(2))
            .collect();
        let named = edges.iter().map(|(a, b)| (name(*a), name(*b))).collect();
        let graph = std::sync::Arc::new(DagGraph::build(specs, named).unwrap());

        let now = Utc.with_ymd_and_hms(2020, 3, 3, 0, 0, 0).unwrap();
        let mut scheduler = Scheduler::new(graph, 1, now, SchedulerOptions::default());

        let mut running: Vec<(String, u32)> = scheduler
            .start(now)
            .newly_scheduled
            .into_iter()
            .map(|t| (t.name, t.attempt))
            .collect();
        let mut succeeded = BTreeSet::new();
        let mut steps = 0;

        while let Some((task, attempt)) = running.pop() {
            steps += 1;
            prop_assert!(steps < 1000, "run did not converge");

            let index: usize = task.trim_start_matches("task_").parse().unwrap();
            // A task only ever starts after all of its upstream tasks succeeded.
            for (a, b) in &edges {
                if *b == index {
                    prop_assert!(succeeded.contains(a));
                }
            }

            let outcome = if failing.contains(&index) {
                TaskOutcome::Failed("boom".to_string())
            } else {
                succeeded.insert(index);
                TaskOutcome::Success(1)
            };
            let step = scheduler.handle_completion(&task, attempt, outcome, now);
            running.extend(step.newly_scheduled.into_iter().map(|t| (t.name, t.attempt)));
            for retry in step.retries {
                let step = scheduler.handle_retry_due(&retry.task, retry.next_attempt, now);
                running.extend(step.newly_scheduled.into_iter().map(|t| (t.name, t.attempt)));
            }
        }

        prop_assert!(scheduler.is_finished());
        let any_failing = failing.iter().any(|i| *i < n);
        let expected = if any_failing { RunOutcome::Failed } else { RunOutcome::Succeeded };
        prop_assert_eq!(scheduler.outcome(), expected);

        // A failing task either used its whole budget or sat below another
        // failing task and never ran.
        for i in failing.iter().filter(|i| **i < n) {
            let record = scheduler.record_of(&name(*i)).unwrap();
            match record.state {
                TaskState::Exhausted => prop_assert_eq!(record.attempts, 2),
                TaskState::Skipped => prop_assert_eq!(record.attempts, 0),
                other => prop_assert!(false, "unexpected state {other}"),
            }
        }
    }
}
