// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod logging;
pub mod operators;
pub mod resources;
pub mod schedule;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{DagGraph, RunReport};
use crate::engine::{Supervisor, SupervisorEvent, SupervisorOptions};
use crate::errors::EtlDagError;
use crate::exec::RealExecutorFactory;
use crate::resources::ResourceRegistry;
use crate::schedule::{TickPlanner, spawn_ticker};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - resource registry and DAG construction
/// - the supervisor and its executor factory
/// - tick planning (startup catchup + live ticker, or a single `--once` tick)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading pipeline from {}", config_path.display()))?;

    let registry = Arc::new(ResourceRegistry::from_config(&cfg.connection)?);
    let graph = Arc::new(DagGraph::from_config(&cfg)?);

    if args.dry_run {
        print_dry_run(&cfg, &graph);
        return Ok(());
    }

    let planner = TickPlanner::from_settings(&cfg.dag);
    let options = SupervisorOptions::from_settings(&cfg.dag).with_exit_when_idle(args.once);
    let supervisor = Supervisor::new(
        Arc::clone(&graph),
        RealExecutorFactory::new(registry),
        options,
    );

    let (ev_tx, ev_rx) = mpsc::channel::<SupervisorEvent>(64);

    // Ctrl-C → cancel active runs and stop.
    {
        let tx = ev_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; shutting down");
            let _ = tx.send(SupervisorEvent::Shutdown).await;
        });
    }

    if args.once {
        let now = Utc::now();
        let logical_date = match args.logical_date {
            Some(date) if planner.after_start(date) => date,
            Some(date) => {
                return Err(EtlDagError::ScheduleError(format!(
                    "logical date {date} is before start_date {}",
                    cfg.dag.start_date.map_or_else(String::new, |s| s.to_string())
                ))
                .into());
            }
            None => planner.latest_due_tick(now).ok_or_else(|| {
                EtlDagError::ScheduleError(format!(
                    "schedule '{}' has no tick due at or before {now} since start_date",
                    planner.schedule()
                ))
            })?,
        };
        info!(logical_date = %logical_date, "running a single tick");
        ev_tx.send(SupervisorEvent::Tick(logical_date)).await?;
        drop(ev_tx);

        let reports = supervisor.run(ev_rx).await?;
        if args.report_json {
            for report in &reports {
                print_report_json(report)?;
            }
        }

        return match reports.into_iter().next() {
            Some(report) => report.into_result().map(|_| ()).map_err(Into::into),
            None => Err(anyhow::anyhow!("run for {logical_date} did not produce a report")),
        };
    }

    let now = Utc::now();
    let startup = planner.startup_ticks(now);
    info!(
        ticks = startup.len(),
        schedule = %planner.schedule(),
        catchup = cfg.dag.catchup,
        "scheduling startup ticks"
    );
    for tick in startup {
        ev_tx.send(SupervisorEvent::Tick(tick)).await?;
    }
    let _ticker = spawn_ticker(planner, now, ev_tx.clone());

    // Reports are streamed instead of kept for the lifetime of the process.
    let (report_tx, mut report_rx) = mpsc::channel::<RunReport>(16);
    let print_json = args.report_json;
    let printer = tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            if print_json {
                if let Err(e) = print_report_json(&report) {
                    warn!(error = %e, "failed to print run report");
                }
            }
        }
    });

    drop(ev_tx);
    supervisor.with_report_sender(report_tx).run(ev_rx).await?;
    printer.await?;
    Ok(())
}

fn print_report_json(report: &RunReport) -> Result<()> {
    let line = serde_json::to_string(report).context("serialising run report")?;
    println!("{line}");
    Ok(())
}

/// Dry-run output: schedule, tasks in topological order, deps and params.
fn print_dry_run(cfg: &ConfigFile, graph: &DagGraph) {
    println!("etldag dry-run: {}", cfg.dag.dag_id);
    if let Some(desc) = &cfg.dag.description {
        println!("  {desc}");
    }
    println!("  schedule = {}", cfg.dag.schedule);
    match cfg.dag.start_date {
        Some(start) => println!("  start_date = {start}"),
        None => println!("  start_date = (none)"),
    }
    println!("  catchup = {}", cfg.dag.catchup);
    println!("  max_active_runs = {}", cfg.dag.max_active_runs);
    println!("  concurrency = {}", cfg.dag.concurrency);
    println!("  failure_grace = {:?}", cfg.dag.failure_grace);
    println!();

    let roots: Vec<String> = graph.roots().into_iter().collect();
    println!("roots: {}", roots.join(", "));
    println!("tasks ({}, topological order):", graph.len());
    for name in graph.tasks() {
        let Some(spec) = graph.task(name) else {
            continue;
        };
        println!("  - {name} [{}]", spec.kind);
        let upstream = graph.upstream_of(name);
        if !upstream.is_empty() {
            println!("      after: {}", upstream.join(", "));
        }
        for (key, value) in &spec.params {
            println!("      {key}: {value}");
        }
        println!(
            "      retries: {} attempt(s), delay {:?}{}",
            spec.retry.limit,
            spec.retry.delay,
            if spec.retry.exponential_backoff {
                " (exponential)"
            } else {
                ""
            }
        );
        if let Some(timeout) = spec.timeout {
            println!("      timeout: {timeout:?}");
        }
        if let Some(owner) = &spec.owner {
            println!("      owner: {owner}");
        }
    }

    debug!("dry-run complete (no execution)");
}
