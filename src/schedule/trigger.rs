// src/schedule/trigger.rs

//! Turns the cron schedule into logical dates for runs.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::model::DagSettings;
use crate::engine::SupervisorEvent;

use super::cron::CronSchedule;

/// Decides which ticks become runs.
#[derive(Debug, Clone)]
pub struct TickPlanner {
    schedule: CronSchedule,
    start_date: Option<DateTime<Utc>>,
    catchup: bool,
    max_catchup_runs: usize,
}

impl TickPlanner {
    pub fn new(schedule: CronSchedule) -> Self {
        Self {
            schedule,
            start_date: None,
            catchup: false,
            max_catchup_runs: 100,
        }
    }

    pub fn from_settings(dag: &DagSettings) -> Self {
        Self {
            schedule: dag.schedule.clone(),
            start_date: dag.start_date,
            catchup: dag.catchup,
            max_catchup_runs: dag.max_catchup_runs.max(1),
        }
    }

    pub fn with_start_date(mut self, start_date: Option<DateTime<Utc>>) -> Self {
        self.start_date = start_date;
        self
    }

    pub fn with_catchup(mut self, catchup: bool, max_catchup_runs: usize) -> Self {
        self.catchup = catchup;
        self.max_catchup_runs = max_catchup_runs.max(1);
        self
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    /// Ticks to run on startup, oldest first.
    ///
    /// - Without catchup: only the most recent due tick.
    /// - With catchup: every due tick since `start_date`, keeping the most
    ///   recent `max_catchup_runs`.
    ///
    /// Ticks before `start_date` are never returned.
    pub fn startup_ticks(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let Some(latest) = self.latest_due_tick(now) else {
            return Vec::new();
        };
        if !self.catchup {
            return vec![latest];
        }

        let mut ticks = VecDeque::with_capacity(self.max_catchup_runs.min(1024));
        let mut current = Some(latest);
        while let Some(tick) = current {
            if !self.after_start(tick) || ticks.len() == self.max_catchup_runs {
                break;
            }
            ticks.push_front(tick);
            current = self.schedule.latest_at_or_before(tick - Duration::minutes(1));
        }

        debug!(count = ticks.len(), "catchup ticks planned");
        ticks.into()
    }

    /// First tick strictly after `t` that is not before `start_date`.
    pub fn next_tick_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.start_date {
            Some(start) if start > t => self.schedule.first_at_or_after(start),
            _ => self.schedule.next_after(t),
        }
    }

    /// Most recent tick at or before `now`, or `None` if it falls before
    /// `start_date`.
    pub fn latest_due_tick(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .latest_at_or_before(now)
            .filter(|tick| self.after_start(*tick))
    }

    /// Whether a run for `logical_date` is allowed by `start_date`.
    pub fn after_start(&self, logical_date: DateTime<Utc>) -> bool {
        self.start_date.is_none_or(|start| logical_date >= start)
    }
}

/// Spawn a task that sends a `Tick` for every schedule tick after `after`,
/// sleeping until each one is due.
///
/// The task ends when the receiver is dropped or the schedule has no
/// further ticks.
pub fn spawn_ticker(
    planner: TickPlanner,
    after: DateTime<Utc>,
    tx: mpsc::Sender<SupervisorEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = after;
        while let Some(next) = planner.next_tick_after(last) {
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!(next = %next, wait_secs = wait.as_secs(), "waiting for next tick");
            tokio::time::sleep(wait).await;

            info!(logical_date = %next, "schedule tick");
            if tx.send(SupervisorEvent::Tick(next)).await.is_err() {
                debug!("supervisor gone; ticker exiting");
                return;
            }
            last = next;
        }
        info!("schedule has no further ticks; ticker exiting");
    })
}
