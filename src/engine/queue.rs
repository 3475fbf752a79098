// src/engine/queue.rs

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// What happened to a tick offered to the [`RunQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A run slot is free: start the run now.
    Start,
    /// Every slot is busy; the tick waits in the queue.
    Queued,
    /// A run for this logical date is already active or queued.
    Duplicate,
}

/// Admission control for runs, bounded by `max_active_runs`.
///
/// Semantics:
/// - Up to `max_active` runs execute at once; each is identified by its
///   logical date.
/// - Ticks arriving while every slot is busy wait in FIFO order. At most
///   `queue_length` wait; when the queue is full the **oldest** waiting tick
///   is dropped so the freshest data wins.
/// - A tick whose logical date is already active or waiting is ignored.
/// - When a run completes, [`RunQueue::complete`] hands back the next
///   waiting tick (if any), which the caller must start.
#[derive(Debug)]
pub struct RunQueue {
    max_active: usize,
    queue_length: usize,
    active: BTreeSet<DateTime<Utc>>,
    pending: VecDeque<DateTime<Utc>>,
}

impl RunQueue {
    /// `max_active` and `queue_length` are clamped to at least 1.
    pub fn new(max_active: usize, queue_length: usize) -> Self {
        Self {
            max_active: max_active.max(1),
            queue_length: queue_length.max(1),
            active: BTreeSet::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing runs and nothing waits.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty()
    }

    pub fn is_active(&self, logical_date: DateTime<Utc>) -> bool {
        self.active.contains(&logical_date)
    }

    pub fn pending(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.pending.iter()
    }

    /// Offer a tick. On [`Admission::Start`] the date is already counted as
    /// active.
    pub fn admit(&mut self, logical_date: DateTime<Utc>) -> Admission {
        if self.active.contains(&logical_date) || self.pending.contains(&logical_date) {
            debug!(logical_date = %logical_date, "tick already active or queued; ignoring");
            return Admission::Duplicate;
        }

        if self.active.len() < self.max_active {
            self.active.insert(logical_date);
            return Admission::Start;
        }

        if self.pending.len() >= self.queue_length {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(
                    dropped = %dropped,
                    queue_length = self.queue_length,
                    "run queue full; dropping oldest waiting tick"
                );
            }
        }
        self.pending.push_back(logical_date);
        debug!(
            logical_date = %logical_date,
            waiting = self.pending.len(),
            "all run slots busy; tick queued"
        );
        Admission::Queued
    }

    /// Mark a run finished and promote the next waiting tick, which is
    /// returned already counted as active.
    pub fn complete(&mut self, logical_date: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.active.remove(&logical_date) {
            warn!(logical_date = %logical_date, "completion for unknown run; ignoring");
        }

        if self.active.len() >= self.max_active {
            return None;
        }

        let next = self.pending.pop_front()?;
        self.active.insert(next);
        Some(next)
    }

    /// Drop every waiting tick, returning them oldest first.
    pub fn clear_pending(&mut self) -> Vec<DateTime<Utc>> {
        self.pending.drain(..).collect()
    }
}
