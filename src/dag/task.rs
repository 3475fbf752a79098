// src/dag/task.rs

//! Static task definitions: the unit the graph is built from.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::TaskName;
use crate::operators::Operator;
use crate::types::OperatorKind;

/// Retry behaviour for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts in one run (at least 1).
    pub limit: u32,
    /// Wait between a failed attempt and the next one.
    pub delay: Duration,
    /// Double the delay after each failed attempt.
    pub exponential_backoff: bool,
    /// Cap for the backed-off delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            delay: Duration::from_secs(5 * 60),
            exponential_backoff: false,
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` attempts failed.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.limit
    }

    /// Delay before retrying after the given (1-based) attempt failed.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.delay;
        }

        let exp = failed_attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Cross-cutting task settings from `[default]`, passed by value into every
/// [`TaskSpec`] and then narrowed by [`TaskOverrides`].
#[derive(Debug, Clone, Default)]
pub struct TaskDefaults {
    pub owner: Option<String>,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
    /// Warehouse connection used when a task doesn't name one.
    pub conn_id: Option<String>,
}

/// Per-task overrides of [`TaskDefaults`]. `None` keeps the default.
#[derive(Debug, Clone, Default)]
pub struct TaskOverrides {
    pub owner: Option<String>,
    pub retry_limit: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub retry_exponential_backoff: Option<bool>,
    pub max_retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl TaskDefaults {
    pub fn apply(mut self, overrides: &TaskOverrides) -> Self {
        if let Some(owner) = &overrides.owner {
            self.owner = Some(owner.clone());
        }
        if let Some(limit) = overrides.retry_limit {
            self.retry.limit = limit;
        }
        if let Some(delay) = overrides.retry_delay {
            self.retry.delay = delay;
        }
        if let Some(exp) = overrides.retry_exponential_backoff {
            self.retry.exponential_backoff = exp;
        }
        if let Some(max) = overrides.max_retry_delay {
            self.retry.max_delay = max;
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout = Some(timeout);
        }
        self
    }
}

/// Opaque configuration of a task, kept for diagnostics and reports.
pub type TaskParams = BTreeMap<String, String>;

/// A named unit of work: operator plus its settings.
#[derive(Clone)]
pub struct TaskSpec {
    pub name: TaskName,
    pub kind: OperatorKind,
    pub operator: Arc<dyn Operator>,
    pub params: TaskParams,
    pub owner: Option<String>,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
}

impl TaskSpec {
    pub fn new(
        name: impl Into<TaskName>,
        kind: OperatorKind,
        operator: Arc<dyn Operator>,
        params: TaskParams,
        settings: TaskDefaults,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            operator,
            params,
            owner: settings.owner,
            retry: settings.retry,
            timeout: settings.timeout,
        }
    }

    /// Override the retry limit (builder style, mostly for tests).
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry.limit = limit.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
