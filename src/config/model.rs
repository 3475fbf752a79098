// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::dag::task::TaskDefaults;
use crate::schedule::CronSchedule;
use crate::types::{LoadMode, OperatorKind};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [dag]
/// dag_id = "sparkify_pipeline"
/// schedule = "0 * * * *"
/// start_date = "2020-03-03T00:00:00Z"
/// catchup = false
/// max_active_runs = 5
///
/// [default]
/// retry_limit = 3
/// retry_delay = "5m"
///
/// [connection.redshift]
/// kind = "warehouse"
/// backend = "memory"
///
/// [task.load_songplays]
/// operator = "load_fact"
/// conn_id = "redshift"
/// table = "songplays"
/// sql = "SELECT ... FROM staging_events ..."
/// after = ["stage_events", "stage_songs"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub dag: DagSection,

    /// Cross-cutting task defaults from `[default]`.
    #[serde(default)]
    pub default: DefaultSection,

    /// Named connections from `[connection.<id>]`.
    #[serde(default)]
    pub connection: BTreeMap<String, ConnectionConfig>,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[dag]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DagSection {
    #[serde(default = "default_dag_id")]
    pub dag_id: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Cron expression (`"0 * * * *"`) or macro (`"@hourly"`).
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// First logical date eligible for a run. Must be a quoted RFC 3339 string.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,

    /// Replay every missed tick since `start_date` on startup.
    #[serde(default)]
    pub catchup: bool,

    /// Upper bound on runs executing at the same time.
    #[serde(default = "default_max_active_runs")]
    pub max_active_runs: usize,

    /// Upper bound on tasks running at the same time inside one run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How long after the first exhausted task retries may still be scheduled.
    #[serde(default = "default_failure_grace")]
    pub failure_grace: String,

    /// Maximum number of ticks waiting for a free run slot.
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,

    /// With `catchup = true`, the most recent ticks kept on startup.
    #[serde(default = "default_max_catchup_runs")]
    pub max_catchup_runs: usize,
}

fn default_dag_id() -> String {
    "etldag".to_string()
}

fn default_schedule() -> String {
    "0 * * * *".to_string()
}

fn default_max_active_runs() -> usize {
    5
}

fn default_concurrency() -> usize {
    16
}

fn default_failure_grace() -> String {
    "30m".to_string()
}

fn default_queue_length() -> usize {
    16
}

fn default_max_catchup_runs() -> usize {
    100
}

impl Default for DagSection {
    fn default() -> Self {
        Self {
            dag_id: default_dag_id(),
            description: None,
            schedule: default_schedule(),
            start_date: None,
            catchup: false,
            max_active_runs: default_max_active_runs(),
            concurrency: default_concurrency(),
            failure_grace: default_failure_grace(),
            queue_length: default_queue_length(),
            max_catchup_runs: default_max_catchup_runs(),
        }
    }
}

/// `[default]` section: values applied to every task that does not override them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    #[serde(default)]
    pub owner: Option<String>,

    /// Maximum number of attempts per task per run.
    #[serde(default)]
    pub retry_limit: Option<u32>,

    #[serde(default)]
    pub retry_delay: Option<String>,

    #[serde(default)]
    pub retry_exponential_backoff: Option<bool>,

    #[serde(default)]
    pub max_retry_delay: Option<String>,

    /// Per-attempt timeout.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Default warehouse connection for tasks that need one.
    #[serde(default)]
    pub conn_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Warehouse,
    Credentials,
}

/// `[connection.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub kind: ConnectionKind,

    /// Warehouse backend. Only `"memory"` is built from config; other
    /// backends are registered programmatically.
    #[serde(default)]
    pub backend: Option<String>,

    /// In-memory backend: tables that exist at startup, with their row counts.
    #[serde(default)]
    pub tables: BTreeMap<String, u64>,

    /// In-memory backend: object-storage keys (`s3://bucket/key`) and the
    /// number of rows each one holds.
    #[serde(default)]
    pub objects: BTreeMap<String, u64>,

    /// Credentials: environment variable holding the access key id.
    #[serde(default)]
    pub access_key_id_env: Option<String>,

    /// Credentials: environment variable holding the secret key.
    #[serde(default)]
    pub secret_access_key_env: Option<String>,

    #[serde(default)]
    pub region: Option<String>,
}

/// `[task.<name>]` section.
///
/// Operator parameters are all optional here; `validate` checks that each
/// operator gets what it needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub operator: OperatorKind,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub conn_id: Option<String>,

    /// Object-storage credentials connection (stage operator).
    #[serde(default)]
    pub credentials_id: Option<String>,

    #[serde(default)]
    pub table: Option<String>,

    #[serde(default)]
    pub s3_bucket: Option<String>,

    /// Key prefix; may contain `{ds}`, `{ts}`, `{year}`, `{month}`, `{day}`.
    #[serde(default)]
    pub s3_key: Option<String>,

    /// Extra COPY options appended verbatim.
    #[serde(default)]
    pub extra_params: Option<String>,

    /// Inline SQL: transformation query for loads, script for `sql`.
    #[serde(default)]
    pub sql: Option<String>,

    /// SQL script file, relative to the config file.
    #[serde(default)]
    pub sql_file: Option<String>,

    #[serde(default)]
    pub mode: Option<LoadMode>,

    /// Tables checked by `data_quality`.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Check query with `{}` standing for the table name.
    #[serde(default)]
    pub sql_template: Option<String>,

    #[serde(default)]
    pub min_rows: Option<i64>,

    #[serde(default)]
    pub retry_limit: Option<u32>,

    #[serde(default)]
    pub retry_delay: Option<String>,

    #[serde(default)]
    pub retry_exponential_backoff: Option<bool>,

    #[serde(default)]
    pub max_retry_delay: Option<String>,

    #[serde(default)]
    pub timeout: Option<String>,
}

/// Validated `[dag]` settings with parsed schedule and durations.
#[derive(Debug, Clone)]
pub struct DagSettings {
    pub dag_id: String,
    pub description: Option<String>,
    pub schedule: CronSchedule,
    pub start_date: Option<DateTime<Utc>>,
    pub catchup: bool,
    pub max_active_runs: usize,
    pub concurrency: usize,
    pub failure_grace: Duration,
    pub queue_length: usize,
    pub max_catchup_runs: usize,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (or the loader), so code
/// holding a `ConfigFile` can rely on:
/// - every `after` entry naming a declared task,
/// - an acyclic task graph,
/// - every referenced connection being declared,
/// - operator parameters being present.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub dag: DagSettings,
    pub defaults: TaskDefaults,
    pub connection: BTreeMap<String, ConnectionConfig>,
    pub task: BTreeMap<String, TaskConfig>,
    /// Directory of the file this config was read from; `sql_file` paths
    /// are resolved against it.
    pub source_dir: Option<PathBuf>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        dag: DagSettings,
        defaults: TaskDefaults,
        connection: BTreeMap<String, ConnectionConfig>,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            dag,
            defaults,
            connection,
            task,
            source_dir: None,
        }
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }
}
