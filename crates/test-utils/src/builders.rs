#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use etldag::config::{
    ConfigFile, ConnectionConfig, ConnectionKind, DagSection, DefaultSection, RawConfigFile,
    TaskConfig,
};
use etldag::dag::{DagGraph, TaskDefaults, TaskParams, TaskSpec};
use etldag::errors::Result;
use etldag::operators::{NoopOperator, Operator};
use etldag::types::{LoadMode, OperatorKind};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                dag: DagSection::default(),
                default: DefaultSection::default(),
                connection: BTreeMap::new(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn schedule(mut self, expr: &str) -> Self {
        self.config.dag.schedule = expr.to_string();
        self
    }

    pub fn start_date(mut self, start: DateTime<Utc>) -> Self {
        self.config.dag.start_date = Some(start);
        self
    }

    pub fn catchup(mut self, catchup: bool) -> Self {
        self.config.dag.catchup = catchup;
        self
    }

    pub fn max_active_runs(mut self, n: usize) -> Self {
        self.config.dag.max_active_runs = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.dag.concurrency = n;
        self
    }

    pub fn queue_length(mut self, n: usize) -> Self {
        self.config.dag.queue_length = n;
        self
    }

    pub fn failure_grace(mut self, grace: &str) -> Self {
        self.config.dag.failure_grace = grace.to_string();
        self
    }

    pub fn default_retry_limit(mut self, limit: u32) -> Self {
        self.config.default.retry_limit = Some(limit);
        self
    }

    pub fn default_retry_delay(mut self, delay: &str) -> Self {
        self.config.default.retry_delay = Some(delay.to_string());
        self
    }

    pub fn default_conn_id(mut self, id: &str) -> Self {
        self.config.default.conn_id = Some(id.to_string());
        self
    }

    /// Declare an in-memory warehouse connection.
    pub fn with_warehouse(self, id: &str) -> Self {
        self.with_seeded_warehouse(id, &[], &[])
    }

    /// Declare an in-memory warehouse with existing tables and objects.
    pub fn with_seeded_warehouse(
        mut self,
        id: &str,
        tables: &[(&str, u64)],
        objects: &[(&str, u64)],
    ) -> Self {
        self.config.connection.insert(
            id.to_string(),
            ConnectionConfig {
                kind: ConnectionKind::Warehouse,
                backend: Some("memory".to_string()),
                tables: tables.iter().map(|(t, n)| (t.to_string(), *n)).collect(),
                objects: objects.iter().map(|(k, n)| (k.to_string(), *n)).collect(),
                access_key_id_env: None,
                secret_access_key_env: None,
                region: None,
            },
        );
        self
    }

    /// Declare an object-store credentials connection read from env vars.
    pub fn with_credentials(mut self, id: &str, key_env: &str, secret_env: &str) -> Self {
        self.config.connection.insert(
            id.to_string(),
            ConnectionConfig {
                kind: ConnectionKind::Credentials,
                backend: None,
                tables: BTreeMap::new(),
                objects: BTreeMap::new(),
                access_key_id_env: Some(key_env.to_string()),
                secret_access_key_env: Some(secret_env.to_string()),
                region: Some("us-west-2".to_string()),
            },
        );
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(operator: OperatorKind) -> Self {
        Self {
            task: TaskConfig {
                operator,
                ..TaskConfig::default()
            },
        }
    }

    pub fn noop() -> Self {
        Self::new(OperatorKind::Noop)
    }

    pub fn sql(conn_id: &str, sql: &str) -> Self {
        Self::new(OperatorKind::Sql).conn_id(conn_id).with_sql(sql)
    }

    pub fn stage(conn_id: &str, credentials_id: &str, table: &str, bucket: &str, key: &str) -> Self {
        let mut b = Self::new(OperatorKind::StageToWarehouse)
            .conn_id(conn_id)
            .table(table);
        b.task.credentials_id = Some(credentials_id.to_string());
        b.task.s3_bucket = Some(bucket.to_string());
        b.task.s3_key = Some(key.to_string());
        b
    }

    pub fn load_fact(conn_id: &str, table: &str, sql: &str) -> Self {
        Self::new(OperatorKind::LoadFact)
            .conn_id(conn_id)
            .table(table)
            .with_sql(sql)
    }

    pub fn load_dimension(conn_id: &str, table: &str, sql: &str) -> Self {
        Self::new(OperatorKind::LoadDimension)
            .conn_id(conn_id)
            .table(table)
            .with_sql(sql)
    }

    pub fn quality(conn_id: &str, tables: &[&str]) -> Self {
        let mut b = Self::new(OperatorKind::DataQuality).conn_id(conn_id);
        b.task.tables = tables.iter().map(|t| t.to_string()).collect();
        b
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn conn_id(mut self, id: &str) -> Self {
        self.task.conn_id = Some(id.to_string());
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.task.table = Some(table.to_string());
        self
    }

    pub fn with_sql(mut self, sql: &str) -> Self {
        self.task.sql = Some(sql.to_string());
        self
    }

    pub fn sql_file(mut self, path: &str) -> Self {
        self.task.sql_file = Some(path.to_string());
        self
    }

    pub fn mode(mut self, mode: LoadMode) -> Self {
        self.task.mode = Some(mode);
        self
    }

    pub fn extra_params(mut self, extra: &str) -> Self {
        self.task.extra_params = Some(extra.to_string());
        self
    }

    pub fn sql_template(mut self, template: &str) -> Self {
        self.task.sql_template = Some(template.to_string());
        self
    }

    pub fn min_rows(mut self, min: i64) -> Self {
        self.task.min_rows = Some(min);
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.task.retry_limit = Some(limit);
        self
    }

    pub fn retry_delay(mut self, delay: &str) -> Self {
        self.task.retry_delay = Some(delay.to_string());
        self
    }

    pub fn exponential_backoff(mut self, max_delay: &str) -> Self {
        self.task.retry_exponential_backoff = Some(true);
        self.task.max_retry_delay = Some(max_delay.to_string());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.task.timeout = Some(timeout.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Task names of the reference pipeline, in a valid topological order.
pub const PIPELINE_TASKS: [&str; 11] = [
    "start",
    "create_tables",
    "stage_events",
    "stage_songs",
    "load_fact",
    "load_dim_artist",
    "load_dim_song",
    "load_dim_time",
    "load_dim_user",
    "quality",
    "end",
];

pub const DIMENSION_TASKS: [&str; 4] = [
    "load_dim_artist",
    "load_dim_song",
    "load_dim_time",
    "load_dim_user",
];

/// `(upstream, downstream)` edges of the reference pipeline: start fans out
/// through table creation to two staging branches, joins at the fact load,
/// fans out to four dimension loads and joins again at the quality check.
pub fn pipeline_edges() -> Vec<(String, String)> {
    let mut edges = vec![
        ("start", "create_tables"),
        ("create_tables", "stage_events"),
        ("create_tables", "stage_songs"),
        ("stage_events", "load_fact"),
        ("stage_songs", "load_fact"),
    ];
    for dim in DIMENSION_TASKS {
        edges.push(("load_fact", dim));
        edges.push((dim, "quality"));
    }
    edges.push(("quality", "end"));
    edges
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

/// A task spec running `operator` with default settings.
pub fn spec_with(name: &str, kind: OperatorKind, operator: Arc<dyn Operator>) -> TaskSpec {
    TaskSpec::new(name, kind, operator, TaskParams::new(), TaskDefaults::default())
}

pub fn noop_spec(name: &str) -> TaskSpec {
    spec_with(name, OperatorKind::Noop, Arc::new(NoopOperator))
}

/// Graph from `(name, upstreams)` pairs, every task a noop.
pub fn noop_graph(tasks: &[(&str, &[&str])]) -> Result<DagGraph> {
    let specs = tasks.iter().map(|(name, _)| noop_spec(name)).collect();
    let edges = tasks
        .iter()
        .flat_map(|(name, deps)| deps.iter().map(move |d| (d.to_string(), name.to_string())))
        .collect();
    DagGraph::build(specs, edges)
}

/// The reference pipeline with noop operators, for scheduler tests that
/// drive completions by hand or through a fake executor.
pub fn pipeline_graph() -> DagGraph {
    let specs = PIPELINE_TASKS.iter().map(|n| noop_spec(n)).collect();
    DagGraph::build(specs, pipeline_edges()).expect("reference pipeline is a valid DAG")
}

/// The reference pipeline as a config against an in-memory warehouse
/// called `redshift` and credentials called `aws_credentials`.
///
/// The warehouse starts without tables; `create_tables` creates them.
/// Objects under `s3://udacity-dend/log_data/` and `.../song_data/` hold
/// `events` and `songs` rows respectively.
pub fn pipeline_config(events: u64, songs: u64) -> ConfigFileBuilder {
    let create_tables = "\
        CREATE TABLE IF NOT EXISTS staging_events (ts BIGINT);\n\
        CREATE TABLE IF NOT EXISTS staging_songs (song_id VARCHAR);\n\
        CREATE TABLE IF NOT EXISTS songplays (playid VARCHAR);\n\
        CREATE TABLE IF NOT EXISTS users (userid INT);\n\
        CREATE TABLE IF NOT EXISTS songs (songid VARCHAR);\n\
        CREATE TABLE IF NOT EXISTS artists (artistid VARCHAR);\n\
        CREATE TABLE IF NOT EXISTS time (start_time TIMESTAMP);";

    let mut builder = ConfigFileBuilder::new()
        .with_seeded_warehouse(
            "redshift",
            &[],
            &[
                ("s3://udacity-dend/log_data/2018/11/events-1.json", events),
                ("s3://udacity-dend/song_data/A/A/songs.json", songs),
            ],
        )
        .with_credentials("aws_credentials", "ETLDAG_TEST_KEY", "ETLDAG_TEST_SECRET")
        .default_conn_id("redshift")
        .default_retry_delay("1s")
        .with_task("start", TaskConfigBuilder::noop().build())
        .with_task(
            "create_tables",
            TaskConfigBuilder::sql("redshift", create_tables)
                .after("start")
                .build(),
        )
        .with_task(
            "stage_events",
            TaskConfigBuilder::stage(
                "redshift",
                "aws_credentials",
                "staging_events",
                "udacity-dend",
                "log_data/",
            )
            .extra_params("format as json 's3://udacity-dend/log_json_path.json'")
            .after("create_tables")
            .build(),
        )
        .with_task(
            "stage_songs",
            TaskConfigBuilder::stage(
                "redshift",
                "aws_credentials",
                "staging_songs",
                "udacity-dend",
                "song_data/",
            )
            .extra_params("json 'auto' compupdate off")
            .after("create_tables")
            .build(),
        )
        .with_task(
            "load_fact",
            TaskConfigBuilder::load_fact(
                "redshift",
                "songplays",
                "SELECT e.ts, e.userid, s.song_id FROM staging_events e \
                 LEFT JOIN staging_songs s ON e.song = s.title WHERE e.page = 'NextSong'",
            )
            .after("stage_events")
            .after("stage_songs")
            .build(),
        );

    for (task, table, sql) in [
        ("load_dim_user", "users", "SELECT DISTINCT userid FROM staging_events"),
        ("load_dim_song", "songs", "SELECT DISTINCT song_id FROM staging_songs"),
        ("load_dim_artist", "artists", "SELECT DISTINCT artist_id FROM staging_songs"),
        (
            "load_dim_time",
            "time",
            "SELECT start_time, extract(hour from start_time) FROM songplays",
        ),
    ] {
        builder = builder.with_task(
            task,
            TaskConfigBuilder::load_dimension("redshift", table, sql)
                .after("load_fact")
                .build(),
        );
    }

    let mut quality = TaskConfigBuilder::quality(
        "redshift",
        &["songplays", "users", "songs", "artists", "time"],
    );
    for dim in DIMENSION_TASKS {
        quality = quality.after(dim);
    }

    builder
        .with_task("quality", quality.build())
        .with_task("end", TaskConfigBuilder::noop().after("quality").build())
}
