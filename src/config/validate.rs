// src/config/validate.rs

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, ConnectionKind, DagSettings, DefaultSection, RawConfigFile, TaskConfig,
};
use crate::dag::task::{RetryPolicy, TaskDefaults, TaskOverrides};
use crate::errors::{EtlDagError, Result};
use crate::schedule::CronSchedule;
use crate::types::OperatorKind;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::EtlDagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        let dag = validate_dag_section(&raw)?;
        let defaults = task_defaults(&raw.default)?;
        validate_connections(&raw)?;
        validate_task_dependencies(&raw)?;
        validate_tasks(&raw)?;
        validate_dag(&raw)?;
        Ok(ConfigFile::new_unchecked(
            dag,
            defaults,
            raw.connection,
            raw.task,
        ))
    }
}

impl TaskConfig {
    /// Parsed per-task overrides of the `[default]` section.
    pub fn overrides(&self) -> Result<TaskOverrides> {
        if self.retry_limit == Some(0) {
            return Err(EtlDagError::ConfigError(
                "retry_limit must be >= 1 (it counts attempts, including the first)".to_string(),
            ));
        }
        Ok(TaskOverrides {
            owner: self.owner.clone(),
            retry_limit: self.retry_limit,
            retry_delay: opt_duration("retry_delay", self.retry_delay.as_deref())?,
            retry_exponential_backoff: self.retry_exponential_backoff,
            max_retry_delay: opt_duration("max_retry_delay", self.max_retry_delay.as_deref())?,
            timeout: opt_duration("timeout", self.timeout.as_deref())?,
        })
    }
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(EtlDagError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_dag_section(cfg: &RawConfigFile) -> Result<DagSettings> {
    let dag = &cfg.dag;

    if dag.dag_id.trim().is_empty() {
        return Err(EtlDagError::ConfigError(
            "[dag].dag_id must not be empty".to_string(),
        ));
    }

    for (field, value) in [
        ("max_active_runs", dag.max_active_runs),
        ("concurrency", dag.concurrency),
        ("queue_length", dag.queue_length),
        ("max_catchup_runs", dag.max_catchup_runs),
    ] {
        if value == 0 {
            return Err(EtlDagError::ConfigError(format!(
                "[dag].{field} must be >= 1 (got 0)"
            )));
        }
    }

    let schedule = CronSchedule::parse(&dag.schedule)?;
    let failure_grace = parse_duration(&dag.failure_grace)
        .map_err(|e| EtlDagError::ConfigError(format!("[dag].failure_grace: {e}")))?;

    Ok(DagSettings {
        dag_id: dag.dag_id.clone(),
        description: dag.description.clone(),
        schedule,
        start_date: dag.start_date,
        catchup: dag.catchup,
        max_active_runs: dag.max_active_runs,
        concurrency: dag.concurrency,
        failure_grace,
        queue_length: dag.queue_length,
        max_catchup_runs: dag.max_catchup_runs,
    })
}

fn task_defaults(section: &DefaultSection) -> Result<TaskDefaults> {
    let in_default = |e: EtlDagError| match e {
        EtlDagError::ConfigError(msg) => EtlDagError::ConfigError(format!("[default]: {msg}")),
        other => other,
    };

    let mut retry = RetryPolicy::default();
    if let Some(limit) = section.retry_limit {
        if limit == 0 {
            return Err(EtlDagError::ConfigError(
                "[default].retry_limit must be >= 1 (it counts attempts, including the first)"
                    .to_string(),
            ));
        }
        retry.limit = limit;
    }
    if let Some(delay) = opt_duration("retry_delay", section.retry_delay.as_deref()).map_err(in_default)? {
        retry.delay = delay;
    }
    if let Some(exp) = section.retry_exponential_backoff {
        retry.exponential_backoff = exp;
    }
    if let Some(max) =
        opt_duration("max_retry_delay", section.max_retry_delay.as_deref()).map_err(in_default)?
    {
        retry.max_delay = max;
    }

    Ok(TaskDefaults {
        owner: section.owner.clone(),
        retry,
        timeout: opt_duration("timeout", section.timeout.as_deref()).map_err(in_default)?,
        conn_id: section.conn_id.clone(),
    })
}

fn validate_connections(cfg: &RawConfigFile) -> Result<()> {
    for (id, conn) in cfg.connection.iter() {
        if conn.kind == ConnectionKind::Credentials
            && (conn.access_key_id_env.is_none() || conn.secret_access_key_env.is_none())
        {
            return Err(EtlDagError::ConfigError(format!(
                "connection '{id}': credentials need access_key_id_env and secret_access_key_env"
            )));
        }
    }

    if let Some(default_conn) = &cfg.default.conn_id {
        expect_connection(cfg, "[default]", "conn_id", default_conn, ConnectionKind::Warehouse)?;
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == name {
                return Err(EtlDagError::ConfigError(format!(
                    "task '{name}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(EtlDagError::ConfigError(format!(
                    "task '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

/// Operator parameters, overrides and connection references.
fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        let ctx = format!("task '{name}'");
        task.overrides().map_err(|e| match e {
            EtlDagError::ConfigError(msg) => EtlDagError::ConfigError(format!("{ctx}: {msg}")),
            other => other,
        })?;

        let needs_warehouse = task.operator != OperatorKind::Noop;
        if needs_warehouse {
            let conn_id = task
                .conn_id
                .as_deref()
                .or(cfg.default.conn_id.as_deref())
                .ok_or_else(|| {
                    EtlDagError::ConfigError(format!(
                        "{ctx}: operator {} needs `conn_id` (or [default].conn_id)",
                        task.operator
                    ))
                })?;
            expect_connection(cfg, &ctx, "conn_id", conn_id, ConnectionKind::Warehouse)?;
        }

        let missing = |field: &str| {
            EtlDagError::ConfigError(format!(
                "{ctx}: operator {} needs `{field}`",
                task.operator
            ))
        };
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());

        match task.operator {
            OperatorKind::Noop => {}
            OperatorKind::Sql => {
                if !present(&task.sql) && !present(&task.sql_file) {
                    return Err(missing("sql` or `sql_file"));
                }
            }
            OperatorKind::StageToWarehouse => {
                if !present(&task.table) {
                    return Err(missing("table"));
                }
                if !present(&task.s3_bucket) {
                    return Err(missing("s3_bucket"));
                }
                let creds = task
                    .credentials_id
                    .as_deref()
                    .ok_or_else(|| missing("credentials_id"))?;
                expect_connection(cfg, &ctx, "credentials_id", creds, ConnectionKind::Credentials)?;
            }
            OperatorKind::LoadFact | OperatorKind::LoadDimension => {
                if !present(&task.table) {
                    return Err(missing("table"));
                }
                if !present(&task.sql) {
                    return Err(missing("sql"));
                }
            }
            OperatorKind::DataQuality => {
                if task.tables.is_empty() {
                    return Err(missing("tables"));
                }
                if let Some(template) = &task.sql_template {
                    if !template.contains("{}") {
                        return Err(EtlDagError::ConfigError(format!(
                            "{ctx}: sql_template must contain `{{}}` for the table name"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task
    // For:
    //   [task.B]
    //   after = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    if toposort(&graph, None).is_ok() {
        return Ok(());
    }

    let mut tasks: Vec<String> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1)
        .flatten()
        .map(str::to_string)
        .collect();
    tasks.sort();
    Err(EtlDagError::DagCycle { tasks })
}

/// Rejects ids with no `[connection.<id>]` section or of the wrong kind.
fn expect_connection(
    cfg: &RawConfigFile,
    ctx: &str,
    field: &str,
    id: &str,
    kind: ConnectionKind,
) -> Result<()> {
    match cfg.connection.get(id) {
        None => Err(EtlDagError::ConfigError(format!(
            "{ctx}: {field} '{id}' does not name a [connection.<id>] section"
        ))),
        Some(conn) if conn.kind != kind => Err(EtlDagError::ConfigError(format!(
            "{ctx}: {field} '{id}' is a {:?} connection, expected {kind:?}",
            conn.kind
        ))),
        Some(_) => Ok(()),
    }
}

fn opt_duration(field: &str, value: Option<&str>) -> Result<Option<std::time::Duration>> {
    value
        .map(|s| {
            parse_duration(s).map_err(|e| EtlDagError::ConfigError(format!("{field}: {e}")))
        })
        .transpose()
}
