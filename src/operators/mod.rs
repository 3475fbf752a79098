// src/operators/mod.rs

//! Task bodies.
//!
//! Every task runs an [`Operator`]. Operators are stateless apart from their
//! configuration: connections are resolved from the [`ResourceRegistry`] in
//! the [`TaskContext`] on each attempt, so a resolution failure is an
//! ordinary attempt failure and consumes a retry.
//!
//! - [`noop`]: start / end markers.
//! - [`sql`]: run an inline script or a script file.
//! - [`stage`]: truncate a staging table and COPY into it from object storage.
//! - [`load`]: populate fact and dimension tables from a query.
//! - [`quality`]: row-count checks over a list of tables.

pub mod load;
pub mod noop;
pub mod quality;
pub mod sql;
pub mod stage;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::model::{ConfigFile, TaskConfig};
use crate::dag::task::{TaskParams, TaskSpec};
use crate::engine::TaskName;
use crate::errors::{EtlDagError, Result};
use crate::resources::{ResolveError, ResourceRegistry, WarehouseError};
use crate::types::{LoadMode, OperatorKind};

pub use load::LoadOperator;
pub use noop::NoopOperator;
pub use quality::{DEFAULT_SQL_TEMPLATE, QualityOperator};
pub use sql::SqlOperator;
pub use stage::{StageOperator, render_key};

/// Rows written (or checked) by one attempt.
pub type RowsAffected = u64;

/// Everything an operator may look at while running one attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: TaskName,
    pub run_id: u64,
    pub logical_date: DateTime<Utc>,
    /// 1-based attempt number.
    pub attempt: u32,
    pub registry: Arc<ResourceRegistry>,
    /// Fires when the run is cancelled.
    pub cancel: CancellationToken,
}

impl TaskContext {
    /// Bail out between statements once the run is cancelled.
    pub fn check_cancelled(&self) -> std::result::Result<(), ExecutorError> {
        if self.cancel.is_cancelled() {
            Err(ExecutorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("data quality check failed for table {table}: {reason}")]
    QualityCheck { table: String, reason: String },

    #[error("invalid operator parameters: {0}")]
    InvalidParams(String),

    #[error("attempt cancelled")]
    Cancelled,
}

/// A task body.
#[async_trait]
pub trait Operator: Send + Sync {
    fn kind(&self) -> OperatorKind;

    async fn execute(&self, ctx: &TaskContext) -> std::result::Result<RowsAffected, ExecutorError>;
}

/// Instantiate the operator of `[task.<name>]` and wrap it in a [`TaskSpec`]
/// with `[default]` settings narrowed by the task's own overrides.
pub fn build_task(name: &str, tc: &TaskConfig, cfg: &ConfigFile) -> Result<TaskSpec> {
    let settings = cfg.defaults.clone().apply(&tc.overrides()?);
    let conn_id = tc.conn_id.clone().or_else(|| cfg.defaults.conn_id.clone());

    let mut params = TaskParams::new();
    let operator: Arc<dyn Operator> = match tc.operator {
        OperatorKind::Noop => Arc::new(NoopOperator),

        OperatorKind::Sql => {
            let conn_id = required(name, "conn_id", conn_id)?;
            let sql = match (&tc.sql, &tc.sql_file) {
                (Some(sql), _) => sql.clone(),
                (None, Some(file)) => {
                    params.insert("sql_file".to_string(), file.clone());
                    read_sql_file(name, file, cfg.source_dir.as_deref())?
                }
                (None, None) => {
                    return Err(EtlDagError::ConfigError(format!(
                        "task '{name}': sql operator needs `sql` or `sql_file`"
                    )));
                }
            };
            params.insert("conn_id".to_string(), conn_id.clone());
            Arc::new(SqlOperator::new(conn_id, sql))
        }

        OperatorKind::StageToWarehouse => {
            let conn_id = required(name, "conn_id", conn_id)?;
            let credentials_id = required(name, "credentials_id", tc.credentials_id.clone())?;
            let table = required(name, "table", tc.table.clone())?;
            let bucket = required(name, "s3_bucket", tc.s3_bucket.clone())?;
            let key = tc.s3_key.clone().unwrap_or_default();

            params.insert("conn_id".to_string(), conn_id.clone());
            params.insert("credentials_id".to_string(), credentials_id.clone());
            params.insert("table".to_string(), table.clone());
            params.insert("s3_bucket".to_string(), bucket.clone());
            params.insert("s3_key".to_string(), key.clone());
            if let Some(extra) = &tc.extra_params {
                params.insert("extra_params".to_string(), extra.clone());
            }

            Arc::new(StageOperator {
                conn_id,
                credentials_id,
                table,
                s3_bucket: bucket,
                s3_key: key,
                extra_params: tc.extra_params.clone(),
            })
        }

        OperatorKind::LoadFact | OperatorKind::LoadDimension => {
            let conn_id = required(name, "conn_id", conn_id)?;
            let table = required(name, "table", tc.table.clone())?;
            let sql = required(name, "sql", tc.sql.clone())?;
            let op = if tc.operator == OperatorKind::LoadFact {
                LoadOperator::fact(conn_id.clone(), table.clone(), sql)
            } else {
                LoadOperator::dimension(conn_id.clone(), table.clone(), sql)
            };
            let op = match tc.mode {
                Some(mode) => op.with_mode(mode),
                None => op,
            };

            params.insert("conn_id".to_string(), conn_id);
            params.insert("table".to_string(), table);
            params.insert("mode".to_string(), mode_name(op.mode()).to_string());
            Arc::new(op)
        }

        OperatorKind::DataQuality => {
            let conn_id = required(name, "conn_id", conn_id)?;
            if tc.tables.is_empty() {
                return Err(EtlDagError::ConfigError(format!(
                    "task '{name}': data_quality needs a non-empty `tables` list"
                )));
            }
            let op = QualityOperator::new(conn_id.clone(), tc.tables.clone())
                .with_sql_template(
                    tc.sql_template
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SQL_TEMPLATE.to_string()),
                )
                .with_min_rows(tc.min_rows.unwrap_or(1));

            params.insert("conn_id".to_string(), conn_id);
            params.insert("tables".to_string(), tc.tables.join(","));
            Arc::new(op)
        }
    };

    Ok(TaskSpec::new(name, tc.operator, operator, params, settings))
}

fn required(task: &str, field: &str, value: Option<String>) -> Result<String> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        EtlDagError::ConfigError(format!("task '{task}': missing required field `{field}`"))
    })
}

fn read_sql_file(task: &str, file: &str, base: Option<&Path>) -> Result<String> {
    let path = match base {
        Some(dir) => dir.join(file),
        None => Path::new(file).to_path_buf(),
    };
    std::fs::read_to_string(&path).map_err(|e| {
        EtlDagError::ConfigError(format!(
            "task '{task}': cannot read sql_file {}: {e}",
            path.display()
        ))
    })
}

fn mode_name(mode: LoadMode) -> &'static str {
    match mode {
        LoadMode::Append => "append",
        LoadMode::TruncateInsert => "truncate_insert",
    }
}
