// src/operators/quality.rs

use async_trait::async_trait;
use tracing::{info, warn};

use super::{ExecutorError, Operator, RowsAffected, TaskContext};
use crate::types::OperatorKind;

/// Check query used when a task doesn't set `sql_template`.
pub const DEFAULT_SQL_TEMPLATE: &str = "SELECT COUNT(*) FROM {}";

/// Fails the attempt if any configured table has fewer than `min_rows` rows.
#[derive(Debug, Clone)]
pub struct QualityOperator {
    conn_id: String,
    tables: Vec<String>,
    /// `{}` stands for the table name.
    sql_template: String,
    min_rows: i64,
}

impl QualityOperator {
    pub fn new(conn_id: impl Into<String>, tables: Vec<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            tables,
            sql_template: DEFAULT_SQL_TEMPLATE.to_string(),
            min_rows: 1,
        }
    }

    pub fn with_sql_template(mut self, template: impl Into<String>) -> Self {
        self.sql_template = template.into();
        self
    }

    pub fn with_min_rows(mut self, min_rows: i64) -> Self {
        self.min_rows = min_rows;
        self
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }
}

#[async_trait]
impl Operator for QualityOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::DataQuality
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<RowsAffected, ExecutorError> {
        let warehouse = ctx.registry.warehouse(&self.conn_id)?;

        for table in &self.tables {
            ctx.check_cancelled()?;
            let sql = self.sql_template.replace("{}", table);

            let count = match warehouse.query_scalar(&sql).await {
                Ok(Some(count)) => count,
                Ok(None) => {
                    warn!(task = %ctx.task, table = %table, "quality check returned no rows");
                    return Err(ExecutorError::QualityCheck {
                        table: table.clone(),
                        reason: "check query returned no results".to_string(),
                    });
                }
                Err(err) => {
                    return Err(ExecutorError::QualityCheck {
                        table: table.clone(),
                        reason: err.to_string(),
                    });
                }
            };

            if count < self.min_rows {
                warn!(task = %ctx.task, table = %table, count, min_rows = self.min_rows, "quality check failed");
                return Err(ExecutorError::QualityCheck {
                    table: table.clone(),
                    reason: format!("{count} rows, expected at least {}", self.min_rows),
                });
            }

            info!(task = %ctx.task, run_id = ctx.run_id, table = %table, count, "quality check passed");
        }

        Ok(0)
    }
}
