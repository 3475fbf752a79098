// src/operators/sql.rs

use async_trait::async_trait;
use tracing::info;

use super::{ExecutorError, Operator, RowsAffected, TaskContext};
use crate::resources::Statement;
use crate::types::OperatorKind;

/// Runs a SQL script (one or more `;`-separated statements) against a
/// warehouse connection. Used for schema setup such as `create_tables.sql`.
#[derive(Debug, Clone)]
pub struct SqlOperator {
    conn_id: String,
    sql: String,
}

impl SqlOperator {
    pub fn new(conn_id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            sql: sql.into(),
        }
    }
}

#[async_trait]
impl Operator for SqlOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Sql
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<RowsAffected, ExecutorError> {
        let warehouse = ctx.registry.warehouse(&self.conn_id)?;
        ctx.check_cancelled()?;

        let rows = warehouse
            .execute(&Statement::Script {
                sql: self.sql.clone(),
            })
            .await?;

        info!(task = %ctx.task, run_id = ctx.run_id, conn_id = %self.conn_id, rows, "sql script executed");
        Ok(rows)
    }
}
