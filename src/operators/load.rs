// src/operators/load.rs

use async_trait::async_trait;
use tracing::info;

use super::{ExecutorError, Operator, RowsAffected, TaskContext};
use crate::resources::Statement;
use crate::types::{LoadMode, OperatorKind};

/// Populates a fact or dimension table with `INSERT INTO <table> <sql>`.
///
/// Fact tables append by default; dimension tables are emptied first
/// (`truncate_insert`) so re-running a load does not duplicate rows.
#[derive(Debug, Clone)]
pub struct LoadOperator {
    kind: OperatorKind,
    conn_id: String,
    table: String,
    sql: String,
    mode: LoadMode,
}

impl LoadOperator {
    pub fn fact(conn_id: impl Into<String>, table: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            kind: OperatorKind::LoadFact,
            conn_id: conn_id.into(),
            table: table.into(),
            sql: sql.into(),
            mode: LoadMode::Append,
        }
    }

    pub fn dimension(
        conn_id: impl Into<String>,
        table: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            kind: OperatorKind::LoadDimension,
            mode: LoadMode::TruncateInsert,
            ..Self::fact(conn_id, table, sql)
        }
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl Operator for LoadOperator {
    fn kind(&self) -> OperatorKind {
        self.kind
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<RowsAffected, ExecutorError> {
        if self.sql.trim().is_empty() {
            return Err(ExecutorError::InvalidParams(format!(
                "empty transformation query for table {}",
                self.table
            )));
        }

        let warehouse = ctx.registry.warehouse(&self.conn_id)?;

        if self.mode == LoadMode::TruncateInsert {
            ctx.check_cancelled()?;
            let removed = warehouse
                .execute(&Statement::DeleteAll {
                    table: self.table.clone(),
                })
                .await?;
            info!(task = %ctx.task, run_id = ctx.run_id, table = %self.table, removed, "cleared target table");
        }

        ctx.check_cancelled()?;
        let rows = warehouse
            .execute(&Statement::InsertSelect {
                table: self.table.clone(),
                query: self.sql.clone(),
            })
            .await?;

        info!(
            task = %ctx.task,
            run_id = ctx.run_id,
            table = %self.table,
            operator = %self.kind,
            rows,
            "table loaded"
        );
        Ok(rows)
    }
}
