// src/operators/stage.rs

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use super::{ExecutorError, Operator, RowsAffected, TaskContext};
use crate::resources::Statement;
use crate::types::OperatorKind;

/// Copies raw files from object storage into a staging table.
///
/// The table is truncated first, so any number of attempts for the same
/// logical date leave it in the same state.
#[derive(Debug, Clone)]
pub struct StageOperator {
    pub conn_id: String,
    pub credentials_id: String,
    pub table: String,
    pub s3_bucket: String,
    /// Key prefix template, see [`render_key`].
    pub s3_key: String,
    pub extra_params: Option<String>,
}

impl StageOperator {
    /// `s3://<bucket>/<key>` for the given logical date.
    pub fn source_for(&self, logical_date: DateTime<Utc>) -> String {
        let key = render_key(&self.s3_key, logical_date);
        format!(
            "s3://{}/{}",
            self.s3_bucket.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }
}

/// Substitute the logical-date placeholders of an object key:
///
/// | placeholder | example                |
/// |-------------|------------------------|
/// | `{ds}`      | `2020-03-03`           |
/// | `{ts}`      | `2020-03-03T05:00:00Z` |
/// | `{year}`    | `2020`                 |
/// | `{month}`   | `03`                   |
/// | `{day}`     | `03`                   |
///
/// Anything else is left untouched.
pub fn render_key(template: &str, logical_date: DateTime<Utc>) -> String {
    template
        .replace("{ds}", &logical_date.format("%Y-%m-%d").to_string())
        .replace(
            "{ts}",
            &logical_date.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .replace("{year}", &logical_date.format("%Y").to_string())
        .replace("{month}", &logical_date.format("%m").to_string())
        .replace("{day}", &logical_date.format("%d").to_string())
}

#[async_trait]
impl Operator for StageOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::StageToWarehouse
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<RowsAffected, ExecutorError> {
        let warehouse = ctx.registry.warehouse(&self.conn_id)?;
        let credentials = ctx.registry.credentials(&self.credentials_id)?;
        let source = self.source_for(ctx.logical_date);

        ctx.check_cancelled()?;
        warehouse
            .execute(&Statement::Truncate {
                table: self.table.clone(),
            })
            .await?;

        ctx.check_cancelled()?;
        let copy = Statement::CopyFromObjectStore {
            table: self.table.clone(),
            source: source.clone(),
            credentials,
            extra_params: self.extra_params.clone(),
        };
        info!(task = %ctx.task, run_id = ctx.run_id, statement = %copy, "staging from object storage");
        let rows = warehouse.execute(&copy).await?;

        info!(
            task = %ctx.task,
            run_id = ctx.run_id,
            table = %self.table,
            source = %source,
            rows,
            "staging table loaded"
        );
        Ok(rows)
    }
}
