// src/operators/noop.rs

use async_trait::async_trait;

use super::{ExecutorError, Operator, RowsAffected, TaskContext};
use crate::types::OperatorKind;

/// Does nothing. Used for the start and end markers of a pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOperator;

#[async_trait]
impl Operator for NoopOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Noop
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<RowsAffected, ExecutorError> {
        ctx.check_cancelled()?;
        Ok(0)
    }
}
