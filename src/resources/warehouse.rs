// src/resources/warehouse.rs

//! Warehouse abstraction used by the SQL-backed operators.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use super::ObjectStoreCredentials;

/// Errors a warehouse can report for a statement or query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WarehouseError {
    #[error("relation \"{0}\" does not exist")]
    UnknownTable(String),

    #[error("relation \"{0}\" already exists")]
    TableExists(String),

    #[error("unsupported statement: {0}")]
    Unsupported(String),

    #[error("warehouse backend error: {0}")]
    Backend(String),
}

/// A SQL-speaking warehouse.
///
/// Handles are shared by every run through the resource registry, so
/// implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait Warehouse: Send + Sync + fmt::Debug {
    /// Execute a statement, returning the number of rows it affected.
    async fn execute(&self, statement: &Statement) -> Result<u64, WarehouseError>;

    /// Run a query and return the first column of its first row, if any.
    async fn query_scalar(&self, sql: &str) -> Result<Option<i64>, WarehouseError>;
}

/// Statements the operators issue.
#[derive(Clone, PartialEq, Eq)]
pub enum Statement {
    /// `TRUNCATE <table>`
    Truncate { table: String },
    /// `COPY <table> FROM '<source>' ...` with object-store credentials.
    CopyFromObjectStore {
        table: String,
        /// Full `s3://bucket/prefix` location.
        source: String,
        credentials: ObjectStoreCredentials,
        extra_params: Option<String>,
    },
    /// `INSERT INTO <table> <query>`
    InsertSelect { table: String, query: String },
    /// `DELETE FROM <table>`
    DeleteAll { table: String },
    /// Free-form SQL, possibly several `;`-separated statements.
    Script { sql: String },
}

impl Statement {
    /// SQL text to send to the warehouse. Contains secrets; never log it.
    pub fn render(&self) -> String {
        self.render_with(false)
    }

    /// Table the statement writes to, if it targets exactly one.
    pub fn target_table(&self) -> Option<&str> {
        match self {
            Statement::Truncate { table }
            | Statement::CopyFromObjectStore { table, .. }
            | Statement::InsertSelect { table, .. }
            | Statement::DeleteAll { table } => Some(table),
            Statement::Script { .. } => None,
        }
    }

    fn render_with(&self, redact: bool) -> String {
        match self {
            Statement::Truncate { table } => format!("TRUNCATE {table}"),
            Statement::CopyFromObjectStore {
                table,
                source,
                credentials,
                extra_params,
            } => {
                let secret = if redact {
                    "***"
                } else {
                    credentials.secret_access_key()
                };
                let mut sql = format!(
                    "COPY {table} FROM '{source}' ACCESS_KEY_ID '{}' SECRET_ACCESS_KEY '{secret}'",
                    credentials.access_key_id()
                );
                if let Some(region) = credentials.region() {
                    sql.push_str(&format!(" REGION '{region}'"));
                }
                if let Some(extra) = extra_params.as_deref().filter(|e| !e.trim().is_empty()) {
                    sql.push(' ');
                    sql.push_str(extra.trim());
                }
                sql
            }
            Statement::InsertSelect { table, query } => {
                format!("INSERT INTO {table} {}", query.trim())
            }
            Statement::DeleteAll { table } => format!("DELETE FROM {table}"),
            Statement::Script { sql } => sql.trim().to_string(),
        }
    }
}

/// Redacted rendering, safe for logs.
impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_with(true))
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Statement({self})")
    }
}
