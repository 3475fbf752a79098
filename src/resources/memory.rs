// src/resources/memory.rs

//! In-memory warehouse that tracks row counts per table.
//!
//! It understands just enough SQL to run the pipeline end to end: table
//! creation / removal, truncation, COPY from registered objects, and
//! `INSERT INTO ... SELECT ... FROM <table>`. Row contents are never
//! materialised; only counts are.

use std::collections::BTreeMap;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::warehouse::{Statement, Warehouse, WarehouseError};

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^create\s+table\s+(if\s+not\s+exists\s+)?([a-z_][a-z0-9_.]*)")
        .expect("valid CREATE TABLE regex")
});

static DROP_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^drop\s+table\s+(if\s+exists\s+)?([a-z_][a-z0-9_.]*)")
        .expect("valid DROP TABLE regex")
});

static TRUNCATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^truncate\s+(table\s+)?([a-z_][a-z0-9_.]*)").expect("valid TRUNCATE regex")
});

static DELETE_ALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^delete\s+from\s+([a-z_][a-z0-9_.]*)\s*$").expect("valid DELETE regex")
});

static INSERT_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^insert\s+into\s+([a-z_][a-z0-9_.]*)(\s*\([^)]*\))?\s+(select\b.*)$")
        .expect("valid INSERT regex")
});

static FROM_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfrom\s+([a-z_][a-z0-9_.]*)").expect("valid FROM regex")
});

static COUNT_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*select\s+count\s*\(\s*\*\s*\)\s+from\s+([a-z_][a-z0-9_.]*)\s*;?\s*$")
        .expect("valid COUNT regex")
});

#[derive(Debug, Default)]
struct MemoryState {
    /// Table name (lowercase) -> row count.
    tables: BTreeMap<String, u64>,
    /// Object-store key (`s3://bucket/key`) -> rows in that object.
    objects: BTreeMap<String, u64>,
    /// Redacted log of every executed statement, in order.
    executed: Vec<String>,
}

/// Row-counting in-memory warehouse.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<MemoryState>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table with `rows` rows (builder style).
    pub fn with_table(mut self, name: &str, rows: u64) -> Self {
        self.owned_state().tables.insert(normalise(name), rows);
        self
    }

    /// Register an object holding `rows` rows (builder style).
    pub fn with_object(mut self, key: &str, rows: u64) -> Self {
        self.owned_state().objects.insert(key.to_string(), rows);
        self
    }

    /// Register (or replace) an object in the simulated object store.
    pub fn put_object(&self, key: &str, rows: u64) -> Result<(), WarehouseError> {
        self.lock()?.objects.insert(key.to_string(), rows);
        Ok(())
    }

    /// Current row count of `table`, or `None` if it does not exist.
    pub fn table_rows(&self, table: &str) -> Option<u64> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(&normalise(table)).copied())
    }

    pub fn tables(&self) -> BTreeMap<String, u64> {
        self.state
            .lock()
            .map(|s| s.tables.clone())
            .unwrap_or_default()
    }

    /// Redacted text of every statement executed so far.
    pub fn executed(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.executed.clone())
            .unwrap_or_default()
    }

    /// Exclusive access for the builders; a poison flag never drops a write.
    fn owned_state(&mut self) -> &mut MemoryState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, WarehouseError> {
        self.state
            .lock()
            .map_err(|_| WarehouseError::Backend("memory warehouse state poisoned".to_string()))
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn execute(&self, statement: &Statement) -> Result<u64, WarehouseError> {
        let mut state = self.lock()?;
        state.executed.push(statement.to_string());
        debug!(statement = %statement, "memory warehouse executing");

        match statement {
            Statement::Truncate { table } | Statement::DeleteAll { table } => {
                state.clear_table(table)
            }
            Statement::CopyFromObjectStore { table, source, .. } => state.copy(table, source),
            Statement::InsertSelect { table, query } => state.insert_select(table, query),
            Statement::Script { sql } => state.script(sql),
        }
    }

    async fn query_scalar(&self, sql: &str) -> Result<Option<i64>, WarehouseError> {
        let state = self.lock()?;
        let Some(caps) = COUNT_QUERY.captures(sql) else {
            return Err(WarehouseError::Unsupported(sql.trim().to_string()));
        };
        let table = normalise(&caps[1]);
        let rows = state
            .tables
            .get(&table)
            .copied()
            .ok_or(WarehouseError::UnknownTable(table))?;
        Ok(Some(i64::try_from(rows).unwrap_or(i64::MAX)))
    }
}

impl MemoryState {
    fn rows_mut(&mut self, table: &str) -> Result<&mut u64, WarehouseError> {
        let name = normalise(table);
        self.tables
            .get_mut(&name)
            .ok_or(WarehouseError::UnknownTable(name))
    }

    fn clear_table(&mut self, table: &str) -> Result<u64, WarehouseError> {
        let rows = self.rows_mut(table)?;
        Ok(std::mem::take(rows))
    }

    fn copy(&mut self, table: &str, source: &str) -> Result<u64, WarehouseError> {
        let copied: u64 = self
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(source))
            .map(|(_, rows)| *rows)
            .sum();
        let rows = self.rows_mut(table)?;
        *rows += copied;
        Ok(copied)
    }

    /// Adds the row count of the first `FROM` clause naming an existing
    /// table. Unknown names (e.g. `extract(hour FROM start_time)`) are
    /// skipped; if none is known, the first one is reported missing.
    fn insert_select(&mut self, table: &str, query: &str) -> Result<u64, WarehouseError> {
        let mut first_unknown = None;
        let mut source_rows = None;
        for caps in FROM_TABLE.captures_iter(query) {
            let name = normalise(&caps[1]);
            match self.tables.get(&name) {
                Some(rows) => {
                    source_rows = Some(*rows);
                    break;
                }
                None => {
                    first_unknown.get_or_insert(name);
                }
            }
        }

        let inserted = match (source_rows, first_unknown) {
            (Some(rows), _) => rows,
            (None, Some(missing)) => return Err(WarehouseError::UnknownTable(missing)),
            // `INSERT ... SELECT <constants>` inserts one row.
            (None, None) => 1,
        };

        let rows = self.rows_mut(table)?;
        *rows += inserted;
        Ok(inserted)
    }

    fn script(&mut self, sql: &str) -> Result<u64, WarehouseError> {
        let mut affected = 0;
        for raw in sql.split(';') {
            let stmt = strip_comments(raw);
            if stmt.is_empty() {
                continue;
            }

            if let Some(caps) = CREATE_TABLE.captures(&stmt) {
                let name = normalise(&caps[2]);
                let if_not_exists = caps.get(1).is_some();
                if self.tables.contains_key(&name) {
                    if !if_not_exists {
                        return Err(WarehouseError::TableExists(name));
                    }
                } else {
                    self.tables.insert(name, 0);
                }
            } else if let Some(caps) = DROP_TABLE.captures(&stmt) {
                let name = normalise(&caps[2]);
                let if_exists = caps.get(1).is_some();
                if self.tables.remove(&name).is_none() && !if_exists {
                    return Err(WarehouseError::UnknownTable(name));
                }
            } else if let Some(caps) = TRUNCATE.captures(&stmt) {
                affected += self.clear_table(&caps[2])?;
            } else if let Some(caps) = DELETE_ALL.captures(&stmt) {
                affected += self.clear_table(&caps[1])?;
            } else if let Some(caps) = INSERT_SELECT.captures(&stmt) {
                affected += self.insert_select(&caps[1], &caps[3])?;
            } else {
                debug!(statement = %stmt, "memory warehouse ignoring statement");
            }
        }
        Ok(affected)
    }
}

fn normalise(table: &str) -> String {
    table.trim().trim_matches('"').to_lowercase()
}

fn strip_comments(stmt: &str) -> String {
    stmt.lines()
        .map(|line| match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
