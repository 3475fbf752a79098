// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlDagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Duplicate task name in DAG: {0}")]
    DuplicateTask(String),

    #[error("Cycle detected in DAG involving tasks: {}", tasks.join(", "))]
    DagCycle { tasks: Vec<String> },

    #[error("Schedule error: {0}")]
    ScheduleError(String),

    #[error("Task '{task}' exhausted its retries after {attempts} attempt(s): {last_error}")]
    Exhausted {
        task: String,
        attempts: u32,
        last_error: String,
    },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EtlDagError>;
