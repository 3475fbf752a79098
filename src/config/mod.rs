// src/config/mod.rs

//! Configuration loading and validation for etldag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate the DAG, connections and operator parameters (`validate.rs`).
//! - Parse human durations like `"5m"` (`duration.rs`).
//!
//! Connection ids are checked against the `[connection.<id>]` sections at
//! load time: a typo'd `conn_id` or `credentials_id` is a `ConfigError`
//! before any run starts. What remains for run time is resolution that
//! depends on the environment, such as a credentials connection whose
//! secret variable is unset, or a registry assembled in code that lacks an
//! id. Those fail the attempt with a `ResolveError` and consume a retry
//! like any other executor failure.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path, parse_and_validate};
pub use model::{
    ConfigFile, ConnectionConfig, ConnectionKind, DagSection, DagSettings, DefaultSection,
    RawConfigFile, TaskConfig,
};
