// src/cli.rs

//! CLI argument parsing using `clap`.

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};

/// Command-line arguments for `etldag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "etldag",
    version,
    about = "Schedule and run an ETL pipeline defined as a DAG of warehouse tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline definition (TOML).
    ///
    /// Default: `Pipeline.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Pipeline.toml")]
    pub config: String,

    /// Run a single tick and exit; the exit code reflects the run outcome.
    #[arg(long)]
    pub once: bool,

    /// Logical date of the `--once` run (RFC 3339). Defaults to the most
    /// recent schedule tick.
    #[arg(long, value_name = "RFC3339", requires = "once")]
    pub logical_date: Option<DateTime<Utc>>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ETLDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the DAG and schedule, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print every finished run report to stdout as one JSON line.
    #[arg(long)]
    pub report_json: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
