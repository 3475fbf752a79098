// src/exec/mod.rs

//! Task execution layer.
//!
//! This module actually runs the operators of scheduled tasks, each attempt
//! in its own Tokio task, and reports back to the run's runtime via
//! `RunEvent`s.
//!
//! - [`executor_loop`] owns the loop that tracks in-flight attempts.
//! - [`task_runner`] runs one attempt with its timeout and cancellation.
//! - [`backend`] provides the `ExecutorBackend` / `ExecutorFactory` traits
//!   and the real implementations used in production, which tests replace
//!   with fakes.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{ExecutorBackend, ExecutorFactory, RealExecutorBackend, RealExecutorFactory};
