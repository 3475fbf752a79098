// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! A run's runtime talks to an `ExecutorBackend` instead of running
//! operators itself. This makes it easy to swap in a fake executor in tests
//! while keeping the production implementation in [`executor_loop`].
//!
//! - `RealExecutorBackend` is the default implementation. It forwards
//!   scheduled tasks to a background executor loop that runs each task's
//!   operator in its own Tokio task.
//! - Tests can provide their own `ExecutorBackend` that, for example,
//!   records which tasks were scheduled and directly emits `TaskCompleted`
//!   events.
//!
//! [`executor_loop`]: super::executor_loop

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dag::{DagGraph, ScheduledTask};
use crate::engine::{RunEvent, TaskName};
use crate::errors::{Error, Result};
use crate::resources::ResourceRegistry;

use super::executor_loop::{ExecRequest, spawn_executor};

/// Trait abstracting how scheduled tasks are executed.
///
/// Implementations report every attempt they run back to the run's event
/// channel as a `RunEvent::TaskCompleted` carrying the same attempt number.
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution. Must not wait for them to
    /// finish.
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask in-flight attempts of these tasks to stop. Aborted attempts need
    /// not report a completion.
    fn abort_tasks(
        &mut self,
        _tasks: Vec<TaskName>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// Creates one backend per run, wired to that run's event channel.
pub trait ExecutorFactory: Send + Sync {
    type Backend: ExecutorBackend + 'static;

    fn create(&self, graph: Arc<DagGraph>, runtime_tx: mpsc::Sender<RunEvent>) -> Self::Backend;
}

/// Real executor backend used in production.
///
/// The runtime calls `spawn_ready_tasks`, which forwards the tasks to the
/// background executor loop via an mpsc channel.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecRequest>,
}

impl RealExecutorBackend {
    /// Create a new backend, wiring it to the given run event sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(
        graph: Arc<DagGraph>,
        registry: Arc<ResourceRegistry>,
        runtime_tx: mpsc::Sender<RunEvent>,
    ) -> Self {
        let tx = spawn_executor(graph, registry, runtime_tx);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for task in tasks {
                tx.send(ExecRequest::Run(task)).await.map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn abort_tasks(
        &mut self,
        tasks: Vec<TaskName>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecRequest::Abort(tasks))
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }
}

/// Factory for [`RealExecutorBackend`]s sharing one resource registry.
#[derive(Debug, Clone)]
pub struct RealExecutorFactory {
    registry: Arc<ResourceRegistry>,
}

impl RealExecutorFactory {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }
}

impl ExecutorFactory for RealExecutorFactory {
    type Backend = RealExecutorBackend;

    fn create(&self, graph: Arc<DagGraph>, runtime_tx: mpsc::Sender<RunEvent>) -> Self::Backend {
        RealExecutorBackend::new(graph, Arc::clone(&self.registry), runtime_tx)
    }
}
