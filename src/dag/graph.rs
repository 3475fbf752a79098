// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use tracing::debug;

use crate::config::model::ConfigFile;
use crate::dag::task::TaskSpec;
use crate::engine::TaskName;
use crate::errors::{EtlDagError, Result};
use crate::operators;

/// Stable integer id of a task inside one [`DagGraph`].
pub type TaskId = NodeIndex;

/// Immutable DAG of tasks.
///
/// Tasks live in a petgraph arena and are addressed by [`TaskId`]; names are
/// a lookup layer on top. Edge direction is upstream -> downstream.
///
/// The graph is validated once in [`DagGraph::build`] and never mutated
/// afterwards, so it can be shared by every run behind an `Arc`.
#[derive(Debug, Clone)]
pub struct DagGraph {
    graph: DiGraph<TaskSpec, ()>,
    index: HashMap<TaskName, TaskId>,
    /// Deterministic topological order (Kahn, ties broken by name).
    order: Vec<TaskId>,
}

impl DagGraph {
    /// Build and validate a graph from tasks and `(upstream, downstream)` edges.
    ///
    /// Fails with:
    /// - [`EtlDagError::DuplicateTask`] if two tasks share a name,
    /// - [`EtlDagError::ConfigError`] for edges naming unknown tasks or self-edges,
    /// - [`EtlDagError::DagCycle`] naming every task that cannot be ordered.
    pub fn build(tasks: Vec<TaskSpec>, edges: Vec<(TaskName, TaskName)>) -> Result<Self> {
        let mut graph: DiGraph<TaskSpec, ()> = DiGraph::with_capacity(tasks.len(), edges.len());
        let mut index: HashMap<TaskName, TaskId> = HashMap::with_capacity(tasks.len());

        for task in tasks {
            if index.contains_key(&task.name) {
                return Err(EtlDagError::DuplicateTask(task.name));
            }
            let name = task.name.clone();
            let id = graph.add_node(task);
            index.insert(name, id);
        }

        for (upstream, downstream) in edges {
            let from = *index.get(&upstream).ok_or_else(|| {
                EtlDagError::ConfigError(format!(
                    "edge {upstream} -> {downstream} references unknown task '{upstream}'"
                ))
            })?;
            let to = *index.get(&downstream).ok_or_else(|| {
                EtlDagError::ConfigError(format!(
                    "edge {upstream} -> {downstream} references unknown task '{downstream}'"
                ))
            })?;
            if from == to {
                return Err(EtlDagError::ConfigError(format!(
                    "task '{upstream}' cannot depend on itself"
                )));
            }
            graph.update_edge(from, to, ());
        }

        let order = kahn_order(&graph)?;

        debug!(
            tasks = graph.node_count(),
            edges = graph.edge_count(),
            "built DAG"
        );

        Ok(Self {
            graph,
            index,
            order,
        })
    }

    /// Build a graph from a validated [`ConfigFile`], instantiating one
    /// operator per task.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut tasks = Vec::with_capacity(cfg.task.len());
        let mut edges = Vec::new();

        for (name, tc) in cfg.task.iter() {
            tasks.push(operators::build_task(name, tc, cfg)?);
            for dep in tc.after.iter() {
                edges.push((dep.clone(), name.clone()));
            }
        }

        Self::build(tasks, edges)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Task names in topological order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|id| self.graph[*id].name.as_str())
    }

    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.index.get(name).map(|id| &self.graph[*id])
    }

    pub fn id_of(&self, name: &str) -> Option<TaskId> {
        self.index.get(name).copied()
    }

    pub fn spec(&self, id: TaskId) -> &TaskSpec {
        &self.graph[id]
    }

    pub fn name_of(&self, id: TaskId) -> &str {
        &self.graph[id].name
    }

    /// Task ids in topological order.
    pub fn topological_ids(&self) -> &[TaskId] {
        &self.order
    }

    pub fn topological_order(&self) -> Vec<&str> {
        self.tasks().collect()
    }

    /// Tasks with no upstream edges: the initial ready set of a run.
    pub fn roots(&self) -> BTreeSet<TaskName> {
        self.order
            .iter()
            .filter(|id| self.upstream_ids(**id).next().is_none())
            .map(|id| self.graph[*id].name.clone())
            .collect()
    }

    pub(crate) fn upstream_ids(&self, id: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.graph.neighbors_directed(id, Direction::Incoming)
    }

    pub(crate) fn downstream_ids(&self, id: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.graph.neighbors_directed(id, Direction::Outgoing)
    }

    /// Direct upstream tasks of `name`, sorted. Empty for unknown tasks.
    pub fn upstream_of(&self, name: &str) -> Vec<&str> {
        self.neighbours_sorted(name, Direction::Incoming)
    }

    /// Direct downstream tasks of `name`, sorted. Empty for unknown tasks.
    pub fn downstream_of(&self, name: &str) -> Vec<&str> {
        self.neighbours_sorted(name, Direction::Outgoing)
    }

    fn neighbours_sorted(&self, name: &str, dir: Direction) -> Vec<&str> {
        let Some(id) = self.id_of(name) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(id, dir)
            .map(|n| self.graph[n].name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Downstream tasks of `task` that become ready once everything in
    /// `completed` has succeeded: every one of their upstream tasks must be
    /// in `completed`.
    pub fn ready_successors(&self, task: &str, completed: &BTreeSet<TaskName>) -> BTreeSet<TaskName> {
        let Some(id) = self.id_of(task) else {
            return BTreeSet::new();
        };
        self.ready_successor_ids(id, |up| completed.contains(self.name_of(up)))
            .into_iter()
            .map(|succ| self.graph[succ].name.clone())
            .collect()
    }

    /// Id-based variant of [`DagGraph::ready_successors`] used by the scheduler.
    pub(crate) fn ready_successor_ids<F>(&self, id: TaskId, is_done: F) -> Vec<TaskId>
    where
        F: Fn(TaskId) -> bool,
    {
        let mut ready: Vec<TaskId> = self
            .downstream_ids(id)
            .filter(|succ| self.upstream_ids(*succ).all(&is_done))
            .collect();
        ready.sort_unstable();
        ready.dedup();
        ready
    }

    /// Every task reachable from `name` (excluding `name` itself).
    pub fn descendants_of(&self, name: &str) -> BTreeSet<TaskName> {
        let Some(id) = self.id_of(name) else {
            return BTreeSet::new();
        };
        self.descendant_ids(id)
            .into_iter()
            .map(|d| self.graph[d].name.clone())
            .collect()
    }

    pub(crate) fn descendant_ids(&self, id: TaskId) -> Vec<TaskId> {
        let mut bfs = Bfs::new(&self.graph, id);
        let mut out = Vec::new();
        while let Some(node) = bfs.next(&self.graph) {
            if node != id {
                out.push(node);
            }
        }
        out
    }
}

/// Kahn's algorithm with ties broken by task name, so the same definition
/// always yields the same order.
fn kahn_order(graph: &DiGraph<TaskSpec, ()>) -> Result<Vec<TaskId>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BTreeMap<&str, TaskId> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .map(|n| (graph[n].name.as_str(), n))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());

    while let Some((_, id)) = ready.pop_first() {
        order.push(id);
        for succ in graph.neighbors_directed(id, Direction::Outgoing) {
            let deg = &mut in_degree[succ.index()];
            *deg -= 1;
            if *deg == 0 {
                ready.insert(graph[succ].name.as_str(), succ);
            }
        }
    }

    if order.len() != graph.node_count() {
        // Tasks merely downstream of a cycle are left out; self-edges were
        // rejected earlier, so every cycle is a component of two or more.
        let mut members: Vec<String> = tarjan_scc(graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .flatten()
            .map(|n| graph[n].name.clone())
            .collect();
        members.sort();
        return Err(EtlDagError::DagCycle { tasks: members });
    }

    Ok(order)
}
