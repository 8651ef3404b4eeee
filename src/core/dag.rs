//! Task dependency graph.
//!
//! This module provides the TaskGraph structure that represents task
//! dependencies as a directed acyclic graph. An edge `from -> to` means
//! `to` cannot start until `from` has completed. Validation happens once,
//! up front; a validated graph is treated as immutable by the scheduler.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A directed dependency: `to` cannot start until `from` completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: TaskId,
    pub to: TaskId,
}

impl DependencyEdge {
    pub fn new(from: impl Into<TaskId>, to: impl Into<TaskId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// The task dependency graph.
///
/// Nodes are tasks; edges are dependencies. A HashMap side index maps
/// TaskId to NodeIndex for constant-time lookups.
pub struct TaskGraph {
    /// The underlying directed graph.
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Create a new empty TaskGraph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Add a task to the graph.
    ///
    /// # Errors
    /// Returns `Error::DuplicateTask` if a task with the same identifier
    /// is already registered.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.task_index.contains_key(&task.id) {
            return Err(Error::DuplicateTask(task.id));
        }

        let id = task.id.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        Ok(())
    }

    /// Add a dependency between two tasks.
    ///
    /// The edge means `from` must complete before `to` can start. Cycle
    /// detection is deferred to `validate()`, which must run before the
    /// first wave is requested.
    ///
    /// # Errors
    /// Returns `Error::UnknownTask` if either endpoint is unregistered.
    pub fn add_edge(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        let from_index = *self
            .task_index
            .get(from)
            .ok_or_else(|| Error::UnknownTask(from.clone()))?;

        let to_index = *self
            .task_index
            .get(to)
            .ok_or_else(|| Error::UnknownTask(to.clone()))?;

        self.graph.add_edge(from_index, to_index, ());
        Ok(())
    }

    /// Check the graph for cycles.
    ///
    /// Depth-first search with recursion-stack marking. A graph that fails
    /// validation is never scheduled.
    ///
    /// # Errors
    /// Returns `Error::CyclicDependency` naming the task identifiers on
    /// the offending cycle, in traversal order with the entry node
    /// repeated at the end.
    pub fn validate(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        fn visit(
            graph: &DiGraph<Task, ()>,
            node: NodeIndex,
            marks: &mut Vec<Mark>,
            stack: &mut Vec<NodeIndex>,
        ) -> Option<Vec<NodeIndex>> {
            marks[node.index()] = Mark::OnStack;
            stack.push(node);

            for next in graph.neighbors_directed(node, petgraph::Direction::Outgoing) {
                match marks[next.index()] {
                    Mark::OnStack => {
                        // Cycle: everything on the stack from `next` onward.
                        let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<NodeIndex> = stack[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(graph, next, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }

            stack.pop();
            marks[node.index()] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut stack = Vec::new();

        for node in self.graph.node_indices() {
            if marks[node.index()] == Mark::Unvisited {
                if let Some(cycle) = visit(&self.graph, node, &mut marks, &mut stack) {
                    let cycle = cycle
                        .into_iter()
                        .filter_map(|n| self.graph.node_weight(n).map(|t| t.id.clone()))
                        .collect();
                    return Err(Error::CyclicDependency { cycle });
                }
            }
        }

        Ok(())
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph.node_weight_mut(index)
        } else {
            None
        }
    }

    /// Get the number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if the graph contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Check if a dependency edge exists between two tasks.
    pub fn has_edge(&self, from: &TaskId, to: &TaskId) -> bool {
        if let (Some(&from_idx), Some(&to_idx)) =
            (self.task_index.get(from), self.task_index.get(to))
        {
            self.graph.find_edge(from_idx, to_idx).is_some()
        } else {
            false
        }
    }

    /// Get all tasks the given task depends on (must complete first).
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<&Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .filter_map(|neighbor| self.graph.node_weight(neighbor))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all tasks that depend on the given task.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<&Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .filter_map(|neighbor| self.graph.node_weight(neighbor))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all tasks in the graph.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.graph.node_weights().collect()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    // ========== Scheduling Operations ==========

    /// Get all tasks ready to execute (dependencies satisfied).
    ///
    /// A task is ready if it is not in a terminal state, not in the
    /// completed set, and every dependency is in `completed`. Pure
    /// function, no side effects.
    pub fn ready_tasks<'a>(&'a self, completed: &HashSet<TaskId>) -> Vec<&'a Task> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let task = self.graph.node_weight(index)?;

                if completed.contains(&task.id) || task.is_finished() {
                    return None;
                }

                let deps_satisfied = self
                    .graph
                    .neighbors_directed(index, petgraph::Direction::Incoming)
                    .all(|dep_index| {
                        self.graph
                            .node_weight(dep_index)
                            .map(|dep| completed.contains(&dep.id))
                            .unwrap_or(false)
                    });

                if deps_satisfied {
                    Some(task)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Get the identifiers of tasks that are neither completed nor failed.
    pub fn pending_ids(&self, completed: &HashSet<TaskId>) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .graph
            .node_weights()
            .filter(|task| !completed.contains(&task.id) && !task.is_finished())
            .map(|task| task.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Get the count of tasks that are neither completed nor failed.
    pub fn pending_count(&self, completed: &HashSet<TaskId>) -> usize {
        self.graph
            .node_weights()
            .filter(|task| !completed.contains(&task.id) && !task.is_finished())
            .count()
    }

    /// Check if every task in the graph is in the completed set.
    pub fn all_complete(&self, completed: &HashSet<TaskId>) -> bool {
        self.task_index.keys().all(|id| completed.contains(id))
    }

    /// Pending tasks whose dependencies can never be satisfied because at
    /// least one (transitive) dependency has failed.
    ///
    /// Used by the scheduler under the tolerant failure policy to cascade
    /// failures instead of leaving orphaned tasks pending forever.
    pub fn tasks_blocked_by_failure(&self) -> Vec<TaskId> {
        let failed: HashSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .node_weight(idx)
                    .map(|t| matches!(t.status, crate::core::task::TaskStatus::Failed { .. }))
                    .unwrap_or(false)
            })
            .collect();

        if failed.is_empty() {
            return Vec::new();
        }

        // Walk forward from every failed node; everything reachable and not
        // already terminal is doomed.
        let mut doomed: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = failed.iter().copied().collect();
        while let Some(node) = stack.pop() {
            for next in self.graph.neighbors_directed(node, petgraph::Direction::Outgoing) {
                if doomed.insert(next) {
                    stack.push(next);
                }
            }
        }

        let mut ids: Vec<TaskId> = doomed
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx))
            .filter(|task| !task.is_finished())
            .map(|task| task.id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}
