//! Execution wave planning.
//!
//! A wave is a bounded-size batch of tasks whose dependencies are all
//! satisfied, selected for concurrent dispatch. Wave planning is
//! deterministic: candidates are ordered by descending priority weight,
//! then ascending identifier as the tie-break.

use crate::core::dag::TaskGraph;
use crate::core::task::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An ordered batch of task identifiers selected for concurrent dispatch.
///
/// Invariant: `len() <= cap` of the builder that produced it, and every
/// member's dependencies were completed at planning time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    tasks: Vec<TaskId>,
}

impl Wave {
    /// An empty wave, signalling either completion or a deadlock.
    pub fn empty() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task identifiers in dispatch order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.tasks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaskId> {
        self.tasks.iter()
    }
}

impl IntoIterator for Wave {
    type Item = TaskId;
    type IntoIter = std::vec::IntoIter<TaskId>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

/// Plans execution waves from a validated task graph.
pub struct WaveBuilder {
    /// Maximum number of tasks per wave.
    cap: usize,
}

impl WaveBuilder {
    /// Create a wave builder with the given concurrency cap.
    ///
    /// A cap of zero is treated as one; a wave must be able to make progress.
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1) }
    }

    /// The concurrency cap this builder enforces.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Compute the next runnable wave.
    ///
    /// Candidates are the graph's ready tasks minus anything already in
    /// flight, sorted by descending priority then ascending identifier,
    /// truncated to the cap. Returns an empty wave when nothing is
    /// runnable; the caller distinguishes completion from deadlock by
    /// checking whether pending tasks remain.
    pub fn next_wave(
        &self,
        graph: &TaskGraph,
        completed: &HashSet<TaskId>,
        in_flight: &HashSet<TaskId>,
    ) -> Wave {
        let mut candidates: Vec<(i64, TaskId)> = graph
            .ready_tasks(completed)
            .into_iter()
            .filter(|task| !in_flight.contains(&task.id))
            .map(|task| (task.priority, task.id.clone()))
            .collect();

        candidates.sort_by(|(left_prio, left_id), (right_prio, right_id)| {
            right_prio.cmp(left_prio).then_with(|| left_id.cmp(right_id))
        });
        candidates.truncate(self.cap);

        Wave {
            tasks: candidates.into_iter().map(|(_, id)| id).collect(),
        }
    }
}
