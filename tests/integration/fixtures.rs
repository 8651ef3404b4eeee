//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Isolated convoy state directories (sessions + checkpoints)
//! - Deterministic executors with call recording
//! - Predefined task sets and dependency shapes

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use convoy::checkpoint::CheckpointStore;
use convoy::config::Config;
use convoy::core::dag::DependencyEdge;
use convoy::core::task::{Task, TaskId};
use convoy::orchestration::{
    ExecOutcome, Executor, RunSummary, SchedulerEvent, SchedulerOptions,
};
use convoy::session::{SessionId, SessionManager};

/// Scheduler options tuned for tests: default cap, no retry delay.
pub fn test_options() -> SchedulerOptions {
    SchedulerOptions {
        concurrency: 2,
        retry_limit: 2,
        retry_delay: Duration::ZERO,
    }
}

/// An isolated convoy state directory with a session manager over it.
///
/// Every environment gets its own temp directory, so tests never share
/// manifests or checkpoints.
pub struct TestEnv {
    /// Keeps the state directory alive for the environment's lifetime.
    pub temp_dir: TempDir,
    pub manager: SessionManager,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = Config {
            state_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        let manager = SessionManager::new(&config).expect("Failed to create session manager");
        Self { temp_dir, manager }
    }

    /// The checkpoint store backing this environment's sessions.
    pub fn store(&self) -> Arc<CheckpointStore> {
        self.manager.store()
    }

    /// Submit a session with the test options.
    pub async fn submit(&self, tasks: Vec<Task>, edges: Vec<DependencyEdge>) -> SessionId {
        self.manager
            .submit(tasks, edges, test_options())
            .await
            .expect("Failed to submit session")
    }

    /// Run a session to a terminal state, collecting every scheduler event.
    pub async fn run(
        &self,
        id: &SessionId,
        executor: Arc<dyn Executor>,
    ) -> (RunSummary, Vec<SchedulerEvent>) {
        self.run_with_cancel(id, executor, CancellationToken::new())
            .await
    }

    /// Run a session with an external cancellation token.
    pub async fn run_with_cancel(
        &self,
        id: &SessionId,
        executor: Arc<dyn Executor>,
        cancel: CancellationToken,
    ) -> (RunSummary, Vec<SchedulerEvent>) {
        let (event_tx, mut event_rx) = mpsc::channel(1024);
        let summary = self
            .manager
            .run(id, executor, event_tx, cancel)
            .await
            .expect("Scheduler run failed");

        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        (summary, events)
    }

    /// Resume a session from its checkpoint, collecting events.
    pub async fn resume(
        &self,
        id: &SessionId,
        executor: Arc<dyn Executor>,
    ) -> (RunSummary, Vec<SchedulerEvent>) {
        let (event_tx, mut event_rx) = mpsc::channel(1024);
        let summary = self
            .manager
            .resume(id, executor, event_tx, CancellationToken::new())
            .await
            .expect("Scheduler resume failed");

        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        (summary, events)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a test task with the given identifier.
pub fn test_task(id: &str) -> Task {
    Task::new(id, &format!("{} description", id))
}

/// Create a set of independent tasks: task-0 .. task-(count-1).
pub fn independent_tasks(count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| test_task(&format!("task-{}", i)))
        .collect()
}

/// A and B independent, C depends on both.
///
/// ```text
///   A
///    \
///     C
///    /
///   B
/// ```
pub fn diamond() -> (Vec<Task>, Vec<DependencyEdge>) {
    (
        vec![test_task("A"), test_task("B"), test_task("C")],
        vec![DependencyEdge::new("A", "C"), DependencyEdge::new("B", "C")],
    )
}

/// A chain: a -> b -> c.
pub fn chain() -> (Vec<Task>, Vec<DependencyEdge>) {
    (
        vec![test_task("a"), test_task("b"), test_task("c")],
        vec![DependencyEdge::new("a", "b"), DependencyEdge::new("b", "c")],
    )
}

/// Executor that records every attempt and delegates the outcome to a
/// closure receiving the task and its 1-based attempt number.
///
/// The call log makes exactly-once and never-re-executed assertions
/// possible without instrumenting the scheduler.
pub struct RecordingExecutor<F>
where
    F: Fn(&Task, u32) -> ExecOutcome + Send + Sync,
{
    calls: Mutex<Vec<TaskId>>,
    outcome: F,
}

impl<F> RecordingExecutor<F>
where
    F: Fn(&Task, u32) -> ExecOutcome + Send + Sync,
{
    pub fn with_outcome(outcome: F) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            outcome,
        })
    }

    /// Every recorded attempt, in execution order.
    pub fn calls(&self) -> Vec<TaskId> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of attempts recorded for one task.
    pub fn attempts_for(&self, id: &TaskId) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == id).count()
    }

    /// Attempts recorded per task.
    pub fn attempt_counts(&self) -> HashMap<TaskId, usize> {
        let mut counts = HashMap::new();
        for call in self.calls.lock().unwrap().iter() {
            *counts.entry(call.clone()).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl<F> Executor for RecordingExecutor<F>
where
    F: Fn(&Task, u32) -> ExecOutcome + Send + Sync,
{
    async fn execute(&self, task: &Task) -> ExecOutcome {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(task.id.clone());
            calls.iter().filter(|c| **c == task.id).count() as u32
        };
        (self.outcome)(task, attempt)
    }
}

/// Recording executor where every attempt succeeds with the task id as
/// its payload.
pub fn ok_executor() -> Arc<RecordingExecutor<impl Fn(&Task, u32) -> ExecOutcome + Send + Sync>> {
    RecordingExecutor::with_outcome(|task, _| Ok(json!(task.id.as_str())))
}

/// The task-id batches of every planned wave, in planning order.
pub fn waves_of(events: &[SchedulerEvent]) -> Vec<Vec<TaskId>> {
    events
        .iter()
        .filter_map(|event| match event {
            SchedulerEvent::WavePlanned { task_ids, .. } => Some(task_ids.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_creates_state_dirs() {
        let env = TestEnv::new();
        assert!(env.temp_dir.path().join("sessions").exists());
        assert!(env.temp_dir.path().join("checkpoints").exists());
    }

    #[test]
    fn test_diamond_shape() {
        let (tasks, edges) = diamond();
        assert_eq!(tasks.len(), 3);
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.to == TaskId::from("C")));
    }

    #[tokio::test]
    async fn test_recording_executor_counts_attempts() {
        let executor = ok_executor();
        let task = test_task("a");

        executor.execute(&task).await.unwrap();
        executor.execute(&task).await.unwrap();

        assert_eq!(executor.attempts_for(&TaskId::from("a")), 2);
        assert_eq!(executor.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_recording_executor_passes_attempt_number() {
        let executor = RecordingExecutor::with_outcome(|_, attempt| {
            if attempt < 2 {
                Err("transient".to_string())
            } else {
                Ok(json!(attempt))
            }
        });
        let task = test_task("a");

        assert!(executor.execute(&task).await.is_err());
        assert_eq!(executor.execute(&task).await.unwrap(), json!(2));
    }
}
