//! Wave-based session scheduler.
//!
//! The Scheduler drives a validated task graph to completion: it plans
//! bounded waves of ready tasks, dispatches each wave to the injected
//! executor with per-task timeouts, retries failed attempts with a fixed
//! delay, checkpoints every terminal outcome, and advances wave by wave
//! until the graph is exhausted or a fatal failure stops the session.
//!
//! All decision-making (wave planning, reconciliation, checkpoint writes)
//! happens on the scheduler's own task; only executor attempts run
//! concurrently, bounded by the wave cap.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointRecord, CheckpointStore, SessionState};
use crate::config::{DEFAULT_CONCURRENCY, DEFAULT_RETRY_DELAY_MS, DEFAULT_RETRY_LIMIT};
use crate::core::dag::TaskGraph;
use crate::core::task::{FailurePolicy, Task, TaskId, TaskStatus};
use crate::core::wave::WaveBuilder;
use crate::error::{Error, Result};
use crate::orchestration::executor::Executor;
use crate::{clog, clog_debug, clog_error, clog_warn};

/// Phases of the scheduling state machine.
///
/// `Idle -> Planning -> Dispatching -> Awaiting -> Reconciling` loops
/// until the session terminates in `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// No active session.
    Idle,
    /// Consulting the checkpoint and computing the next wave.
    Planning,
    /// Handing the wave's tasks to the executor.
    Dispatching,
    /// Suspended until every dispatched task settles or times out.
    Awaiting,
    /// Writing results to the checkpoint and deciding how to proceed.
    Reconciling,
    /// Every task completed.
    Done,
    /// Terminal failure; the checkpoint remains readable.
    Failed,
}

impl std::fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerPhase::Idle => write!(f, "idle"),
            SchedulerPhase::Planning => write!(f, "planning"),
            SchedulerPhase::Dispatching => write!(f, "dispatching"),
            SchedulerPhase::Awaiting => write!(f, "awaiting"),
            SchedulerPhase::Reconciling => write!(f, "reconciling"),
            SchedulerPhase::Done => write!(f, "done"),
            SchedulerPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Events emitted by the scheduler for session lifecycle changes.
///
/// These allow external components (the CLI, a monitor) to follow
/// progress without polling the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A wave has been planned and is about to dispatch.
    WavePlanned {
        /// 1-based wave number within this run.
        index: usize,
        /// The tasks selected, in dispatch order.
        task_ids: Vec<TaskId>,
    },
    /// An execution attempt has started.
    TaskStarted {
        /// The task being attempted.
        task_id: TaskId,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// A task completed successfully.
    TaskCompleted {
        /// The task that completed.
        task_id: TaskId,
    },
    /// An attempt failed and the task will be retried after the delay.
    TaskRetrying {
        /// The task being retried.
        task_id: TaskId,
        /// The attempt that just failed.
        attempt: u32,
        /// Error message from the failed attempt.
        error: String,
    },
    /// A task failed with retries exhausted (or was cascaded).
    TaskFailed {
        /// The task that failed.
        task_id: TaskId,
        /// Error message describing the failure.
        error: String,
    },
    /// The session reached Done.
    SessionDone,
    /// The session reached Failed.
    SessionFailed {
        /// What stopped the session.
        error: String,
    },
}

/// Caller-tunable scheduling knobs.
///
/// Persisted in the session manifest so a resumed session runs with the
/// options it was submitted with.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerOptions {
    /// Maximum tasks dispatched concurrently within a wave.
    pub concurrency: usize,
    /// Number of re-attempts after a failed or timed-out execution.
    pub retry_limit: u32,
    /// Fixed delay between retry attempts.
    pub retry_delay: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Final accounting for one scheduler run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Terminal session state (Done or Failed).
    pub state: SessionState,
    /// Number of tasks completed, including prior checkpointed progress.
    pub completed: usize,
    /// Total tasks in the graph.
    pub total: usize,
    /// Failed task identifiers with their errors.
    pub failed: Vec<(TaskId, String)>,
    /// Number of waves planned during this run.
    pub waves: usize,
}

/// Outcome of one task's full attempt sequence within a wave.
struct TaskSettlement {
    task_id: TaskId,
    outcome: std::result::Result<serde_json::Value, String>,
    attempts: u32,
}

/// Drives one session's task graph to Done or Failed.
pub struct Scheduler {
    session_id: String,
    graph: TaskGraph,
    builder: WaveBuilder,
    options: SchedulerOptions,
    store: Arc<CheckpointStore>,
    executor: Arc<dyn Executor>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    cancel: CancellationToken,
    phase: SchedulerPhase,
    completed: HashSet<TaskId>,
    waves_planned: usize,
}

impl Scheduler {
    /// Create a scheduler for a session.
    ///
    /// The graph must validate before `run` will dispatch anything; the
    /// checkpoint store is consulted for prior progress so a resumed
    /// session picks up where it stopped.
    pub fn new(
        session_id: &str,
        graph: TaskGraph,
        options: SchedulerOptions,
        store: Arc<CheckpointStore>,
        executor: Arc<dyn Executor>,
        event_tx: mpsc::Sender<SchedulerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let builder = WaveBuilder::new(options.concurrency);
        Self {
            session_id: session_id.to_string(),
            graph,
            builder,
            options,
            store,
            executor,
            event_tx,
            cancel,
            phase: SchedulerPhase::Idle,
            completed: HashSet::new(),
            waves_planned: 0,
        }
    }

    /// Current phase of the state machine.
    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    /// The set of completed task IDs.
    pub fn completed(&self) -> &HashSet<TaskId> {
        &self.completed
    }

    /// Run the session to a terminal state.
    ///
    /// Returns the final accounting; scheduling-level failures (deadlock,
    /// fatal task, cancellation) are reported through the summary rather
    /// than as an `Err`, which is reserved for infrastructure problems
    /// (checkpoint IO, invalid graph).
    pub async fn run(&mut self) -> Result<RunSummary> {
        // Defensive: submit already validated, but a scheduler must never
        // dispatch an unvalidated graph.
        self.graph.validate()?;
        self.phase = SchedulerPhase::Planning;

        let mut record = match self.store.load(&self.session_id).await {
            Ok(record) => record,
            Err(Error::CheckpointNotFound(_)) => CheckpointRecord::new(&self.session_id),
            Err(e) => return Err(e),
        };

        // Resume path: seed graph status and the completed set from the
        // checkpoint so settled tasks are never re-executed.
        for (task_id, result) in record.tasks.clone() {
            match result.status {
                TaskStatus::Completed => {
                    if let Some(task) = self.graph.get_task_mut(&task_id) {
                        task.complete();
                        task.attempts = result.attempts;
                    }
                    self.completed.insert(task_id);
                }
                TaskStatus::Failed { ref error } => {
                    if let Some(task) = self.graph.get_task_mut(&task_id) {
                        task.fail(error);
                        task.attempts = result.attempts;
                    }
                }
                _ => {}
            }
        }
        if !record.tasks.is_empty() {
            clog!(
                "Session {} resuming: {}/{} tasks already settled",
                self.session_id,
                record.tasks.len(),
                self.graph.task_count()
            );
        }

        record.set_state(SessionState::Running);
        self.store.save(&record).await?;

        let failure = self.drive().await?;
        self.finish(failure).await
    }

    /// The Planning -> Dispatching -> Awaiting -> Reconciling loop.
    ///
    /// Returns `None` when every task completed, or the session-level
    /// error message otherwise.
    async fn drive(&mut self) -> Result<Option<String>> {
        loop {
            self.phase = SchedulerPhase::Planning;

            // Under a tolerant failure policy, pending tasks downstream of
            // a failure can never become ready. Settle them now so the
            // pending set shrinks to zero instead of deadlocking.
            for task_id in self.graph.tasks_blocked_by_failure() {
                let error = "dependency failed".to_string();
                let attempts = self
                    .graph
                    .get_task(&task_id)
                    .map(|t| t.attempts)
                    .unwrap_or(0);
                if let Some(task) = self.graph.get_task_mut(&task_id) {
                    task.fail(&error);
                }
                clog_warn!("Task {} cascaded to failed: dependency failed", task_id);
                self.store
                    .append_task_result(
                        &self.session_id,
                        task_id.clone(),
                        TaskStatus::Failed {
                            error: error.clone(),
                        },
                        None,
                        attempts,
                    )
                    .await?;
                let _ = self
                    .event_tx
                    .send(SchedulerEvent::TaskFailed { task_id, error })
                    .await;
            }

            if self.cancel.is_cancelled() {
                clog_warn!("Session {} cancelled", self.session_id);
                return Ok(Some("session cancelled".to_string()));
            }

            if self.graph.pending_count(&self.completed) == 0 {
                if self.graph.all_complete(&self.completed) {
                    return Ok(None);
                }
                let failed = self.failed_count();
                return Ok(Some(format!("{} task(s) failed", failed)));
            }

            let wave = self
                .builder
                .next_wave(&self.graph, &self.completed, &HashSet::new());
            if wave.is_empty() {
                // Unreachable for a validated DAG; if it happens the wave
                // builder has a bug and the session must not spin.
                let pending = self.graph.pending_ids(&self.completed);
                let err = Error::Deadlock { pending };
                clog_error!("Session {}: {}", self.session_id, err);
                return Ok(Some(err.to_string()));
            }

            self.waves_planned += 1;
            clog_debug!(
                "Session {} wave {} planned: {} task(s)",
                self.session_id,
                self.waves_planned,
                wave.len()
            );
            let _ = self
                .event_tx
                .send(SchedulerEvent::WavePlanned {
                    index: self.waves_planned,
                    task_ids: wave.task_ids().to_vec(),
                })
                .await;

            // Dispatching: one tokio task per wave entry, each running the
            // full attempt sequence for its task.
            self.phase = SchedulerPhase::Dispatching;
            let mut handles = Vec::with_capacity(wave.len());
            for task_id in wave.iter() {
                let Some(task) = self.graph.get_task(task_id).cloned() else {
                    continue;
                };
                if let Some(t) = self.graph.get_task_mut(task_id) {
                    t.status = TaskStatus::Running;
                }
                let executor = Arc::clone(&self.executor);
                let options = self.options.clone();
                let event_tx = self.event_tx.clone();
                handles.push(tokio::spawn(run_attempts(task, executor, options, event_tx)));
            }

            // Awaiting: the only suspension point. Completion order within
            // the wave is unconstrained.
            self.phase = SchedulerPhase::Awaiting;
            let settled = futures::future::join_all(handles).await;

            self.phase = SchedulerPhase::Reconciling;
            let mut fatal: Option<String> = None;
            for joined in settled {
                let settlement = match joined {
                    Ok(settlement) => settlement,
                    Err(e) => {
                        // An executor task panicked; the wave result is
                        // unaccounted for, which is fatal to the session.
                        let err = Error::TaskJoin(e.to_string());
                        clog_error!("Session {}: {}", self.session_id, err);
                        fatal.get_or_insert(err.to_string());
                        continue;
                    }
                };
                self.reconcile(settlement, &mut fatal).await?;
            }

            if let Some(error) = fatal {
                return Ok(Some(error));
            }
        }
    }

    /// Fold one task's settlement into the graph, checkpoint, and events.
    async fn reconcile(
        &mut self,
        settlement: TaskSettlement,
        fatal: &mut Option<String>,
    ) -> Result<()> {
        let TaskSettlement {
            task_id,
            outcome,
            attempts,
        } = settlement;

        match outcome {
            Ok(payload) => {
                if let Some(task) = self.graph.get_task_mut(&task_id) {
                    task.complete();
                    task.attempts = attempts;
                }
                self.completed.insert(task_id.clone());
                self.store
                    .append_task_result(
                        &self.session_id,
                        task_id.clone(),
                        TaskStatus::Completed,
                        Some(payload),
                        attempts,
                    )
                    .await?;
                clog_debug!("Task {} completed after {} attempt(s)", task_id, attempts);
                let _ = self
                    .event_tx
                    .send(SchedulerEvent::TaskCompleted { task_id })
                    .await;
            }
            Err(error) => {
                let policy = self
                    .graph
                    .get_task(&task_id)
                    .map(|t| t.policy)
                    .unwrap_or_default();
                if let Some(task) = self.graph.get_task_mut(&task_id) {
                    task.fail(&error);
                    task.attempts = attempts;
                }
                self.store
                    .append_task_result(
                        &self.session_id,
                        task_id.clone(),
                        TaskStatus::Failed {
                            error: error.clone(),
                        },
                        None,
                        attempts,
                    )
                    .await?;
                clog_error!(
                    "Task {} failed after {} attempt(s): {}",
                    task_id,
                    attempts,
                    error
                );
                let _ = self
                    .event_tx
                    .send(SchedulerEvent::TaskFailed {
                        task_id: task_id.clone(),
                        error: error.clone(),
                    })
                    .await;

                // The settlement error already names the task.
                if policy == FailurePolicy::Fatal {
                    fatal.get_or_insert(error);
                }
            }
        }
        Ok(())
    }

    /// Stamp the terminal state and assemble the summary.
    async fn finish(&mut self, failure: Option<String>) -> Result<RunSummary> {
        let mut record = match self.store.load(&self.session_id).await {
            Ok(record) => record,
            Err(Error::CheckpointNotFound(_)) => CheckpointRecord::new(&self.session_id),
            Err(e) => return Err(e),
        };

        let total = self.graph.task_count();
        match failure {
            None => {
                self.phase = SchedulerPhase::Done;
                record.set_state(SessionState::Done);
                self.store.save(&record).await?;
                clog!(
                    "Session {} done: {}/{} tasks in {} wave(s)",
                    self.session_id,
                    record.completed_count(),
                    total,
                    self.waves_planned
                );
                let _ = self.event_tx.send(SchedulerEvent::SessionDone).await;
                Ok(RunSummary {
                    state: SessionState::Done,
                    completed: record.completed_count(),
                    total,
                    failed: Vec::new(),
                    waves: self.waves_planned,
                })
            }
            Some(error) => {
                self.phase = SchedulerPhase::Failed;
                record.set_state(SessionState::Failed);
                self.store.save(&record).await?;
                clog_error!("Session {} failed: {}", self.session_id, error);
                let _ = self
                    .event_tx
                    .send(SchedulerEvent::SessionFailed {
                        error: error.clone(),
                    })
                    .await;
                Ok(RunSummary {
                    state: SessionState::Failed,
                    completed: record.completed_count(),
                    total,
                    failed: record.failed_tasks(),
                    waves: self.waves_planned,
                })
            }
        }
    }

    fn failed_count(&self) -> usize {
        self.graph
            .all_tasks()
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
            .count()
    }
}

/// Run one task's full attempt sequence: timeout-bounded execution with
/// up to `retry_limit` re-attempts and a fixed delay between them.
async fn run_attempts(
    task: Task,
    executor: Arc<dyn Executor>,
    options: SchedulerOptions,
    event_tx: mpsc::Sender<SchedulerEvent>,
) -> TaskSettlement {
    let max_attempts = options.retry_limit + 1;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let _ = event_tx
            .send(SchedulerEvent::TaskStarted {
                task_id: task.id.clone(),
                attempt: attempts,
            })
            .await;

        let outcome = match tokio::time::timeout(task.budget, executor.execute(&task)).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(error)) => Err(Error::TaskExecution {
                id: task.id.clone(),
                error,
            }
            .to_string()),
            Err(_) => Err(Error::TaskTimeout {
                id: task.id.clone(),
                budget: task.budget,
            }
            .to_string()),
        };

        match outcome {
            Ok(payload) => {
                return TaskSettlement {
                    task_id: task.id.clone(),
                    outcome: Ok(payload),
                    attempts,
                };
            }
            Err(error) => {
                if attempts >= max_attempts {
                    return TaskSettlement {
                        task_id: task.id.clone(),
                        outcome: Err(error),
                        attempts,
                    };
                }
                let _ = event_tx
                    .send(SchedulerEvent::TaskRetrying {
                        task_id: task.id.clone(),
                        attempt: attempts,
                        error,
                    })
                    .await;
                tokio::time::sleep(options.retry_delay).await;
            }
        }
    }
}
