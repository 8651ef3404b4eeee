//! Durable checkpointing of session progress.
//!
//! A `CheckpointRecord` maps every settled task to its terminal state and
//! result payload. The scheduler writes one after each task completion or
//! failure; resume reads it once to seed the completed set. Writes are
//! atomic (temp file + rename) so a concurrent reader never observes a
//! partially written record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::core::task::{TaskId, TaskStatus};
use crate::util::blocking;
use crate::{clog_debug, Error, Result};

/// Session-level state, as persisted in a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session submitted but never run.
    #[default]
    Pending,
    /// A scheduler has started driving this session.
    Running,
    /// Every task completed.
    Done,
    /// Terminal failure; the record stays readable for diagnosis and resume.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Running => write!(f, "running"),
            SessionState::Done => write!(f, "done"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal outcome of a single task, as persisted in a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task's terminal state (Completed or Failed).
    pub status: TaskStatus,
    /// Result payload returned by the executor, if any.
    pub payload: Option<Value>,
    /// Number of execution attempts consumed.
    pub attempts: u32,
}

/// Durable record of a session's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The session this record belongs to.
    pub session_id: String,
    /// Session-level state.
    #[serde(default)]
    pub state: SessionState,
    /// Settled tasks keyed by identifier. BTreeMap keeps the serialized
    /// form stable across runs.
    pub tasks: BTreeMap<TaskId, TaskResult>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Create an empty record for a session.
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: SessionState::Pending,
            tasks: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Update the session-level state, stamping the record.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Record a task's terminal outcome, stamping the record.
    pub fn record(&mut self, task_id: TaskId, status: TaskStatus, payload: Option<Value>, attempts: u32) {
        self.tasks.insert(
            task_id,
            TaskResult {
                status,
                payload,
                attempts,
            },
        );
        self.updated_at = Utc::now();
    }

    /// Identifiers of tasks recorded as Completed.
    pub fn completed_ids(&self) -> HashSet<TaskId> {
        self.tasks
            .iter()
            .filter(|(_, result)| result.status == TaskStatus::Completed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Identifiers and errors of tasks recorded as Failed.
    pub fn failed_tasks(&self) -> Vec<(TaskId, String)> {
        self.tasks
            .iter()
            .filter_map(|(id, result)| match &result.status {
                TaskStatus::Failed { error } => Some((id.clone(), error.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of tasks recorded as Completed.
    pub fn completed_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|result| result.status == TaskStatus::Completed)
            .count()
    }

    /// Check whether a task already has a terminal outcome recorded.
    pub fn is_settled(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }
}

/// File-backed checkpoint store: one pretty-JSON document per session.
///
/// The store is the single-writer boundary for a session's record; all
/// mutations go through an internal mutex so load-mutate-save sequences
/// never interleave. Readers (status queries) tolerate eventually
/// consistent snapshots and bypass the lock.
pub struct CheckpointStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    /// Create a store rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    /// Atomically overwrite the session's checkpoint.
    pub async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save_inner(record).await
    }

    async fn save_inner(&self, record: &CheckpointRecord) -> Result<()> {
        let path = self.path_for(&record.session_id);
        let contents = serde_json::to_string_pretty(record)?;
        clog_debug!(
            "CheckpointStore::save session={} tasks={}",
            record.session_id,
            record.tasks.len()
        );

        blocking(move || {
            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }

            // Write to a temp sibling then rename so readers never see a
            // half-written record.
            let temp_path = path.with_extension("json.tmp");
            fs::write(&temp_path, &contents)?;
            fs::rename(&temp_path, &path)?;
            Ok(())
        })
        .await
    }

    /// Load the last saved checkpoint for a session.
    ///
    /// # Errors
    /// Returns `Error::CheckpointNotFound` if the session has never been
    /// checkpointed.
    pub async fn load(&self, session_id: &str) -> Result<CheckpointRecord> {
        let path = self.path_for(session_id);
        let session_id = session_id.to_string();

        blocking(move || {
            if !path.exists() {
                return Err(Error::CheckpointNotFound(session_id));
            }
            let contents = fs::read_to_string(&path)?;
            let record: CheckpointRecord = serde_json::from_str(&contents)?;
            Ok(record)
        })
        .await
    }

    /// Load, record one task outcome, and re-save.
    ///
    /// Serialized behind the store's write lock so concurrent appends for
    /// the same session cannot interleave and drop results.
    pub async fn append_task_result(
        &self,
        session_id: &str,
        task_id: TaskId,
        status: TaskStatus,
        payload: Option<Value>,
        attempts: u32,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut record = match self.load(session_id).await {
            Ok(record) => record,
            Err(Error::CheckpointNotFound(_)) => CheckpointRecord::new(session_id),
            Err(e) => return Err(e),
        };
        record.record(task_id, status, payload, attempts);
        self.save_inner(&record).await
    }
}
