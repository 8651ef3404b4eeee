//! Session management: the public surface for submitting, running,
//! resuming, and inspecting scheduler sessions.
//!
//! A session is one full run of a task graph. Submission validates the
//! graph and persists a manifest (tasks, edges, options) so the graph
//! can be rebuilt at resume time; progress itself lives in the
//! checkpoint store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::{CheckpointRecord, CheckpointStore, SessionState};
use crate::config::Config;
use crate::core::dag::{DependencyEdge, TaskGraph};
use crate::core::task::{Task, TaskId};
use crate::orchestration::{Executor, RunSummary, Scheduler, SchedulerEvent, SchedulerOptions};
use crate::util::blocking;
use crate::{clog, clog_debug, Error, Result};

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Persisted definition of a session: everything needed to rebuild its
/// graph and rerun the scheduler with the original options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub edges: Vec<DependencyEdge>,
    pub options: SchedulerOptions,
}

/// A failed task surfaced through a status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
    pub id: TaskId,
    pub error: String,
}

/// Read-only snapshot of a session's progress.
///
/// Built from the manifest and the latest checkpoint; safe to request
/// while a scheduler is running (the snapshot is eventually consistent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub completed_count: usize,
    pub total_count: usize,
    pub failed_tasks: Vec<FailedTask>,
}

/// Manages session manifests and drives schedulers over them.
pub struct SessionManager {
    sessions_dir: PathBuf,
    store: Arc<CheckpointStore>,
}

impl SessionManager {
    /// Create a manager rooted at the config's state directories.
    pub fn new(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;
        Ok(Self {
            sessions_dir: config.sessions_dir()?,
            store: Arc::new(CheckpointStore::new(config.checkpoints_dir()?)),
        })
    }

    /// The checkpoint store backing this manager's sessions.
    pub fn store(&self) -> Arc<CheckpointStore> {
        Arc::clone(&self.store)
    }

    fn manifest_path(&self, id: &SessionId) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", id))
    }

    /// Validate and register a new session.
    ///
    /// The graph is built and checked here; duplicate identifiers,
    /// unknown edge endpoints, and cycles are returned synchronously and
    /// never reach the scheduler. On success the manifest and an empty
    /// Pending checkpoint are persisted.
    pub async fn submit(
        &self,
        tasks: Vec<Task>,
        edges: Vec<DependencyEdge>,
        options: SchedulerOptions,
    ) -> Result<SessionId> {
        // Build the graph purely to validate the submission.
        build_graph(&tasks, &edges)?.validate()?;

        let manifest = SessionManifest {
            id: SessionId::new(),
            created_at: Utc::now(),
            tasks,
            edges,
            options,
        };

        let path = self.manifest_path(&manifest.id);
        if path.exists() {
            return Err(Error::SessionExists(manifest.id.to_string()));
        }

        let contents = serde_json::to_string_pretty(&manifest)?;
        blocking(move || {
            let temp_path = path.with_extension("json.tmp");
            fs::write(&temp_path, &contents)?;
            fs::rename(&temp_path, &path)?;
            Ok(())
        })
        .await?;

        self.store
            .save(&CheckpointRecord::new(&manifest.id.to_string()))
            .await?;

        clog!(
            "Session {} submitted: {} task(s), {} edge(s), cap {}",
            manifest.id.short(),
            manifest.tasks.len(),
            manifest.edges.len(),
            manifest.options.concurrency
        );
        Ok(manifest.id)
    }

    /// Load a session's persisted manifest.
    pub async fn load_manifest(&self, id: &SessionId) -> Result<SessionManifest> {
        let path = self.manifest_path(id);
        let session_id = id.to_string();
        clog_debug!("SessionManager::load_manifest path={}", path.display());

        blocking(move || {
            if !path.exists() {
                return Err(Error::SessionNotFound(session_id));
            }
            let contents = fs::read_to_string(&path)?;
            let manifest: SessionManifest = serde_json::from_str(&contents)?;
            Ok(manifest)
        })
        .await
    }

    /// Drive a session to a terminal state with the given executor.
    ///
    /// Works for fresh and partially completed sessions alike: the
    /// scheduler seeds itself from the checkpoint, so already settled
    /// tasks are never re-executed.
    pub async fn run(
        &self,
        id: &SessionId,
        executor: Arc<dyn Executor>,
        event_tx: mpsc::Sender<SchedulerEvent>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let manifest = self.load_manifest(id).await?;
        let graph = build_graph(&manifest.tasks, &manifest.edges)?;

        let mut scheduler = Scheduler::new(
            &id.to_string(),
            graph,
            manifest.options,
            self.store(),
            executor,
            event_tx,
            cancel,
        );
        scheduler.run().await
    }

    /// Continue an interrupted session from its last checkpoint.
    ///
    /// Identical to `run` except it insists a checkpoint exists, so a
    /// typo'd identifier fails loudly instead of starting from scratch.
    pub async fn resume(
        &self,
        id: &SessionId,
        executor: Arc<dyn Executor>,
        event_tx: mpsc::Sender<SchedulerEvent>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        self.store.load(&id.to_string()).await?;
        self.run(id, executor, event_tx, cancel).await
    }

    /// Read-only status query.
    pub async fn status(&self, id: &SessionId) -> Result<SessionStatus> {
        let manifest = self.load_manifest(id).await?;

        let record = match self.store.load(&id.to_string()).await {
            Ok(record) => record,
            Err(Error::CheckpointNotFound(_)) => CheckpointRecord::new(&id.to_string()),
            Err(e) => return Err(e),
        };

        Ok(SessionStatus {
            session_id: *id,
            state: record.state,
            completed_count: record.completed_count(),
            total_count: manifest.tasks.len(),
            failed_tasks: record
                .failed_tasks()
                .into_iter()
                .map(|(id, error)| FailedTask { id, error })
                .collect(),
        })
    }

    /// Enumerate persisted sessions, newest first.
    pub async fn sessions(&self) -> Result<Vec<SessionManifest>> {
        let dir = self.sessions_dir.clone();

        let mut manifests: Vec<SessionManifest> = blocking(move || {
            let mut found = Vec::new();
            if !dir.exists() {
                return Ok(found);
            }
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    if let Ok(contents) = fs::read_to_string(&path) {
                        if let Ok(manifest) = serde_json::from_str::<SessionManifest>(&contents) {
                            found.push(manifest);
                        }
                    }
                }
            }
            Ok(found)
        })
        .await?;

        manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(manifests)
    }
}

/// Build a task graph from submitted tasks and edges.
///
/// Surfaces `DuplicateTask` and `UnknownTask`; cycle detection is the
/// caller's `validate()` step.
fn build_graph(tasks: &[Task], edges: &[DependencyEdge]) -> Result<TaskGraph> {
    let mut graph = TaskGraph::new();
    for task in tasks {
        graph.add_task(task.clone())?;
    }
    for edge in edges {
        graph.add_edge(&edge.from, &edge.to)?;
    }
    Ok(graph)
}
