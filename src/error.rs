use std::time::Duration;
use thiserror::Error;

use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Duplicate task: {0}")]
    DuplicateTask(TaskId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Cyclic dependency: {}", format_ids(cycle))]
    CyclicDependency { cycle: Vec<TaskId> },

    #[error("Deadlock: no runnable tasks but {} still pending: {}", pending.len(), format_ids(pending))]
    Deadlock { pending: Vec<TaskId> },

    #[error("Task {id} timed out after {budget:?}")]
    TaskTimeout { id: TaskId, budget: Duration },

    #[error("Task {id} failed: {error}")]
    TaskExecution { id: TaskId, error: String },

    #[error("No checkpoint for session: {0}")]
    CheckpointNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Executor not available: {0}")]
    ExecutorNotAvailable(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, Error>;
