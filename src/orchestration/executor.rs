//! Executor capability boundary.
//!
//! The scheduler is executor-agnostic: anything that can turn a `Task`
//! into a result payload or an error string can drive a session. The
//! scheduler enforces each task's time budget externally, so executors
//! do not need to self-police timeouts.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::clog_trace;
use crate::core::task::Task;

/// Outcome of a single execution attempt.
///
/// `Ok` carries the result payload persisted into the checkpoint;
/// `Err` carries a human-readable failure description.
pub type ExecOutcome = std::result::Result<Value, String>;

/// External capability that performs a task's actual work.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &Task) -> ExecOutcome;
}

/// Closure-backed executor.
///
/// Useful for library embedders and deterministic tests: the closure
/// decides each task's outcome synchronously.
pub struct FnExecutor<F>
where
    F: Fn(&Task) -> ExecOutcome + Send + Sync,
{
    f: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&Task) -> ExecOutcome + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Executor for FnExecutor<F>
where
    F: Fn(&Task) -> ExecOutcome + Send + Sync,
{
    async fn execute(&self, task: &Task) -> ExecOutcome {
        (self.f)(task)
    }
}

/// Executor that runs each task's shell command as a subprocess.
///
/// This is the executor behind the `convoy run` CLI. The command is
/// taken from `task.command`; stdout/stderr are captured into the result
/// payload. A non-zero exit code is an execution failure.
pub struct CommandExecutor {
    shell: String,
}

impl CommandExecutor {
    /// Create a command executor using `sh -c`.
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different shell binary (e.g. "bash").
    pub fn with_shell(shell: &str) -> Self {
        Self {
            shell: shell.to_string(),
        }
    }

    /// Check whether the configured shell is on PATH.
    pub fn is_available(&self) -> bool {
        which::which(&self.shell).is_ok()
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, task: &Task) -> ExecOutcome {
        let command = task
            .command
            .as_deref()
            .ok_or_else(|| format!("task {} has no command", task.id))?;

        clog_trace!("CommandExecutor task={} command={}", task.id, command);

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to spawn {}: {}", self.shell, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            Ok(json!({
                "exit_code": exit_code,
                "stdout": stdout,
                "stderr": stderr,
            }))
        } else {
            Err(format!(
                "command exited with code {}: {}",
                exit_code,
                stderr.trim()
            ))
        }
    }
}
