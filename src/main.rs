use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use convoy::config::Config;
use convoy::core::dag::DependencyEdge;
use convoy::core::task::{FailurePolicy, Task};
use convoy::orchestration::{CommandExecutor, SchedulerEvent, SchedulerOptions};
use convoy::session::{SessionId, SessionManager};
use convoy::{clog, Error, Result};

/// Convoy - wave-based task scheduler with checkpointed resume
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CONVOY_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.convoy/convoy.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Submit a plan file and run it to completion
    Run {
        /// Path to the TOML plan describing tasks and dependencies
        plan: PathBuf,

        /// Concurrency cap (tasks per wave); overrides config
        #[arg(long)]
        concurrency: Option<usize>,

        /// Retry limit per task; overrides config
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Continue an interrupted session from its last checkpoint
    Resume {
        /// Session ID to resume
        session_id: String,
    },

    /// Show a session's progress as JSON
    Status {
        /// Session ID to inspect
        session_id: String,
    },

    /// List all persisted sessions
    Sessions,
}

/// On-disk plan format for `convoy run`.
#[derive(Debug, Deserialize)]
struct Plan {
    #[serde(default, rename = "task")]
    tasks: Vec<PlanTask>,
}

#[derive(Debug, Deserialize)]
struct PlanTask {
    id: String,
    #[serde(default)]
    description: Option<String>,
    command: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    tier: Option<String>,
    #[serde(default)]
    tolerate_failure: bool,
}

impl Plan {
    fn load(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Lower the plan into scheduler inputs.
    fn into_submission(self) -> (Vec<Task>, Vec<DependencyEdge>) {
        let mut tasks = Vec::with_capacity(self.tasks.len());
        let mut edges = Vec::new();

        for plan_task in self.tasks {
            let description = plan_task
                .description
                .unwrap_or_else(|| plan_task.command.clone());
            let mut task = Task::new(plan_task.id.as_str(), &description)
                .with_command(&plan_task.command)
                .with_priority(plan_task.priority);
            if let Some(secs) = plan_task.timeout_secs {
                task = task.with_budget(Duration::from_secs(secs));
            }
            if let Some(tier) = &plan_task.tier {
                task = task.with_tier(tier);
            }
            if plan_task.tolerate_failure {
                task = task.with_policy(FailurePolicy::Tolerate);
            }

            for dep in &plan_task.depends_on {
                edges.push(DependencyEdge::new(dep.as_str(), plan_task.id.as_str()));
            }
            tasks.push(task);
        }

        (tasks, edges)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    convoy::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run {
            plan,
            concurrency,
            retries,
        } => run_plan(plan, concurrency, retries).await,
        Command::Resume { session_id } => resume_session(&session_id).await,
        Command::Status { session_id } => show_status(&session_id).await,
        Command::Sessions => list_sessions().await,
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId> {
    raw.parse()
        .map_err(|_| Error::SessionNotFound(raw.to_string()))
}

/// Forward scheduler events to stderr so stdout stays parseable JSON.
fn spawn_event_printer(mut rx: mpsc::Receiver<SchedulerEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SchedulerEvent::WavePlanned { index, task_ids } => {
                    let ids: Vec<&str> = task_ids.iter().map(|id| id.as_str()).collect();
                    eprintln!("wave {}: [{}]", index, ids.join(", "));
                }
                SchedulerEvent::TaskStarted { task_id, attempt } if attempt > 1 => {
                    eprintln!("  {} started (attempt {})", task_id, attempt);
                }
                SchedulerEvent::TaskStarted { task_id, .. } => {
                    eprintln!("  {} started", task_id);
                }
                SchedulerEvent::TaskCompleted { task_id } => {
                    eprintln!("  {} completed", task_id);
                }
                SchedulerEvent::TaskRetrying {
                    task_id,
                    attempt,
                    error,
                } => {
                    eprintln!("  {} attempt {} failed, retrying: {}", task_id, attempt, error);
                }
                SchedulerEvent::TaskFailed { task_id, error } => {
                    eprintln!("  {} failed: {}", task_id, error);
                }
                SchedulerEvent::SessionDone => eprintln!("session done"),
                SchedulerEvent::SessionFailed { error } => eprintln!("session failed: {}", error),
            }
        }
    })
}

/// Cancel the token on Ctrl-C; the in-flight wave drains before the
/// session transitions to Failed.
fn install_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received, letting the current wave finish...");
            cancel.cancel();
        }
    });
}

async fn drive(
    manager: &SessionManager,
    session_id: SessionId,
    resume: bool,
) -> Result<()> {
    let executor = CommandExecutor::new();
    if !executor.is_available() {
        return Err(Error::ExecutorNotAvailable("sh not found on PATH".to_string()));
    }

    let (event_tx, event_rx) = mpsc::channel(256);
    let printer = spawn_event_printer(event_rx);
    let cancel = CancellationToken::new();
    install_ctrl_c(cancel.clone());

    let executor = Arc::new(executor);
    let summary = if resume {
        manager.resume(&session_id, executor, event_tx, cancel).await?
    } else {
        manager.run(&session_id, executor, event_tx, cancel).await?
    };
    let _ = printer.await;

    let failed: Vec<_> = summary
        .failed
        .iter()
        .map(|(id, error)| json!({ "id": id, "error": error }))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "session_id": session_id,
            "state": summary.state.to_string(),
            "completed": summary.completed,
            "total": summary.total,
            "waves": summary.waves,
            "failed": failed,
        }))?
    );

    if summary.state == convoy::checkpoint::SessionState::Failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_plan(
    plan_path: PathBuf,
    concurrency: Option<usize>,
    retries: Option<u32>,
) -> Result<()> {
    let config = Config::load()?;
    let manager = SessionManager::new(&config)?;

    let plan = Plan::load(&plan_path)?;
    let (tasks, edges) = plan.into_submission();
    if tasks.is_empty() {
        return Err(Error::Validation(format!(
            "plan {} contains no tasks",
            plan_path.display()
        )));
    }

    let options = SchedulerOptions {
        concurrency: concurrency.unwrap_or(config.concurrency),
        retry_limit: retries.unwrap_or(config.retry_limit),
        retry_delay: config.retry_delay(),
    };

    let session_id = manager.submit(tasks, edges, options).await?;
    clog!("Running session {} from {}", session_id, plan_path.display());
    eprintln!("session {}", session_id);

    drive(&manager, session_id, false).await
}

async fn resume_session(raw_id: &str) -> Result<()> {
    let config = Config::load()?;
    let manager = SessionManager::new(&config)?;
    let session_id = parse_session_id(raw_id)?;

    clog!("Resuming session {}", session_id);
    drive(&manager, session_id, true).await
}

async fn show_status(raw_id: &str) -> Result<()> {
    let config = Config::load()?;
    let manager = SessionManager::new(&config)?;
    let session_id = parse_session_id(raw_id)?;

    let status = manager.status(&session_id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn list_sessions() -> Result<()> {
    let config = Config::load()?;
    let manager = SessionManager::new(&config)?;

    let manifests = manager.sessions().await?;
    if manifests.is_empty() {
        eprintln!("no sessions");
        return Ok(());
    }

    for manifest in manifests {
        let status = manager.status(&manifest.id).await?;
        println!(
            "{}  {}  {:>3}/{:<3}  {}",
            manifest.id,
            status.state,
            status.completed_count,
            status.total_count,
            manifest.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}
