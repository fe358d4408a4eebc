use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{ErrorPayload, MessageType, ReviewVerdict, SwarmConfig, SwarmError, SwarmResult};
use swarm_orchestrator::{AbortRequest, Decomposition, Swarm};
use swarm_session::MessageFilter;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "swarm",
    version,
    about = "Coordinate parallel coding agents on one git repository"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "swarm.toml")]
    config: PathBuf,

    /// Swarm state directory (overrides config)
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session for a task in a clean repository
    Init {
        /// What the swarm should accomplish
        #[arg(long)]
        task: String,
        /// Repository to work in
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
    /// Validate a decomposition and store it as the session plan
    Plan {
        session: Uuid,
        /// Decomposition JSON file; read from stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show which subtasks can be spawned now
    Ready { session: Uuid },
    /// Manage per-task worktrees
    Worktree {
        #[command(subcommand)]
        action: WorktreeAction,
    },
    /// Mark a task running and hand its worker a brief
    Spawn { session: Uuid, task: String },
    /// Move a running task into review
    RequestReview { session: Uuid, task: String },
    /// Record a review verdict
    Review {
        session: Uuid,
        task: String,
        /// Verdict JSON, e.g. {"status":"approved","summary":"ok"}
        verdict: String,
        /// Worker to notify (defaults to the task's worker)
        #[arg(long)]
        worker: Option<String>,
    },
    /// Commit a task's worktree and mark it complete
    Complete {
        session: Uuid,
        task: String,
        #[arg(long)]
        summary: Option<String>,
    },
    /// Cancel a task
    Cancel {
        session: Uuid,
        task: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Cherry-pick complete tasks into the repository
    Merge {
        session: Uuid,
        /// Merge only this task
        #[arg(long)]
        task: Option<String>,
    },
    /// Inter-agent messages
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },
    /// Progress overview
    Status { session: Uuid },
    /// Plan context, optionally highlighting one task
    Context {
        session: Uuid,
        #[arg(long)]
        task: Option<String>,
    },
    /// Context a reviewer needs for one task
    ReviewContext { session: Uuid, task: String },
    /// Squash the session's work onto the start commit and close it
    Finalize { session: Uuid },
    /// Roll the repository back and close the session
    Abort {
        session: Uuid,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        failed_task: Option<String>,
        #[arg(long)]
        error: Option<String>,
    },
    /// Run one garbage collection pass
    Gc,
    /// Run garbage collection periodically until interrupted
    Janitor {
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,
    },
}

#[derive(Subcommand)]
enum WorktreeAction {
    Create { session: Uuid, task: String },
    Remove { session: Uuid, task: String },
    List { session: Uuid },
    Cleanup { session: Uuid },
    /// Reset a pending task's worktree to the repository HEAD
    Sync { session: Uuid, task: String },
}

#[derive(Subcommand)]
enum MessageAction {
    Send {
        session: Uuid,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long = "type")]
        kind: MessageType,
        body: String,
        /// Structured payload as JSON
        #[arg(long)]
        data: Option<String>,
    },
    Inbox {
        session: Uuid,
        agent: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    Poll {
        session: Uuid,
        agent: String,
        #[arg(long = "type")]
        kind: MessageType,
        #[arg(long)]
        from: Option<String>,
    },
    Wait {
        session: Uuid,
        agent: String,
        #[arg(long = "type")]
        kind: MessageType,
        #[arg(long)]
        from: Option<String>,
        /// Only messages newer than this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (document, code) = match execute(cli).await {
        Ok(value) => (success(value), ExitCode::SUCCESS),
        Err(e) => (failure(&e), ExitCode::FAILURE),
    };
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(code)
}

async fn execute(cli: Cli) -> SwarmResult<Value> {
    let mut config = SwarmConfig::load_or_default(&cli.config)?;
    if let Some(root) = cli.root {
        config.root_dir = root;
    }
    let swarm = Swarm::open(config).await?;
    run(&swarm, cli.command).await
}

async fn run(swarm: &Swarm, command: Commands) -> SwarmResult<Value> {
    match command {
        Commands::Init { task, project } => to_json(swarm.init_session(&task, &project).await?),
        Commands::Plan { session, file } => {
            let raw = match file {
                Some(path) => tokio::fs::read_to_string(&path).await?,
                None => {
                    let mut raw = String::new();
                    tokio::io::stdin().read_to_string(&mut raw).await?;
                    raw
                }
            };
            let decomposition = Decomposition::parse(&raw)?;
            to_json(swarm.validate_plan(session, decomposition).await?)
        }
        Commands::Ready { session } => to_json(swarm.ready_tasks(session).await?),
        Commands::Worktree { action } => match action {
            WorktreeAction::Create { session, task } => {
                to_json(swarm.create_worktree(session, &task).await?)
            }
            WorktreeAction::Remove { session, task } => {
                let path = swarm.remove_worktree(session, &task).await?;
                Ok(json!({ "task_id": task, "path": path }))
            }
            WorktreeAction::List { session } => {
                Ok(json!({ "worktrees": swarm.list_worktrees(session).await? }))
            }
            WorktreeAction::Cleanup { session } => {
                to_json(swarm.cleanup_worktrees(session).await?)
            }
            WorktreeAction::Sync { session, task } => {
                to_json(swarm.sync_worktree(session, &task).await?)
            }
        },
        Commands::Spawn { session, task } => to_json(swarm.spawn_worker(session, &task).await?),
        Commands::RequestReview { session, task } => {
            let msg = swarm.request_review(session, &task).await?;
            Ok(json!({ "task_id": task, "message": msg }))
        }
        Commands::Review {
            session,
            task,
            verdict,
            worker,
        } => {
            let verdict: ReviewVerdict = serde_json::from_str(&verdict)
                .map_err(|e| SwarmError::Validation(format!("invalid verdict: {e}")))?;
            to_json(
                swarm
                    .submit_review(session, &task, worker.as_deref(), verdict)
                    .await?,
            )
        }
        Commands::Complete {
            session,
            task,
            summary,
        } => to_json(
            swarm
                .complete_task(session, &task, summary.as_deref())
                .await?,
        ),
        Commands::Cancel {
            session,
            task,
            reason,
        } => to_json(swarm.cancel_task(session, &task, reason.as_deref()).await?),
        Commands::Merge { session, task } => match task {
            Some(task) => to_json(swarm.merge_task(session, &task).await?),
            None => to_json(swarm.merge_all(session).await?),
        },
        Commands::Message { action } => run_message(swarm, action).await,
        Commands::Status { session } => to_json(swarm.status(session).await?),
        Commands::Context { session, task } => {
            to_json(swarm.context(session, task.as_deref()).await?)
        }
        Commands::ReviewContext { session, task } => {
            to_json(swarm.review_context(session, &task).await?)
        }
        Commands::Finalize { session } => to_json(swarm.finalize(session).await?),
        Commands::Abort {
            session,
            reason,
            failed_task,
            error,
        } => to_json(
            swarm
                .abort(
                    session,
                    AbortRequest {
                        reason,
                        failed_task,
                        error,
                    },
                )
                .await?,
        ),
        Commands::Gc => to_json(swarm.janitor().sweep().await?),
        Commands::Janitor { interval_secs } => {
            let interval = Duration::from_secs(interval_secs.max(1));
            info!(interval_secs = interval.as_secs(), "Janitor started");
            let handle = Arc::new(swarm.janitor()).start(interval);
            tokio::signal::ctrl_c().await?;
            handle.abort();
            info!("Janitor stopped");
            Ok(json!({ "stopped": true }))
        }
    }
}

async fn run_message(swarm: &Swarm, action: MessageAction) -> SwarmResult<Value> {
    match action {
        MessageAction::Send {
            session,
            from,
            to,
            kind,
            body,
            data,
        } => {
            let data = data
                .map(|raw| {
                    serde_json::from_str(&raw)
                        .map_err(|e| SwarmError::Validation(format!("invalid data: {e}")))
                })
                .transpose()?;
            let msg = swarm
                .send_message(session, &from, &to, kind, &body, data)
                .await?;
            Ok(json!({ "message": msg }))
        }
        MessageAction::Inbox {
            session,
            agent,
            limit,
        } => {
            let messages = swarm.read_inbox(session, &agent, limit).await?;
            Ok(json!({ "count": messages.len(), "messages": messages }))
        }
        MessageAction::Poll {
            session,
            agent,
            kind,
            from,
        } => to_json(
            swarm
                .poll_messages(session, &agent, &filter(kind, from, None))
                .await?,
        ),
        MessageAction::Wait {
            session,
            agent,
            kind,
            from,
            since,
            timeout_secs,
        } => to_json(
            swarm
                .wait_for_message(
                    session,
                    &agent,
                    &filter(kind, from, since),
                    Duration::from_secs(timeout_secs),
                )
                .await?,
        ),
    }
}

fn filter(kind: MessageType, from: Option<String>, since: Option<DateTime<Utc>>) -> MessageFilter {
    let mut filter = MessageFilter::kind(kind);
    if let Some(from) = from {
        filter = filter.from_agent(from);
    }
    if let Some(since) = since {
        filter = filter.since(since);
    }
    filter
}

fn to_json<T: Serialize>(value: T) -> SwarmResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// `{"success": true, ...}`; non-object results go under `result`.
fn success(value: Value) -> Value {
    let mut doc = Map::new();
    doc.insert("success".into(), Value::Bool(true));
    match value {
        Value::Object(fields) => doc.extend(fields),
        other => {
            doc.insert("result".into(), other);
        }
    }
    Value::Object(doc)
}

fn failure(err: &SwarmError) -> Value {
    json!({ "success": false, "error": ErrorPayload::from(err) })
}
