use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Overall goal of a decomposition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epic {
    /// Short name of the goal.
    pub title: String,
    /// Longer statement of the goal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A unit of work with exclusively owned files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique id within the plan.
    pub id: String,
    /// Short name.
    pub title: String,
    /// What the worker must do.
    pub description: String,
    /// Files this subtask owns; no other subtask may touch them.
    pub files: Vec<String>,
    /// Ids of subtasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 1 (trivial) to 5 (complex).
    pub complexity: u8,
}

impl Subtask {
    /// Whether the subtask can start without waiting on others.
    pub fn is_independent(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// The plan record: session metadata plus the committed decomposition.
///
/// Written empty at initialization and replaced wholesale by each successful
/// validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Session id.
    pub session_id: Uuid,
    /// Absolute path of the repository the session is bound to.
    pub project_path: PathBuf,
    /// Branch checked out when the session started.
    pub branch: String,
    /// Commit every worktree starts from and abort resets to.
    pub start_commit: String,
    /// Original task description.
    pub task: String,
    /// When the session was initialized.
    pub created_at: DateTime<Utc>,
    /// Committed epic; empty until a plan is validated.
    #[serde(default)]
    pub epic: Epic,
    /// Committed subtasks in plan order.
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

impl Plan {
    /// Empty plan for a new session.
    pub fn new(
        session_id: Uuid,
        project_path: impl Into<PathBuf>,
        branch: impl Into<String>,
        start_commit: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            project_path: project_path.into(),
            branch: branch.into(),
            start_commit: start_commit.into(),
            task: task.into(),
            created_at: Utc::now(),
            epic: Epic::default(),
            subtasks: Vec::new(),
        }
    }

    /// The subtask with `id`.
    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Subtasks that list `id` among their dependencies.
    pub fn dependents_of(&self, id: &str) -> Vec<&Subtask> {
        self.subtasks
            .iter()
            .filter(|s| s.dependencies.iter().any(|d| d == id))
            .collect()
    }

    /// Project name used to namespace worktrees: the repository directory name.
    pub fn project_name(&self) -> String {
        project_name(&self.project_path)
    }

    /// Abbreviated start commit.
    pub fn short_commit(&self) -> &str {
        short_commit(&self.start_commit)
    }
}

/// Directory name of `path`, or `project` when it has none.
pub fn project_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}

/// First seven characters of `commit`.
pub fn short_commit(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}

/// Post-mortem record written once when a session is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Task blamed for the abort.
    pub failed_task: String,
    /// What went wrong.
    pub error: String,
    /// Review attempt the failure happened on.
    pub attempt: u32,
    /// Tasks complete at abort time.
    pub completed_tasks: Vec<String>,
    /// Tasks that had not reached a terminal state.
    pub pending_tasks: Vec<String>,
    /// When the session was aborted.
    pub timestamp: DateTime<Utc>,
}
