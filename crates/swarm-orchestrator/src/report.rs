//! Serializable results returned by [`crate::Swarm`] operations.

use crate::planner::ValidationReport;
use crate::review::ReviewOutcome;
use crate::worktree::CleanupFailure;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use swarm_core::{Failure, Plan, Subtask, TaskBoard, TaskStatus};
use uuid::Uuid;

/// Result of starting a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// Id of the new session.
    pub session_id: Uuid,
    /// Project name used in worktree paths.
    pub project: String,
    /// Canonical path of the main working copy.
    pub project_path: PathBuf,
    /// Branch checked out at init.
    pub branch: String,
    /// Commit every worktree starts from and abort resets to.
    pub start_commit: String,
    /// Stale sessions removed as a side effect.
    pub collected_sessions: Vec<Uuid>,
}

/// Result of a successful plan validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReport {
    /// Session the plan belongs to.
    pub session_id: Uuid,
    /// The committed epic.
    pub epic: swarm_core::Epic,
    /// Counts derived from the plan.
    #[serde(flatten)]
    pub validation: ValidationReport,
    /// Subtasks with ids and dependency lists filled in.
    pub subtasks: Vec<Subtask>,
}

/// A task's worktree binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeReport {
    /// Bound task.
    pub task_id: String,
    /// Worktree directory.
    pub path: PathBuf,
    /// False when an existing live worktree was reused.
    pub created: bool,
}

/// Result of syncing a pending worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Synced task.
    pub task_id: String,
    /// Worktree directory.
    pub path: PathBuf,
    /// Commit the worktree now sits on.
    pub commit: String,
}

/// Epic fields handed to agents alongside the original request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpicContext {
    /// Epic title.
    pub title: String,
    /// Epic description, if the plan had one.
    pub description: Option<String>,
    /// The request the session was started with.
    pub original_task: String,
}

impl EpicContext {
    /// Epic context of `plan`.
    pub fn of(plan: &Plan) -> Self {
        Self {
            title: plan.epic.title.clone(),
            description: plan.epic.description.clone(),
            original_task: plan.task.clone(),
        }
    }
}

/// One line of the subtask overview in a worker brief.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskSummary {
    /// Subtask id.
    pub id: String,
    /// Subtask title.
    pub title: String,
    /// Whether this is the brief's own task.
    pub is_current: bool,
}

/// Everything a worker needs to start on its task. Sent as the payload of
/// the `spawn` message and returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerBrief {
    /// Session the worker belongs to.
    pub session_id: Uuid,
    /// Epic and original request.
    pub epic: EpicContext,
    /// Every subtask of the plan, in plan order.
    pub all_subtasks: Vec<SubtaskSummary>,
    /// The worker's task.
    pub task_id: String,
    /// Title of the worker's task.
    pub task_title: String,
    /// Description of the worker's task.
    pub task_description: String,
    /// Files the worker owns.
    pub files: Vec<String>,
    /// Ids of the tasks this one depends on.
    pub dependencies: Vec<String>,
    /// Where the worker must make its changes.
    pub worktree_path: PathBuf,
    /// The worker's mailbox id.
    pub worker_id: String,
}

/// Result of recording a review verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    /// Reviewed task.
    pub task_id: String,
    /// Task status after the verdict.
    pub status: TaskStatus,
    /// What the verdict did to the task.
    #[serde(flatten)]
    pub outcome: ReviewOutcome,
    /// Review attempts allowed before the task fails.
    pub max_attempts: u32,
    /// Id of the message sent to the worker.
    pub message_id: Uuid,
}

/// Result of completing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteReport {
    /// Completed task.
    pub task_id: String,
    /// Its title.
    pub task_title: String,
    /// Task commit, absent when there was nothing to commit.
    pub commit: Option<String>,
    /// The worktree had no changes since its base commit.
    pub empty: bool,
}

/// Result of cancelling a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReport {
    /// Cancelled task.
    pub task_id: String,
    /// Status before cancellation.
    pub previous: TaskStatus,
    /// Whether a bound worktree was removed.
    pub worktree_released: bool,
}

/// Number of subtasks per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Pending, including subtasks without a worktree yet.
    pub pending: usize,
    /// Running.
    pub running: usize,
    /// Under review.
    pub reviewing: usize,
    /// Complete.
    pub complete: usize,
    /// Failed review.
    pub failed: usize,
    /// Cancelled.
    pub cancelled: usize,
}

impl StatusCounts {
    /// Count every subtask of `plan` by its status on `board`.
    pub fn tally(plan: &Plan, board: &TaskBoard) -> Self {
        let mut counts = Self::default();
        for subtask in &plan.subtasks {
            let slot = match board.status_of(&subtask.id) {
                TaskStatus::Pending => &mut counts.pending,
                TaskStatus::Running => &mut counts.running,
                TaskStatus::Reviewing => &mut counts.reviewing,
                TaskStatus::Complete => &mut counts.complete,
                TaskStatus::Failed => &mut counts.failed,
                TaskStatus::Cancelled => &mut counts.cancelled,
            };
            *slot += 1;
        }
        counts
    }
}

/// Per-task line of a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    /// Subtask id.
    pub id: String,
    /// Subtask title.
    pub title: String,
    /// Current status.
    pub status: TaskStatus,
    /// Worker mailbox id, once spawned.
    pub worker_id: Option<String>,
    /// Bound worktree, if any.
    pub worktree: Option<PathBuf>,
    /// Task commit, once complete.
    pub commit: Option<String>,
    /// Rejected reviews so far.
    pub review_attempts: u32,
    /// Whether the commit reached the main line.
    pub merged: bool,
    /// Last recorded error.
    pub error: Option<String>,
}

/// Snapshot of a whole session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Session id.
    pub session_id: Uuid,
    /// The original request.
    pub task: String,
    /// Epic title, empty before a plan is validated.
    pub epic_title: String,
    /// Branch checked out at init.
    pub branch: String,
    /// Commit the session started from.
    pub start_commit: String,
    /// Number of subtasks.
    pub total: usize,
    /// Subtasks per status.
    pub counts: StatusCounts,
    /// Share of complete subtasks, rounded.
    pub progress_percent: u8,
    /// Every subtask is complete.
    pub is_complete: bool,
    /// Some subtask failed.
    pub has_failures: bool,
    /// One row per subtask, in plan order.
    pub tasks: Vec<TaskRow>,
    /// Post-mortem record of an aborted session.
    pub failure: Option<Failure>,
}

/// A subtask as shown in a context report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskContext {
    /// Subtask id.
    pub id: String,
    /// Subtask title.
    pub title: String,
    /// Subtask description.
    pub description: String,
    /// Owned files.
    pub files: Vec<String>,
    /// Dependency ids.
    pub dependencies: Vec<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Whether this is the task the report was asked about.
    pub is_highlighted: bool,
}

/// Progress summary of a context report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Number of subtasks.
    pub total: usize,
    /// Complete subtasks.
    pub complete: usize,
    /// Running or under review.
    pub running: usize,
    /// Pending subtasks.
    pub pending: usize,
}

/// Session context for an agent joining mid-session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextReport {
    /// Session id.
    pub session_id: Uuid,
    /// Epic and original request.
    pub epic: EpicContext,
    /// Every subtask with its status.
    pub subtasks: Vec<SubtaskContext>,
    /// The requested subtask, when one was named.
    pub highlighted_task: Option<SubtaskContext>,
    /// Progress counts.
    pub progress: Progress,
}

/// Id, title and description of a neighbouring task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBrief {
    /// Subtask id.
    pub id: String,
    /// Subtask title.
    pub title: String,
    /// Subtask description.
    pub description: String,
}

impl From<&Subtask> for TaskBrief {
    fn from(s: &Subtask) -> Self {
        Self {
            id: s.id.clone(),
            title: s.title.clone(),
            description: s.description.clone(),
        }
    }
}

/// The task under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewTarget {
    /// Subtask id.
    pub id: String,
    /// Subtask title.
    pub title: String,
    /// Subtask description.
    pub description: String,
    /// Files the change must stay within.
    pub files: Vec<String>,
    /// Worktree holding the change.
    pub worktree: PathBuf,
    /// Rejected reviews so far.
    pub review_attempts: u32,
}

/// What a reviewer needs to judge one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewContext {
    /// Session id.
    pub session_id: Uuid,
    /// Epic and original request.
    pub epic: EpicContext,
    /// The task under review.
    pub task: ReviewTarget,
    /// Requirements the change must meet.
    pub requirements: String,
    /// Dependencies that are already complete.
    pub completed_dependencies: Vec<TaskBrief>,
    /// Tasks that build on this one.
    pub downstream_tasks: Vec<TaskBrief>,
    /// Points to check.
    pub review_focus: Vec<String>,
}

/// Result of finalizing a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeReport {
    /// Session id.
    pub session_id: Uuid,
    /// Branch the work now sits on, uncommitted.
    pub branch: String,
    /// Commit the changes are staged against.
    pub start_commit: String,
    /// Ids of the complete tasks.
    pub completed_tasks: Vec<String>,
    /// Worktrees removed.
    pub removed_worktrees: Vec<PathBuf>,
    /// Worktrees that could not be removed.
    pub cleanup_failures: Vec<CleanupFailure>,
    /// Diff stat against the start commit.
    pub diff_summary: String,
    /// Complete tasks whose commits never reached the main line.
    pub unmerged_tasks: Vec<String>,
}

/// Result of aborting a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReport {
    /// Session id.
    pub session_id: Uuid,
    /// Commit the main working copy was reset to.
    pub reset_to: String,
    /// Post-mortem record kept on disk.
    pub failure: Failure,
    /// Worktrees removed.
    pub removed_worktrees: Vec<PathBuf>,
    /// Worktrees that could not be removed.
    pub cleanup_failures: Vec<CleanupFailure>,
}
