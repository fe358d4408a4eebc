use crate::error::{SwarmError, SwarmResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Lifecycle status of a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Bound to a worktree or waiting for one.
    Pending,
    /// A worker is on it.
    Running,
    /// Under review.
    Reviewing,
    /// Committed and done.
    Complete,
    /// Ran out of review attempts.
    Failed,
    /// Cancelled before finishing.
    Cancelled,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Reviewing,
        TaskStatus::Complete,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Counts against the admission bound.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Reviewing)
    }

    /// Whether moving from `self` to `to` is legal.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Reviewing)
                | (Running, Complete)
                | (Reviewing, Running)
                | (Reviewing, Complete)
                | (Reviewing, Failed)
                | (Pending, Cancelled)
                | (Running, Cancelled)
                | (Reviewing, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Reviewing => write!(f, "reviewing"),
            TaskStatus::Complete => write!(f, "complete"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-subtask lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    /// Subtask id.
    pub task_id: String,
    /// Current status.
    pub status: TaskStatus,
    /// Bound worktree, if any.
    #[serde(default)]
    pub worktree: Option<PathBuf>,
    /// Mailbox id of the worker, once spawned.
    #[serde(default)]
    pub worker_id: Option<String>,
    /// First time the task started running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Commit the worktree was created or last synced at.
    #[serde(default)]
    pub base_commit: Option<String>,
    /// Commit produced in the worktree, if any.
    #[serde(default)]
    pub commit: Option<String>,
    /// Rejected reviews so far.
    #[serde(default)]
    pub review_attempts: u32,
    /// Last error or cancellation reason.
    #[serde(default)]
    pub error: Option<String>,
    /// Whether `commit` has been cherry-picked into the main line.
    #[serde(default)]
    pub merged: bool,
}

impl TaskState {
    /// Fresh record for a task that was just bound to `worktree`.
    pub fn pending(task_id: impl Into<String>, worktree: PathBuf) -> Self {
        Self {
            worktree: Some(worktree),
            ..Self::unbound(task_id)
        }
    }

    /// Record the commit the bound worktree starts from.
    pub fn based_on(mut self, commit: impl Into<String>) -> Self {
        self.base_commit = Some(commit.into());
        self
    }

    /// Pending record with no worktree; never admitted until one is bound.
    pub fn unbound(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            worktree: None,
            worker_id: None,
            started_at: None,
            completed_at: None,
            base_commit: None,
            commit: None,
            review_attempts: 0,
            error: None,
            merged: false,
        }
    }

    /// Move to `to`, stamping timestamps. Illegal moves are rejected and leave
    /// the record untouched.
    pub fn transition(&mut self, to: TaskStatus, now: DateTime<Utc>) -> SwarmResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(SwarmError::StateConflict(format!(
                "task {} cannot move from {} to {}",
                self.task_id, self.status, to
            )));
        }
        if to == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = to;
        Ok(())
    }
}

/// The TaskState collection of a session, versioned for compare-and-set writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBoard {
    /// Bumped by the store on every successful write.
    pub revision: u64,
    /// Records keyed by task id.
    pub tasks: BTreeMap<String, TaskState>,
}

impl TaskBoard {
    /// Record of `task_id`.
    pub fn get(&self, task_id: &str) -> Option<&TaskState> {
        self.tasks.get(task_id)
    }

    /// Mutable record of `task_id`.
    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut TaskState> {
        self.tasks.get_mut(task_id)
    }

    /// Insert or replace the record keyed by its task id.
    pub fn insert(&mut self, state: TaskState) {
        self.tasks.insert(state.task_id.clone(), state);
    }

    /// Status as seen by read-only views: a subtask without a record is pending.
    pub fn status_of(&self, task_id: &str) -> TaskStatus {
        self.tasks
            .get(task_id)
            .map(|t| t.status)
            .unwrap_or(TaskStatus::Pending)
    }

    /// Whether `task_id` is complete.
    pub fn is_complete(&self, task_id: &str) -> bool {
        self.status_of(task_id) == TaskStatus::Complete
    }

    /// Tasks currently running or under review.
    pub fn running_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status.is_active()).count()
    }

    /// True once any task has left `pending`.
    pub fn has_started(&self) -> bool {
        self.tasks
            .values()
            .any(|t| t.status != TaskStatus::Pending)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use TaskStatus::*;
        let legal = [
            (Pending, Running),
            (Running, Reviewing),
            (Running, Complete),
            (Reviewing, Running),
            (Reviewing, Complete),
            (Reviewing, Failed),
            (Pending, Cancelled),
            (Running, Cancelled),
            (Reviewing, Cancelled),
        ];
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_no_state_skipping() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Complete));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Reviewing));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Complete.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn test_transition_stamps_times() {
        let mut state = TaskState::pending("task-1", PathBuf::from("/wt/app-task-1"));
        let t0 = Utc::now();
        state.transition(TaskStatus::Running, t0).unwrap();
        assert_eq!(state.started_at, Some(t0));
        assert!(state.completed_at.is_none());

        state.transition(TaskStatus::Reviewing, t0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(30);
        state.transition(TaskStatus::Running, t1).unwrap();
        assert_eq!(state.started_at, Some(t0), "start time is kept on re-entry");

        state.transition(TaskStatus::Complete, t1).unwrap();
        assert_eq!(state.completed_at, Some(t1));
    }

    #[test]
    fn test_illegal_transition_leaves_record_untouched() {
        let mut state = TaskState::pending("task-1", PathBuf::from("/wt"));
        let before = state.clone();
        let err = state.transition(TaskStatus::Complete, Utc::now()).unwrap_err();
        assert!(matches!(err, SwarmError::StateConflict(_)));
        assert_eq!(state, before);
    }

    #[test]
    fn test_board_defaults_absent_to_pending() {
        let mut board = TaskBoard::default();
        assert_eq!(board.status_of("nope"), TaskStatus::Pending);
        assert!(!board.has_started());

        let mut running = TaskState::pending("a", PathBuf::from("/wt/a"));
        running.transition(TaskStatus::Running, Utc::now()).unwrap();
        board.insert(running);
        board.insert(TaskState::pending("b", PathBuf::from("/wt/b")));

        assert_eq!(board.running_count(), 1);
        assert!(board.has_started());
        assert!(!board.is_complete("a"));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&TaskStatus::Reviewing).unwrap();
        assert_eq!(json, "\"reviewing\"");
        let board: TaskBoard =
            serde_json::from_str(r#"{"revision":4,"tasks":{"a":{"task_id":"a","status":"complete"}}}"#)
                .unwrap();
        assert_eq!(board.revision, 4);
        assert_eq!(board.get("a").unwrap().review_attempts, 0);
    }
}
