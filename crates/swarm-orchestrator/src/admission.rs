use serde::{Deserialize, Serialize};
use swarm_core::{Plan, Subtask, SwarmError, SwarmResult, TaskBoard, TaskStatus};

/// A subtask that may be spawned now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyTask {
    /// Subtask id.
    pub id: String,
    /// Subtask title.
    pub title: String,
    /// Owned files.
    pub files: Vec<String>,
}

/// Snapshot of what the admission controller would allow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionReport {
    /// Tasks that could be spawned now, in plan order.
    pub ready: Vec<ReadyTask>,
    /// Length of `ready`.
    pub ready_count: usize,
    /// Tasks running or under review.
    pub running_count: usize,
    /// Free worker slots.
    pub available_slots: usize,
    /// `min(ready_count, available_slots)`.
    pub can_spawn: usize,
    /// Configured worker cap.
    pub max_parallel: usize,
}

/// Stateless gate deciding which subtasks may start.
///
/// A subtask is ready when it has a pending TaskState (which implies a bound
/// worktree) and all of its dependencies are complete.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionController {
    max_parallel: usize,
}

impl AdmissionController {
    /// Controller admitting at most `max_parallel` active tasks.
    pub fn new(max_parallel: usize) -> Self {
        Self { max_parallel }
    }

    /// Configured worker cap.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Pending, bound to a worktree and with every dependency complete.
    pub fn is_ready(subtask: &Subtask, board: &TaskBoard) -> bool {
        let bound_and_pending = board
            .get(&subtask.id)
            .is_some_and(|s| s.status == TaskStatus::Pending && s.worktree.is_some());
        bound_and_pending && subtask.dependencies.iter().all(|d| board.is_complete(d))
    }

    /// Ready tasks and free slots for `plan`.
    pub fn report(&self, plan: &Plan, board: &TaskBoard) -> AdmissionReport {
        let ready: Vec<ReadyTask> = plan
            .subtasks
            .iter()
            .filter(|s| Self::is_ready(s, board))
            .map(|s| ReadyTask {
                id: s.id.clone(),
                title: s.title.clone(),
                files: s.files.clone(),
            })
            .collect();
        let running_count = board.running_count();
        let available_slots = self.max_parallel.saturating_sub(running_count);
        AdmissionReport {
            ready_count: ready.len(),
            can_spawn: ready.len().min(available_slots),
            ready,
            running_count,
            available_slots,
            max_parallel: self.max_parallel,
        }
    }

    /// Explain why `task_id` cannot be spawned, or succeed if it can.
    pub fn check_spawn(&self, plan: &Plan, board: &TaskBoard, task_id: &str) -> SwarmResult<()> {
        let subtask = plan
            .subtask(task_id)
            .ok_or_else(|| SwarmError::task_not_found(task_id))?;

        let Some(state) = board.get(task_id) else {
            return Err(SwarmError::Precondition(format!(
                "no worktree found for task {task_id}. create worktree first"
            )));
        };
        match state.status {
            TaskStatus::Pending => {}
            TaskStatus::Running | TaskStatus::Reviewing => {
                return Err(SwarmError::StateConflict(format!(
                    "task {task_id} is already running"
                )))
            }
            other => {
                return Err(SwarmError::StateConflict(format!(
                    "task {task_id} is already {other}"
                )))
            }
        }
        if state.worktree.is_none() {
            return Err(SwarmError::Precondition(format!(
                "no worktree found for task {task_id}. create worktree first"
            )));
        }

        if let Some(dep) = subtask.dependencies.iter().find(|d| !board.is_complete(d)) {
            return Err(SwarmError::Precondition(format!(
                "cannot spawn {task_id}: dependency {dep} not complete"
            )));
        }

        if board.running_count() >= self.max_parallel {
            return Err(SwarmError::Precondition(format!(
                "cannot spawn {task_id}: max parallel workers ({}) reached",
                self.max_parallel
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use swarm_core::TaskState;
    use uuid::Uuid;

    fn plan(subtasks: &[(&str, &[&str])]) -> Plan {
        let mut plan = Plan::new(Uuid::new_v4(), "/repos/app", "main", "abc", "t");
        plan.subtasks = subtasks
            .iter()
            .map(|(id, deps)| Subtask {
                id: id.to_string(),
                title: format!("do {id}"),
                description: String::new(),
                files: vec![format!("{id}.rs")],
                dependencies: deps.iter().map(|d| d.to_string()).collect(),
                complexity: 1,
            })
            .collect();
        plan
    }

    fn bound(board: &mut TaskBoard, id: &str, status: TaskStatus) {
        let mut state = TaskState::pending(id, PathBuf::from(format!("/wt/app-{id}")));
        state.status = status;
        board.insert(state);
    }

    #[test]
    fn test_four_ready_three_slots() {
        let plan = plan(&[("a", &[]), ("b", &[]), ("c", &[]), ("d", &[])]);
        let mut board = TaskBoard::default();
        for id in ["a", "b", "c", "d"] {
            bound(&mut board, id, TaskStatus::Pending);
        }
        let report = AdmissionController::new(3).report(&plan, &board);
        assert_eq!(report.ready_count, 4);
        assert_eq!(report.running_count, 0);
        assert_eq!(report.can_spawn, 3);
        assert_eq!(report.max_parallel, 3);
    }

    #[test]
    fn test_unbound_and_blocked_tasks_are_not_ready() {
        let plan = plan(&[("a", &[]), ("b", &["a"]), ("c", &[])]);
        let mut board = TaskBoard::default();
        bound(&mut board, "b", TaskStatus::Pending);
        let report = AdmissionController::new(3).report(&plan, &board);
        assert!(report.ready.is_empty(), "c has no worktree, b waits on a");

        bound(&mut board, "a", TaskStatus::Complete);
        let report = AdmissionController::new(3).report(&plan, &board);
        let ids: Vec<&str> = report.ready.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn test_reviewing_counts_against_bound() {
        let plan = plan(&[("a", &[]), ("b", &[]), ("c", &[])]);
        let mut board = TaskBoard::default();
        bound(&mut board, "a", TaskStatus::Running);
        bound(&mut board, "b", TaskStatus::Reviewing);
        bound(&mut board, "c", TaskStatus::Pending);
        let controller = AdmissionController::new(2);
        let report = controller.report(&plan, &board);
        assert_eq!(report.available_slots, 0);
        assert_eq!(report.can_spawn, 0);

        let err = controller.check_spawn(&plan, &board, "c").unwrap_err();
        assert!(matches!(err, SwarmError::Precondition(ref m) if m.contains("max parallel")));
    }

    #[test]
    fn test_check_spawn_errors() {
        let plan = plan(&[("a", &[]), ("b", &["a"]), ("c", &[])]);
        let mut board = TaskBoard::default();
        bound(&mut board, "a", TaskStatus::Running);
        bound(&mut board, "b", TaskStatus::Pending);
        let controller = AdmissionController::new(3);

        assert!(matches!(
            controller.check_spawn(&plan, &board, "zzz"),
            Err(SwarmError::NotFound(_))
        ));
        assert!(matches!(
            controller.check_spawn(&plan, &board, "c"),
            Err(SwarmError::Precondition(ref m)) if m.contains("create worktree first")
        ));
        assert!(matches!(
            controller.check_spawn(&plan, &board, "a"),
            Err(SwarmError::StateConflict(_))
        ));
        assert!(matches!(
            controller.check_spawn(&plan, &board, "b"),
            Err(SwarmError::Precondition(ref m)) if m.contains("dependency a not complete")
        ));

        board.get_mut("a").unwrap().transition(TaskStatus::Complete, Utc::now()).unwrap();
        controller.check_spawn(&plan, &board, "b").unwrap();
    }
}
