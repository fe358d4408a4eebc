use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use swarm_core::{Plan, TaskBoard, TaskStatus};

/// A task whose commit was cherry-picked into the main line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedTask {
    /// Merged task.
    pub task_id: String,
    /// Commit that was picked.
    pub commit: String,
}

/// A task whose cherry-pick failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFailure {
    /// Task that failed to merge.
    pub task_id: String,
    /// Why the pick failed.
    pub error: String,
}

/// A task that was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTask {
    /// Task left out.
    pub task_id: String,
    /// Why it was left out.
    pub reason: String,
}

/// Outcome of a serialized bulk merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Tasks merged, in merge order.
    pub merged: Vec<MergedTask>,
    /// Tasks whose pick failed.
    pub failed: Vec<MergeFailure>,
    /// Tasks not attempted.
    pub skipped: Vec<SkippedTask>,
}

/// Subtask ids in dependency order: every task after all of its
/// dependencies, ties broken by plan order.
pub fn merge_order(plan: &Plan) -> Vec<String> {
    let mut indegree: HashMap<&str, usize> = plan
        .subtasks
        .iter()
        .map(|s| {
            let unique: HashSet<&str> = s.dependencies.iter().map(String::as_str).collect();
            (s.id.as_str(), unique.len())
        })
        .collect();
    let mut queue: VecDeque<&str> = plan
        .subtasks
        .iter()
        .filter(|s| s.dependencies.is_empty())
        .map(|s| s.id.as_str())
        .collect();
    let mut order = Vec::with_capacity(plan.subtasks.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for dependent in plan.dependents_of(id) {
            if let Some(n) = indegree.get_mut(dependent.id.as_str()) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    queue.push_back(dependent.id.as_str());
                }
            }
        }
    }
    order
}

/// Whether a task's work is already part of the main line, or it never
/// produced a commit, so dependents may be merged on top of it.
pub fn is_settled(board: &TaskBoard, task_id: &str) -> bool {
    board.get(task_id).is_some_and(|s| {
        s.status == TaskStatus::Complete && (s.merged || s.commit.is_none())
    })
}

/// First dependency of `task_id` that is not settled.
pub fn unsettled_dependency<'a>(
    plan: &'a Plan,
    board: &TaskBoard,
    task_id: &str,
) -> Option<&'a str> {
    plan.subtask(task_id)?
        .dependencies
        .iter()
        .find(|d| !is_settled(board, d))
        .map(String::as_str)
}
