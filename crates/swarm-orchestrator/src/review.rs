use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarm_core::{ReviewVerdict, SwarmError, SwarmResult, TaskState, TaskStatus};

/// What a verdict did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReviewOutcome {
    /// Task stays in review, awaiting completion.
    Approved {
        /// Rejected reviews before the approval.
        attempts: u32,
    },
    /// Task went back to running for another round.
    ChangesRequested {
        /// Rejections so far, including this one.
        attempt: u32,
        /// Rejections left before the task fails.
        remaining: u32,
    },
    /// Attempts exhausted; the task is failed.
    Failed {
        /// Rejections recorded.
        attempts: u32,
    },
}

impl ReviewOutcome {
    /// Whether the task ran out of attempts.
    pub fn is_failed(&self) -> bool {
        matches!(self, ReviewOutcome::Failed { .. })
    }
}

/// Apply `verdict` to `state`.
///
/// A running task is moved into review first. Only needs-changes verdicts
/// consume attempts; the verdict that reaches `max_attempts` fails the task.
pub fn apply_verdict(
    state: &mut TaskState,
    verdict: &ReviewVerdict,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> SwarmResult<ReviewOutcome> {
    match state.status {
        TaskStatus::Running | TaskStatus::Reviewing => {}
        TaskStatus::Failed => {
            return Err(SwarmError::Precondition(format!(
                "task {} failed after {} review attempts",
                state.task_id, state.review_attempts
            )))
        }
        other => {
            return Err(SwarmError::StateConflict(format!(
                "task {} is {other}, not under review",
                state.task_id
            )))
        }
    }

    let mut next = state.clone();
    if next.status == TaskStatus::Running {
        next.transition(TaskStatus::Reviewing, now)?;
    }

    let outcome = match verdict {
        ReviewVerdict::Approved { .. } => ReviewOutcome::Approved {
            attempts: next.review_attempts,
        },
        ReviewVerdict::NeedsChanges { .. } => {
            next.review_attempts += 1;
            if next.review_attempts >= max_attempts {
                next.transition(TaskStatus::Failed, now)?;
                next.error = Some(format!(
                    "review failed after {} attempts",
                    next.review_attempts
                ));
                ReviewOutcome::Failed {
                    attempts: next.review_attempts,
                }
            } else {
                next.transition(TaskStatus::Running, now)?;
                ReviewOutcome::ChangesRequested {
                    attempt: next.review_attempts,
                    remaining: max_attempts - next.review_attempts,
                }
            }
        }
    };
    *state = next;
    Ok(outcome)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use swarm_core::ReviewIssue;

    fn running() -> TaskState {
        let mut state = TaskState::pending("task-1", PathBuf::from("/wt/app-task-1"));
        state.transition(TaskStatus::Running, Utc::now()).unwrap();
        state
    }

    fn needs_changes() -> ReviewVerdict {
        ReviewVerdict::needs_changes(vec![ReviewIssue {
            file: "src/a.rs".into(),
            line: None,
            issue: "wrong".into(),
            suggestion: None,
        }])
    }

    #[test]
    fn test_third_rejection_fails_permanently() {
        let mut state = running();
        let now = Utc::now();

        let first = apply_verdict(&mut state, &needs_changes(), 3, now).unwrap();
        assert_eq!(first, ReviewOutcome::ChangesRequested { attempt: 1, remaining: 2 });
        assert_eq!(state.status, TaskStatus::Running);

        let second = apply_verdict(&mut state, &needs_changes(), 3, now).unwrap();
        assert_eq!(second, ReviewOutcome::ChangesRequested { attempt: 2, remaining: 1 });

        let third = apply_verdict(&mut state, &needs_changes(), 3, now).unwrap();
        assert_eq!(third, ReviewOutcome::Failed { attempts: 3 });
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.review_attempts, 3);
        assert!(state.completed_at.is_some());
        assert!(state.error.is_some());

        let err = apply_verdict(&mut state, &needs_changes(), 3, now).unwrap_err();
        assert!(matches!(err, SwarmError::Precondition(_)));
        assert_eq!(state.review_attempts, 3, "counter never exceeds the maximum");
    }

    #[test]
    fn test_approval_does_not_consume_attempts() {
        let mut state = running();
        let outcome =
            apply_verdict(&mut state, &ReviewVerdict::approved("ok"), 3, Utc::now()).unwrap();
        assert_eq!(outcome, ReviewOutcome::Approved { attempts: 0 });
        assert_eq!(state.status, TaskStatus::Reviewing);
        assert_eq!(state.review_attempts, 0);
    }

    #[test]
    fn test_pending_and_complete_tasks_reject_verdicts() {
        let mut pending = TaskState::pending("t", PathBuf::from("/wt"));
        assert!(matches!(
            apply_verdict(&mut pending, &needs_changes(), 3, Utc::now()),
            Err(SwarmError::StateConflict(_))
        ));
        assert_eq!(pending.status, TaskStatus::Pending);

        let mut done = running();
        done.transition(TaskStatus::Complete, Utc::now()).unwrap();
        assert!(apply_verdict(&mut done, &ReviewVerdict::approved("x"), 3, Utc::now()).is_err());
    }

    #[test]
    fn test_single_attempt_limit() {
        let mut state = running();
        let outcome = apply_verdict(&mut state, &needs_changes(), 1, Utc::now()).unwrap();
        assert!(outcome.is_failed());
    }
}
