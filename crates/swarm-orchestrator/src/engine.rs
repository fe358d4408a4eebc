use crate::admission::{AdmissionController, AdmissionReport};
use crate::janitor::Janitor;
use crate::merge::{merge_order, unsettled_dependency, MergeFailure, MergeReport, MergedTask, SkippedTask};
use crate::planner::{Decomposition, PlanValidator};
use crate::report::{
    AbortReport, CancelReport, CompleteReport, ContextReport, EpicContext, FinalizeReport,
    InitReport, PlanReport, Progress, ReviewContext, ReviewReport, ReviewTarget, StatusCounts,
    StatusReport, SubtaskContext, SubtaskSummary, SyncReport, TaskBrief, TaskRow, WorkerBrief,
    WorktreeReport,
};
use crate::review::{apply_verdict, ReviewOutcome};
use crate::worktree::{CleanupReport, WorktreeManager};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use swarm_core::message::{validate_agent_id, worker_id, ORCHESTRATOR, REVIEWER};
use swarm_core::{
    Failure, Message, MessageType, Plan, ReviewVerdict, Subtask, SwarmConfig, SwarmError,
    SwarmResult, TaskBoard, TaskState, TaskStatus,
};
use swarm_session::{
    FileMailbox, FileSessionStore, Mailbox, MessageFilter, PollResult, SessionStore, Teardown,
    DEFAULT_READ_LIMIT,
};
use swarm_vcs::{GitCli, ResetMode, VcsBackend};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Optional details recorded when a session is aborted.
#[derive(Debug, Clone, Default)]
pub struct AbortRequest {
    /// Why the session was aborted.
    pub reason: Option<String>,
    /// Task to blame, if one failed.
    pub failed_task: Option<String>,
    /// Error text; takes precedence over `reason`.
    pub error: Option<String>,
}

/// The swarm engine: every command of the orchestration surface, backed by a
/// session store, a mailbox and a version-control backend.
///
/// Each mutating operation holds the per-session lock for its whole
/// read-modify-write cycle and persists the task board with a revision check.
pub struct Swarm {
    config: SwarmConfig,
    store: Arc<dyn SessionStore>,
    mailbox: Arc<dyn Mailbox>,
    vcs: Arc<dyn VcsBackend>,
    worktrees: WorktreeManager,
    validator: PlanValidator,
    admission: AdmissionController,
}

impl Swarm {
    /// Engine over the given backends.
    pub fn new(
        config: SwarmConfig,
        store: Arc<dyn SessionStore>,
        mailbox: Arc<dyn Mailbox>,
        vcs: Arc<dyn VcsBackend>,
    ) -> Self {
        Self {
            worktrees: WorktreeManager::new(&config, vcs.clone()),
            validator: PlanValidator::new(config.max_parallel_workers),
            admission: AdmissionController::new(config.max_parallel_workers),
            config,
            store,
            mailbox,
            vcs,
        }
    }

    /// Engine over the file-backed store and mailbox and the `git` backend.
    pub async fn open(config: SwarmConfig) -> SwarmResult<Self> {
        config.validate()?;
        let store = Arc::new(FileSessionStore::new(&config).await?);
        let mailbox = Arc::new(FileMailbox::new(&config));
        Ok(Self::new(config, store, mailbox, Arc::new(GitCli::new())))
    }

    /// Settings the engine was built with.
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Underlying session store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Worktree manager.
    pub fn worktrees(&self) -> &WorktreeManager {
        &self.worktrees
    }

    /// A janitor sharing this engine's store and worktrees directory.
    pub fn janitor(&self) -> Janitor {
        Janitor::new(self.config.clone(), self.store.clone(), self.worktrees.clone())
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Start a session for `task` in the repository at `project_path`.
    ///
    /// The repository must be clean and must not already have an active
    /// session. Stale sessions are collected first.
    pub async fn init_session(&self, task: &str, project_path: &Path) -> SwarmResult<InitReport> {
        if task.trim().is_empty() {
            return Err(SwarmError::Validation("task description is empty".into()));
        }
        let project_path = tokio::fs::canonicalize(project_path).await.map_err(|e| {
            SwarmError::Precondition(format!("cannot resolve {}: {e}", project_path.display()))
        })?;
        if !self.vcs.is_repo(&project_path).await? {
            return Err(SwarmError::Precondition(format!(
                "{} is not a git repository",
                project_path.display()
            )));
        }
        if self.vcs.has_uncommitted_changes(&project_path).await? {
            return Err(SwarmError::Precondition(format!(
                "uncommitted changes in {}. commit or stash them before starting a swarm",
                project_path.display()
            )));
        }

        let collected_sessions = match self.collect_garbage(Utc::now()).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Session garbage collection failed");
                Vec::new()
            }
        };

        if let Some(active) = self.store.find_active(&project_path).await? {
            return Err(SwarmError::Precondition(format!(
                "session {active} is already active for {}. finalize or abort it first",
                project_path.display()
            )));
        }

        let branch = self.vcs.current_branch(&project_path).await?;
        let start_commit = self.vcs.head_commit(&project_path).await?;
        let plan = Plan::new(
            Uuid::new_v4(),
            project_path.clone(),
            branch.clone(),
            start_commit.clone(),
            task,
        );
        self.store.create(&plan).await?;
        info!(
            session_id = %plan.session_id,
            project = %plan.project_name(),
            branch = %branch,
            start_commit = %plan.short_commit(),
            "Swarm session initialized"
        );

        Ok(InitReport {
            session_id: plan.session_id,
            project: plan.project_name(),
            project_path,
            branch,
            start_commit,
            collected_sessions,
        })
    }

    /// Merge the worktrees away, squash the session's commits into uncommitted
    /// changes on top of the start commit, and delete the session.
    pub async fn finalize(&self, session_id: Uuid) -> SwarmResult<FinalizeReport> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        let board = self.store.read_tasks(session_id).await?;

        let incomplete: Vec<String> = plan
            .subtasks
            .iter()
            .filter(|s| !board.is_complete(&s.id))
            .map(|s| format!("{} ({})", s.id, board.status_of(&s.id)))
            .collect();
        if !incomplete.is_empty() {
            return Err(SwarmError::Precondition(format!(
                "cannot finalize session {session_id}: incomplete tasks: {}",
                incomplete.join(", ")
            )));
        }

        let repo = &plan.project_path;
        let cleanup = self.worktrees.cleanup_all(repo, &plan.project_name()).await?;
        self.vcs.reset(repo, &plan.start_commit, ResetMode::Soft).await?;
        let diff_summary = self.vcs.diff_stat(repo, &plan.start_commit).await?;

        let unmerged_tasks: Vec<String> = board
            .tasks
            .values()
            .filter(|s| s.status == TaskStatus::Complete && s.commit.is_some() && !s.merged)
            .map(|s| s.task_id.clone())
            .collect();
        if !unmerged_tasks.is_empty() {
            warn!(
                session_id = %session_id,
                tasks = ?unmerged_tasks,
                "Finalizing with task commits that were never merged"
            );
        }

        self.store.delete(session_id, Teardown::All).await?;
        info!(
            session_id = %session_id,
            completed = plan.subtasks.len(),
            removed_worktrees = cleanup.removed.len(),
            "Swarm session finalized"
        );

        Ok(FinalizeReport {
            session_id,
            branch: plan.branch.clone(),
            start_commit: plan.start_commit.clone(),
            completed_tasks: plan.subtasks.iter().map(|s| s.id.clone()).collect(),
            removed_worktrees: cleanup.removed,
            cleanup_failures: cleanup.failed,
            diff_summary,
            unmerged_tasks,
        })
    }

    /// Tear the session down, reset the repository to its start commit and
    /// keep a failure record for post-mortem.
    pub async fn abort(&self, session_id: Uuid, request: AbortRequest) -> SwarmResult<AbortReport> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_plan(session_id).await?;
        if self.store.read_failure(session_id).await?.is_some() {
            return Err(SwarmError::StateConflict(format!(
                "session {session_id} is already aborted"
            )));
        }
        let board = self.store.read_tasks(session_id).await?;

        let repo = &plan.project_path;
        let cleanup = match self.worktrees.cleanup_all(repo, &plan.project_name()).await {
            Ok(report) => report,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Worktree cleanup failed during abort");
                CleanupReport::default()
            }
        };
        self.vcs.reset(repo, &plan.start_commit, ResetMode::Hard).await?;

        let failed_task = request.failed_task.unwrap_or_else(|| "unknown".to_string());
        let attempt = board
            .get(&failed_task)
            .map_or(0, |s| s.review_attempts)
            .max(1);
        let error = request
            .error
            .or(request.reason)
            .unwrap_or_else(|| "aborted by user".to_string());
        let failure = Failure {
            failed_task,
            error,
            attempt,
            completed_tasks: plan
                .subtasks
                .iter()
                .filter(|s| board.is_complete(&s.id))
                .map(|s| s.id.clone())
                .collect(),
            pending_tasks: plan
                .subtasks
                .iter()
                .filter(|s| !board.status_of(&s.id).is_terminal())
                .map(|s| s.id.clone())
                .collect(),
            timestamp: Utc::now(),
        };
        self.store.write_failure(session_id, &failure).await?;
        self.store.delete(session_id, Teardown::KeepPostMortem).await?;
        warn!(
            session_id = %session_id,
            failed_task = %failure.failed_task,
            error = %failure.error,
            "Swarm session aborted"
        );

        Ok(AbortReport {
            session_id,
            reset_to: plan.start_commit.clone(),
            failure,
            removed_worktrees: cleanup.removed,
            cleanup_failures: cleanup.failed,
        })
    }

    /// Delete sessions untouched for longer than the configured TTL.
    pub async fn collect_garbage(&self, now: DateTime<Utc>) -> SwarmResult<Vec<Uuid>> {
        self.store
            .collect_garbage(now, self.config.session_ttl())
            .await
    }

    // ------------------------------------------------------------------
    // Planning and admission
    // ------------------------------------------------------------------

    /// Validate a decomposition and store it as the session plan.
    pub async fn validate_plan(
        &self,
        session_id: Uuid,
        decomposition: Decomposition,
    ) -> SwarmResult<PlanReport> {
        let _lock = self.store.lock(session_id).await?;
        let mut plan = self.load_live_plan(session_id).await?;
        let mut board = self.store.read_tasks(session_id).await?;
        if board.has_started() {
            return Err(SwarmError::StateConflict(format!(
                "cannot re-plan session {session_id}: tasks have already started"
            )));
        }

        let (epic, subtasks, validation) = self.validator.validate(decomposition)?;
        plan.epic = epic;
        plan.subtasks = subtasks;
        self.store.write_plan(&plan).await?;

        // Bindings of subtasks that no longer exist.
        let stale: Vec<String> = board
            .tasks
            .keys()
            .filter(|id| plan.subtask(id).is_none())
            .cloned()
            .collect();
        if !stale.is_empty() {
            for id in &stale {
                if let Some(path) = board.tasks.remove(id).and_then(|s| s.worktree) {
                    self.release_worktree(&plan, &path).await;
                }
            }
            self.save(session_id, &mut board).await?;
        }

        info!(
            session_id = %session_id,
            epic = %plan.epic.title,
            subtasks = validation.subtask_count,
            independent = validation.independent_tasks,
            "Plan validated"
        );
        Ok(PlanReport {
            session_id,
            epic: plan.epic.clone(),
            validation,
            subtasks: plan.subtasks,
        })
    }

    /// Subtasks that may be spawned now.
    pub async fn ready_tasks(&self, session_id: Uuid) -> SwarmResult<AdmissionReport> {
        let plan = self.load_plan(session_id).await?;
        let board = self.store.read_tasks(session_id).await?;
        Ok(self.admission.report(&plan, &board))
    }

    // ------------------------------------------------------------------
    // Worktrees
    // ------------------------------------------------------------------

    /// Bind `task_id` to a fresh worktree at the session's start commit.
    /// Reuses the existing one when the task is already bound to a live
    /// worktree.
    pub async fn create_worktree(
        &self,
        session_id: Uuid,
        task_id: &str,
    ) -> SwarmResult<WorktreeReport> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        require_subtask(&plan, task_id)?;
        let mut board = self.store.read_tasks(session_id).await?;

        if let Some(state) = board.get(task_id) {
            if state.status != TaskStatus::Pending {
                return Err(SwarmError::StateConflict(format!(
                    "task {task_id} is {}; its worktree cannot be recreated",
                    state.status
                )));
            }
            if let Some(path) = &state.worktree {
                if self.worktrees.is_live(&plan.project_path, path).await? {
                    return Ok(WorktreeReport {
                        task_id: task_id.to_string(),
                        path: path.clone(),
                        created: false,
                    });
                }
            }
        }

        let project = plan.project_name();
        let stale = self.worktrees.path_for(&project, task_id)?;
        if tokio::fs::try_exists(&stale).await? {
            self.worktrees.remove(&plan.project_path, &stale).await?;
        }
        let path = self
            .worktrees
            .create(&plan.project_path, &project, task_id, &plan.start_commit)
            .await?;
        board.insert(TaskState::pending(task_id, path.clone()).based_on(&plan.start_commit));
        self.save(session_id, &mut board).await?;

        Ok(WorktreeReport {
            task_id: task_id.to_string(),
            path,
            created: true,
        })
    }

    /// Remove the worktree of `task_id` and clear its binding.
    pub async fn remove_worktree(&self, session_id: Uuid, task_id: &str) -> SwarmResult<PathBuf> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        require_subtask(&plan, task_id)?;
        let mut board = self.store.read_tasks(session_id).await?;

        let bound = match board.get(task_id) {
            Some(state) if state.status.is_active() => {
                return Err(SwarmError::StateConflict(format!(
                    "task {task_id} is {}; cancel it before removing its worktree",
                    state.status
                )))
            }
            Some(state) => state.worktree.clone(),
            None => None,
        };
        let path = match &bound {
            Some(path) => path.clone(),
            None => self.worktrees.path_for(&plan.project_name(), task_id)?,
        };
        self.worktrees.remove(&plan.project_path, &path).await?;

        if bound.is_some() {
            if let Some(state) = board.get_mut(task_id) {
                state.worktree = None;
            }
            self.save(session_id, &mut board).await?;
        }
        Ok(path)
    }

    /// Worktrees currently registered for the session's project.
    pub async fn list_worktrees(&self, session_id: Uuid) -> SwarmResult<Vec<PathBuf>> {
        let plan = self.load_plan(session_id).await?;
        self.worktrees
            .list_active(&plan.project_path, &plan.project_name())
            .await
    }

    /// Remove every worktree of the session's project, including strays.
    pub async fn cleanup_worktrees(&self, session_id: Uuid) -> SwarmResult<CleanupReport> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_plan(session_id).await?;
        let mut board = self.store.read_tasks(session_id).await?;
        let report = self
            .worktrees
            .cleanup_all(&plan.project_path, &plan.project_name())
            .await?;

        let mut unbound = false;
        for state in board.tasks.values_mut() {
            let removed = state
                .worktree
                .as_deref()
                .is_some_and(|p| report.removed.iter().any(|r| same_dir(r, p)));
            if removed {
                state.worktree = None;
                unbound = true;
            }
        }
        if unbound {
            self.save(session_id, &mut board).await?;
        }
        Ok(report)
    }

    /// Bring a pending task's worktree up to the repository's current HEAD so
    /// it sees dependency work merged since it was created.
    pub async fn sync_worktree(&self, session_id: Uuid, task_id: &str) -> SwarmResult<SyncReport> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        require_subtask(&plan, task_id)?;
        let mut board = self.store.read_tasks(session_id).await?;

        let state = board.get_mut(task_id).ok_or_else(|| no_worktree(task_id))?;
        if state.status != TaskStatus::Pending {
            return Err(SwarmError::StateConflict(format!(
                "task {task_id} is {}; only pending worktrees can be synced",
                state.status
            )));
        }
        let path = state.worktree.clone().ok_or_else(|| no_worktree(task_id))?;
        let commit = self.worktrees.sync(&plan.project_path, &path).await?;
        state.base_commit = Some(commit.clone());
        self.save(session_id, &mut board).await?;
        Ok(SyncReport {
            task_id: task_id.to_string(),
            path,
            commit,
        })
    }

    // ------------------------------------------------------------------
    // Task lifecycle
    // ------------------------------------------------------------------

    /// Admit `task_id`, mark it running and hand the worker its brief.
    pub async fn spawn_worker(&self, session_id: Uuid, task_id: &str) -> SwarmResult<WorkerBrief> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        let mut board = self.store.read_tasks(session_id).await?;
        self.admission.check_spawn(&plan, &board, task_id)?;
        let subtask = require_subtask(&plan, task_id)?;

        let worker = worker_id(task_id);
        validate_agent_id(&worker)?;
        let state = board
            .get_mut(task_id)
            .ok_or_else(|| no_worktree(task_id))?;
        let worktree_path = state.worktree.clone().ok_or_else(|| no_worktree(task_id))?;
        state.transition(TaskStatus::Running, Utc::now())?;
        state.worker_id = Some(worker.clone());
        self.save(session_id, &mut board).await?;

        let brief = WorkerBrief {
            session_id,
            epic: EpicContext::of(&plan),
            all_subtasks: plan
                .subtasks
                .iter()
                .map(|s| SubtaskSummary {
                    id: s.id.clone(),
                    title: s.title.clone(),
                    is_current: s.id == task_id,
                })
                .collect(),
            task_id: task_id.to_string(),
            task_title: subtask.title.clone(),
            task_description: subtask.description.clone(),
            files: subtask.files.clone(),
            dependencies: subtask.dependencies.clone(),
            worktree_path,
            worker_id: worker.clone(),
        };
        let msg = Message::new(
            ORCHESTRATOR,
            worker.as_str(),
            MessageType::Spawn,
            format!("work on {task_id}: {}", subtask.title),
        )
        .with_data(serde_json::to_value(&brief)?);
        self.mailbox.send(session_id, &msg).await?;

        info!(session_id = %session_id, task_id, worker = %worker, "Worker spawned");
        Ok(brief)
    }

    /// Move a running task into review and notify the reviewer.
    pub async fn request_review(&self, session_id: Uuid, task_id: &str) -> SwarmResult<Message> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        let subtask = require_subtask(&plan, task_id)?;
        let mut board = self.store.read_tasks(session_id).await?;

        let state = board
            .get_mut(task_id)
            .ok_or_else(|| not_started(task_id))?;
        state.transition(TaskStatus::Reviewing, Utc::now())?;
        let worker = state.worker_id.clone().unwrap_or_else(|| worker_id(task_id));
        validate_agent_id(&worker)?;
        let data = json!({
            "task_id": task_id,
            "title": subtask.title,
            "files": subtask.files,
            "worktree": state.worktree,
            "attempt": state.review_attempts + 1,
            "max_attempts": self.config.max_review_attempts,
        });
        self.save(session_id, &mut board).await?;

        let msg = Message::new(
            worker,
            REVIEWER,
            MessageType::Spawn,
            format!("review requested for {task_id}: {}", subtask.title),
        )
        .with_data(data);
        self.mailbox.send(session_id, &msg).await?;
        info!(session_id = %session_id, task_id, "Review requested");
        Ok(msg)
    }

    /// Record a reviewer verdict and tell the worker about it.
    pub async fn submit_review(
        &self,
        session_id: Uuid,
        task_id: &str,
        worker: Option<&str>,
        verdict: ReviewVerdict,
    ) -> SwarmResult<ReviewReport> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        require_subtask(&plan, task_id)?;
        let mut board = self.store.read_tasks(session_id).await?;
        let max_attempts = self.config.max_review_attempts;

        let state = board
            .get_mut(task_id)
            .ok_or_else(|| not_started(task_id))?;
        let outcome = apply_verdict(state, &verdict, max_attempts, Utc::now())?;
        let status = state.status;
        let recipient = worker
            .map(str::to_string)
            .or_else(|| state.worker_id.clone())
            .unwrap_or_else(|| worker_id(task_id));
        validate_agent_id(&recipient)?;
        self.save(session_id, &mut board).await?;

        let (kind, body) = match outcome {
            ReviewOutcome::Approved { .. } => (
                MessageType::Approved,
                format!(
                    "{task_id} approved: {}",
                    verdict.summary().unwrap_or("looks good")
                ),
            ),
            ReviewOutcome::ChangesRequested { attempt, remaining } => (
                MessageType::Feedback,
                format!(
                    "{task_id} needs changes (attempt {attempt}/{max_attempts}, {remaining} left)\n{}",
                    verdict.render()
                ),
            ),
            ReviewOutcome::Failed { attempts } => (
                MessageType::Feedback,
                format!(
                    "{task_id} failed after {attempts} review attempts\n{}",
                    verdict.render()
                ),
            ),
        };
        let msg = Message::new(REVIEWER, recipient, kind, body).with_data(json!({
            "task_id": task_id,
            "verdict": verdict,
            "outcome": outcome,
        }));
        self.mailbox.send(session_id, &msg).await?;

        if let ReviewOutcome::Failed { attempts } = outcome {
            let blocker = Message::new(
                REVIEWER,
                ORCHESTRATOR,
                MessageType::Blocker,
                format!("task {task_id} failed review after {attempts} attempts"),
            )
            .with_data(json!({ "task_id": task_id, "attempts": attempts }));
            self.mailbox.send(session_id, &blocker).await?;
            warn!(session_id = %session_id, task_id, attempts, "Task failed review");
        } else {
            info!(session_id = %session_id, task_id, outcome = ?outcome, "Review recorded");
        }

        Ok(ReviewReport {
            task_id: task_id.to_string(),
            status,
            outcome,
            max_attempts,
            message_id: msg.id,
        })
    }

    /// Commit the worker's changes and mark the task complete.
    pub async fn complete_task(
        &self,
        session_id: Uuid,
        task_id: &str,
        summary: Option<&str>,
    ) -> SwarmResult<CompleteReport> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        let subtask = require_subtask(&plan, task_id)?;
        let mut board = self.store.read_tasks(session_id).await?;

        let state = board
            .get_mut(task_id)
            .ok_or_else(|| not_started(task_id))?;
        if !state.status.can_transition_to(TaskStatus::Complete) {
            return Err(SwarmError::StateConflict(format!(
                "task {task_id} is {}, cannot complete it",
                state.status
            )));
        }
        let worktree = state.worktree.clone().ok_or_else(|| no_worktree(task_id))?;
        let worker = state.worker_id.clone().unwrap_or_else(|| worker_id(task_id));
        validate_agent_id(&worker)?;

        // Commits the worker made itself are folded into the task commit, so
        // merging one commit carries all of the task's work.
        let base = state
            .base_commit
            .clone()
            .unwrap_or_else(|| plan.start_commit.clone());
        let head = self.vcs.head_commit(&worktree).await?;
        if head != base {
            debug!(session_id = %session_id, task_id, head = %head, base = %base, "Squashing worker commits");
            self.vcs.reset(&worktree, &base, ResetMode::Soft).await?;
        }
        let outcome = self
            .vcs
            .commit_all(&worktree, &format!("swarm: {}", subtask.title))
            .await?;

        state.transition(TaskStatus::Complete, Utc::now())?;
        state.commit = outcome.commit().map(str::to_string);
        let commit = state.commit.clone();
        self.save(session_id, &mut board).await?;

        let empty = commit.is_none();
        if empty {
            warn!(session_id = %session_id, task_id, "Task completed without changes");
        }
        let body = match summary {
            Some(s) => format!("{task_id} complete: {s}"),
            None => format!("{task_id} complete"),
        };
        let msg = Message::new(worker, ORCHESTRATOR, MessageType::Complete, body).with_data(json!({
            "task_id": task_id,
            "commit": commit,
            "empty": empty,
        }));
        self.mailbox.send(session_id, &msg).await?;
        info!(session_id = %session_id, task_id, commit = ?commit, "Task complete");

        Ok(CompleteReport {
            task_id: task_id.to_string(),
            task_title: subtask.title.clone(),
            commit,
            empty,
        })
    }

    /// Cancel a task that has not reached a terminal state.
    pub async fn cancel_task(
        &self,
        session_id: Uuid,
        task_id: &str,
        reason: Option<&str>,
    ) -> SwarmResult<CancelReport> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        require_subtask(&plan, task_id)?;
        let mut board = self.store.read_tasks(session_id).await?;

        let mut state = board
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| TaskState::unbound(task_id));
        let previous = state.status;
        let reason = reason.unwrap_or("cancelled").to_string();
        state.transition(TaskStatus::Cancelled, Utc::now())?;
        state.error = Some(reason.clone());
        let worktree = state.worktree.take();
        let worker = state.worker_id.clone();
        board.insert(state);
        self.save(session_id, &mut board).await?;

        let worktree_released = match &worktree {
            Some(path) => self.release_worktree(&plan, path).await,
            None => false,
        };
        if let Some(worker) = worker {
            let msg = Message::new(
                ORCHESTRATOR,
                worker,
                MessageType::Blocker,
                format!("{task_id} cancelled: {reason}"),
            );
            self.mailbox.send(session_id, &msg).await?;
        }
        info!(session_id = %session_id, task_id, previous = %previous, reason = %reason, "Task cancelled");

        Ok(CancelReport {
            task_id: task_id.to_string(),
            previous,
            worktree_released,
        })
    }

    // ------------------------------------------------------------------
    // Merging
    // ------------------------------------------------------------------

    /// Cherry-pick one complete task's commit into the main repository.
    pub async fn merge_task(&self, session_id: Uuid, task_id: &str) -> SwarmResult<MergedTask> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        require_subtask(&plan, task_id)?;
        let mut board = self.store.read_tasks(session_id).await?;

        let state = board.get(task_id).ok_or_else(|| not_started(task_id))?;
        if state.status != TaskStatus::Complete {
            return Err(SwarmError::Precondition(format!(
                "task {task_id} is {}; only complete tasks can be merged",
                state.status
            )));
        }
        if state.merged {
            return Err(SwarmError::StateConflict(format!(
                "task {task_id} is already merged"
            )));
        }
        let commit = state.commit.clone().ok_or_else(|| {
            SwarmError::Precondition(format!(
                "task {task_id} completed without changes; nothing to merge"
            ))
        })?;
        if let Some(dep) = unsettled_dependency(&plan, &board, task_id) {
            return Err(SwarmError::Precondition(format!(
                "cannot merge {task_id}: dependency {dep} is not merged"
            )));
        }

        self.pick(session_id, &plan, &mut board, task_id, &commit)
            .await?;
        Ok(MergedTask {
            task_id: task_id.to_string(),
            commit,
        })
    }

    /// Merge every complete, unmerged task in dependency order, one at a time.
    pub async fn merge_all(&self, session_id: Uuid) -> SwarmResult<MergeReport> {
        let _lock = self.store.lock(session_id).await?;
        let plan = self.load_live_plan(session_id).await?;
        let mut board = self.store.read_tasks(session_id).await?;
        let mut report = MergeReport::default();

        for task_id in merge_order(&plan) {
            let Some(state) = board.get(&task_id) else {
                continue;
            };
            if state.status != TaskStatus::Complete || state.merged {
                continue;
            }
            let Some(commit) = state.commit.clone() else {
                report.skipped.push(SkippedTask {
                    task_id,
                    reason: "completed without changes; nothing to merge".into(),
                });
                continue;
            };
            if let Some(dep) = unsettled_dependency(&plan, &board, &task_id) {
                report.skipped.push(SkippedTask {
                    reason: format!("dependency {dep} is not merged"),
                    task_id,
                });
                continue;
            }
            match self
                .pick(session_id, &plan, &mut board, &task_id, &commit)
                .await
            {
                Ok(()) => report.merged.push(MergedTask { task_id, commit }),
                Err(e) => report.failed.push(MergeFailure {
                    task_id,
                    error: e.to_string(),
                }),
            }
        }

        info!(
            session_id = %session_id,
            merged = report.merged.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Merge pass finished"
        );
        Ok(report)
    }

    /// Cherry-pick `commit` for `task_id`. A conflicting pick is aborted so the
    /// repository is left clean, and the error is recorded on the task.
    async fn pick(
        &self,
        session_id: Uuid,
        plan: &Plan,
        board: &mut TaskBoard,
        task_id: &str,
        commit: &str,
    ) -> SwarmResult<()> {
        let repo = &plan.project_path;
        if let Err(e) = self.vcs.cherry_pick(repo, commit).await {
            if let Err(abort) = self.vcs.cherry_pick_abort(repo).await {
                warn!(task_id, error = %abort, "Failed to abort cherry-pick");
            }
            warn!(session_id = %session_id, task_id, commit, error = %e, "Merge failed");
            if let Some(state) = board.get_mut(task_id) {
                state.error = Some(format!("merge failed: {e}"));
            }
            self.save(session_id, board).await?;
            return Err(e);
        }

        let worktree = board.get_mut(task_id).and_then(|s| {
            s.merged = true;
            s.error = None;
            s.worktree.take()
        });
        self.save(session_id, board).await?;
        if let Some(path) = worktree {
            self.release_worktree(plan, &path).await;
        }
        info!(session_id = %session_id, task_id, commit, "Task merged");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Append a message from `from` to `to`'s mailbox.
    pub async fn send_message(
        &self,
        session_id: Uuid,
        from: &str,
        to: &str,
        kind: MessageType,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> SwarmResult<Message> {
        self.load_plan(session_id).await?;
        validate_agent_id(from)?;
        let mut msg = Message::new(from, to, kind, body);
        if let Some(data) = data {
            msg = msg.with_data(data);
        }
        self.mailbox.send(session_id, &msg).await?;
        debug!(session_id = %session_id, from, to, kind = %kind, "Message sent");
        Ok(msg)
    }

    /// The latest `limit` messages for `agent` (10 when unspecified), oldest first.
    pub async fn read_inbox(
        &self,
        session_id: Uuid,
        agent: &str,
        limit: Option<usize>,
    ) -> SwarmResult<Vec<Message>> {
        self.load_plan(session_id).await?;
        self.mailbox
            .read(session_id, agent, limit.unwrap_or(DEFAULT_READ_LIMIT))
            .await
    }

    /// Matching messages among the recent ones, without waiting.
    pub async fn poll_messages(
        &self,
        session_id: Uuid,
        agent: &str,
        filter: &MessageFilter,
    ) -> SwarmResult<PollResult> {
        self.load_plan(session_id).await?;
        self.mailbox.poll(session_id, agent, filter).await
    }

    /// Wait up to `timeout` for a matching message.
    pub async fn wait_for_message(
        &self,
        session_id: Uuid,
        agent: &str,
        filter: &MessageFilter,
        timeout: Duration,
    ) -> SwarmResult<PollResult> {
        self.load_plan(session_id).await?;
        self.mailbox.wait(session_id, agent, filter, timeout).await
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Snapshot of every task in the session.
    pub async fn status(&self, session_id: Uuid) -> SwarmResult<StatusReport> {
        let plan = self.load_plan(session_id).await?;
        let board = self.store.read_tasks(session_id).await?;
        let failure = self.store.read_failure(session_id).await?;

        let counts = StatusCounts::tally(&plan, &board);
        let total = plan.subtasks.len();
        let progress_percent = if total == 0 {
            0
        } else {
            u8::try_from((counts.complete * 100 + total / 2) / total).unwrap_or(100)
        };
        let tasks = plan
            .subtasks
            .iter()
            .map(|s| {
                let state = board.get(&s.id);
                TaskRow {
                    id: s.id.clone(),
                    title: s.title.clone(),
                    status: board.status_of(&s.id),
                    worker_id: state.and_then(|t| t.worker_id.clone()),
                    worktree: state.and_then(|t| t.worktree.clone()),
                    commit: state.and_then(|t| t.commit.clone()),
                    review_attempts: state.map_or(0, |t| t.review_attempts),
                    merged: state.is_some_and(|t| t.merged),
                    error: state.and_then(|t| t.error.clone()),
                }
            })
            .collect();

        Ok(StatusReport {
            session_id,
            task: plan.task.clone(),
            epic_title: plan.epic.title.clone(),
            branch: plan.branch.clone(),
            start_commit: plan.start_commit.clone(),
            total,
            is_complete: total > 0 && counts.complete == total,
            has_failures: counts.failed > 0 || failure.is_some(),
            counts,
            progress_percent,
            tasks,
            failure,
        })
    }

    /// Session overview, optionally highlighting one subtask.
    pub async fn context(&self, session_id: Uuid, task_id: Option<&str>) -> SwarmResult<ContextReport> {
        let plan = self.load_plan(session_id).await?;
        if let Some(id) = task_id {
            require_subtask(&plan, id)?;
        }
        let board = self.store.read_tasks(session_id).await?;

        let subtasks: Vec<SubtaskContext> = plan
            .subtasks
            .iter()
            .map(|s| SubtaskContext {
                id: s.id.clone(),
                title: s.title.clone(),
                description: s.description.clone(),
                files: s.files.clone(),
                dependencies: s.dependencies.clone(),
                status: board.status_of(&s.id),
                is_highlighted: task_id == Some(s.id.as_str()),
            })
            .collect();
        let count = |pred: fn(TaskStatus) -> bool| subtasks.iter().filter(|s| pred(s.status)).count();
        let progress = Progress {
            total: subtasks.len(),
            complete: count(|s| s == TaskStatus::Complete),
            running: count(TaskStatus::is_active),
            pending: count(|s| s == TaskStatus::Pending),
        };

        Ok(ContextReport {
            session_id,
            epic: EpicContext::of(&plan),
            highlighted_task: subtasks.iter().find(|s| s.is_highlighted).cloned(),
            subtasks,
            progress,
        })
    }

    /// What a reviewer needs: the task, what it builds on, and who builds on it.
    pub async fn review_context(&self, session_id: Uuid, task_id: &str) -> SwarmResult<ReviewContext> {
        let plan = self.load_plan(session_id).await?;
        let subtask = require_subtask(&plan, task_id)?;
        let board = self.store.read_tasks(session_id).await?;
        let state = board.get(task_id);
        let worktree = match state.and_then(|s| s.worktree.clone()) {
            Some(path) => path,
            None => self.worktrees.path_for(&plan.project_name(), task_id)?,
        };

        let completed_dependencies: Vec<TaskBrief> = subtask
            .dependencies
            .iter()
            .filter(|d| board.is_complete(d))
            .filter_map(|d| plan.subtask(d))
            .map(TaskBrief::from)
            .collect();
        let downstream_tasks: Vec<TaskBrief> = plan
            .dependents_of(task_id)
            .into_iter()
            .map(TaskBrief::from)
            .collect();

        let mut review_focus = vec![
            format!(
                "changes stay within the assigned files: {}",
                subtask.files.join(", ")
            ),
            "the implementation fulfils the requirements".to_string(),
            "errors are handled and edge cases covered".to_string(),
        ];
        if !downstream_tasks.is_empty() {
            let ids: Vec<&str> = downstream_tasks.iter().map(|t| t.id.as_str()).collect();
            review_focus.push(format!(
                "interfaces consumed by {} are usable as described",
                ids.join(", ")
            ));
        }

        Ok(ReviewContext {
            session_id,
            epic: EpicContext::of(&plan),
            task: ReviewTarget {
                id: subtask.id.clone(),
                title: subtask.title.clone(),
                description: subtask.description.clone(),
                files: subtask.files.clone(),
                worktree,
                review_attempts: state.map_or(0, |s| s.review_attempts),
            },
            requirements: subtask.description.clone(),
            completed_dependencies,
            downstream_tasks,
            review_focus,
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn load_plan(&self, session_id: Uuid) -> SwarmResult<Plan> {
        self.store
            .read_plan(session_id)
            .await?
            .ok_or_else(|| SwarmError::session_not_found(session_id))
    }

    /// Plan of a session that has not been aborted.
    async fn load_live_plan(&self, session_id: Uuid) -> SwarmResult<Plan> {
        let plan = self.load_plan(session_id).await?;
        if self.store.read_failure(session_id).await?.is_some() {
            return Err(SwarmError::StateConflict(format!(
                "session {session_id} was aborted"
            )));
        }
        Ok(plan)
    }

    async fn save(&self, session_id: Uuid, board: &mut TaskBoard) -> SwarmResult<()> {
        board.revision = self.store.write_tasks(session_id, board).await?;
        Ok(())
    }

    /// Best-effort worktree removal. Returns whether it succeeded.
    async fn release_worktree(&self, plan: &Plan, path: &Path) -> bool {
        match self.worktrees.remove(&plan.project_path, path).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to release worktree");
                false
            }
        }
    }
}

fn require_subtask<'a>(plan: &'a Plan, task_id: &str) -> SwarmResult<&'a Subtask> {
    plan.subtask(task_id)
        .ok_or_else(|| SwarmError::task_not_found(task_id))
}

fn no_worktree(task_id: &str) -> SwarmError {
    SwarmError::Precondition(format!(
        "no worktree found for task {task_id}. create worktree first"
    ))
}

fn not_started(task_id: &str) -> SwarmError {
    SwarmError::StateConflict(format!("task {task_id} has not been started"))
}

/// Paths under the worktrees dir compare by name; git may report them resolved.
fn same_dir(a: &Path, b: &Path) -> bool {
    a == b || (a.file_name().is_some() && a.file_name() == b.file_name())
}
