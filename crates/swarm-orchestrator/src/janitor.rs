use crate::worktree::{CleanupFailure, WorktreeManager};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{SwarmConfig, SwarmResult};
use swarm_session::SessionStore;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one janitor pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired sessions deleted.
    pub collected_sessions: Vec<Uuid>,
    /// Worktree directories with no session left.
    pub removed_orphans: Vec<PathBuf>,
    /// Repositories whose worktree records were pruned after orphan removal.
    #[serde(default)]
    pub pruned_repos: Vec<PathBuf>,
    /// Directories that could not be removed.
    pub failed: Vec<CleanupFailure>,
}

/// Periodic garbage collection: expired sessions, plus worktree directories
/// whose project no longer has any session.
pub struct Janitor {
    config: SwarmConfig,
    store: Arc<dyn SessionStore>,
    worktrees: WorktreeManager,
}

impl Janitor {
    /// Janitor over `store` and the worktrees directory of `worktrees`.
    pub fn new(config: SwarmConfig, store: Arc<dyn SessionStore>, worktrees: WorktreeManager) -> Self {
        Self {
            config,
            store,
            worktrees,
        }
    }

    /// Run one pass.
    pub async fn sweep(&self) -> SwarmResult<SweepReport> {
        let collected_sessions = self
            .store
            .collect_garbage(Utc::now(), self.config.session_ttl())
            .await?;

        let mut projects = BTreeSet::new();
        for id in self.store.list().await? {
            match self.store.read_plan(id).await {
                Ok(Some(plan)) => {
                    projects.insert(plan.project_name());
                }
                Ok(None) => {}
                Err(e) => {
                    // Its project is unknown, so no directory is provably orphaned.
                    warn!(session_id = %id, error = %e, "Cannot read session plan");
                    return Ok(SweepReport {
                        collected_sessions,
                        ..SweepReport::default()
                    });
                }
            }
        }

        let mut report = SweepReport {
            collected_sessions,
            ..SweepReport::default()
        };
        let mut owners = BTreeSet::new();
        for dir in self.worktrees.all_dirs().await? {
            let owned = dir
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| projects.iter().any(|p| name.starts_with(&format!("{p}-"))));
            if owned {
                continue;
            }
            // Resolved before removal; the worktree's `.git` link goes with it.
            let owner = self.worktrees.owning_repo(&dir).await;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    owners.extend(owner);
                    report.removed_orphans.push(dir);
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to remove orphaned worktree");
                    report.failed.push(CleanupFailure {
                        path: dir,
                        error: e.to_string(),
                    });
                }
            }
        }

        for repo in owners {
            match self.worktrees.prune(&repo).await {
                Ok(()) => report.pruned_repos.push(repo),
                Err(e) => warn!(repo = %repo.display(), error = %e, "Worktree prune failed"),
            }
        }

        if !report.collected_sessions.is_empty() || !report.removed_orphans.is_empty() {
            info!(
                sessions = report.collected_sessions.len(),
                orphans = report.removed_orphans.len(),
                "Janitor sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until the returned handle is aborted.
    pub fn start(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                if let Err(e) = self.sweep().await {
                    warn!(error = %e, "Janitor sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use swarm_core::Plan;
    use swarm_session::FileSessionStore;
    use swarm_vcs::{InMemoryVcs, VcsBackend};

    async fn setup_with_vcs() -> (Janitor, Arc<FileSessionStore>, Arc<InMemoryVcs>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = SwarmConfig::with_root(tmp.path().join("swarm"));
        let store = Arc::new(FileSessionStore::new(&config).await.unwrap());
        let vcs = Arc::new(InMemoryVcs::new());
        let worktrees = WorktreeManager::new(&config, vcs.clone());
        (Janitor::new(config, store.clone(), worktrees), store, vcs, tmp)
    }

    async fn setup() -> (Janitor, Arc<FileSessionStore>, tempfile::TempDir) {
        let (janitor, store, _vcs, tmp) = setup_with_vcs().await;
        (janitor, store, tmp)
    }

    #[tokio::test]
    async fn test_sweep_removes_only_orphans() {
        let (janitor, store, tmp) = setup().await;
        let plan = Plan::new(Uuid::new_v4(), "/repos/webapp", "main", "abc", "t");
        store.create(&plan).await.unwrap();

        let wt = tmp.path().join("swarm/worktrees");
        let owned = wt.join("webapp-task-1");
        let orphan = wt.join("legacy-task-1");
        tokio::fs::create_dir_all(&owned).await.unwrap();
        tokio::fs::create_dir_all(&orphan).await.unwrap();

        let report = janitor.sweep().await.unwrap();
        assert!(report.collected_sessions.is_empty());
        assert_eq!(report.removed_orphans, vec![orphan.clone()]);
        assert!(owned.exists());
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_sweep_prunes_repos_of_removed_worktrees() {
        let (janitor, _store, vcs, tmp) = setup_with_vcs().await;
        let repo = tmp.path().join("legacy");
        vcs.add_repo(&repo, "main", "base");
        let orphan = janitor
            .worktrees
            .create(&repo, "legacy", "task-1", "base")
            .await
            .unwrap();
        let stray = tmp.path().join("swarm/worktrees/unknown-task-9");
        tokio::fs::create_dir_all(&stray).await.unwrap();

        let report = janitor.sweep().await.unwrap();
        assert_eq!(report.removed_orphans, vec![orphan.clone(), stray]);
        assert_eq!(report.pruned_repos, vec![repo.clone()]);
        assert!(vcs.snapshot(&repo).unwrap().worktrees.is_empty());
        assert_eq!(vcs.worktree_list(&repo).await.unwrap(), vec![repo]);
    }

    #[tokio::test]
    async fn test_sweep_without_worktrees_dir() {
        let (janitor, _store, _tmp) = setup().await;
        let report = janitor.sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let (janitor, _store, tmp) = setup().await;
        let orphan = tmp.path().join("swarm/worktrees/gone-task-1");
        tokio::fs::create_dir_all(&orphan).await.unwrap();

        let handle = Arc::new(janitor).start(Duration::from_millis(20));
        for _ in 0..50 {
            if !orphan.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert!(!orphan.exists());
    }
}
