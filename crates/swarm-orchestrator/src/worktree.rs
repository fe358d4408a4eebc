use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swarm_core::message::is_safe_id;
use swarm_core::{SwarmConfig, SwarmError, SwarmResult};
use swarm_vcs::{ResetMode, VcsBackend};
use tracing::{debug, info, warn};

/// A path that could not be removed, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    /// Path left behind.
    pub path: PathBuf,
    /// Why removal failed.
    pub error: String,
}

/// Outcome of a best-effort bulk removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Paths removed.
    pub removed: Vec<PathBuf>,
    /// Paths that could not be removed.
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// Whether every removal succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Binds subtasks to isolated, detached working copies under
/// `<root>/worktrees/<project>-<task>`.
#[derive(Clone)]
pub struct WorktreeManager {
    worktrees_dir: PathBuf,
    config: SwarmConfig,
    vcs: Arc<dyn VcsBackend>,
}

impl WorktreeManager {
    /// Manager rooted at the configured worktrees directory.
    pub fn new(config: &SwarmConfig, vcs: Arc<dyn VcsBackend>) -> Self {
        Self {
            worktrees_dir: config.worktrees_dir(),
            config: config.clone(),
            vcs,
        }
    }

    /// Directory holding every worktree.
    pub fn worktrees_dir(&self) -> &Path {
        &self.worktrees_dir
    }

    /// Deterministic worktree path of `task_id`. Refuses any id that would
    /// place the worktree outside the worktrees dir.
    pub fn path_for(&self, project: &str, task_id: &str) -> SwarmResult<PathBuf> {
        let path = self.config.worktree_path(project, task_id);
        let name = format!("{project}-{task_id}");
        let contained = is_safe_id(task_id)
            && path.parent() == Some(self.worktrees_dir.as_path())
            && dir_name(&path) == Some(name.as_str());
        if !contained {
            return Err(SwarmError::Validation(format!(
                "worktree for task \"{task_id}\" would escape {}",
                self.worktrees_dir.display()
            )));
        }
        Ok(path)
    }

    /// Create the worktree for `task_id` at `commit`.
    pub async fn create(
        &self,
        repo: &Path,
        project: &str,
        task_id: &str,
        commit: &str,
    ) -> SwarmResult<PathBuf> {
        let path = self.path_for(project, task_id)?;
        tokio::fs::create_dir_all(&self.worktrees_dir).await?;
        self.vcs.worktree_add(repo, &path, commit).await?;
        info!(task_id, path = %path.display(), commit, "Created worktree");
        Ok(path)
    }

    /// Whether `path` is a worktree currently registered with `repo`.
    pub async fn is_live(&self, repo: &Path, path: &Path) -> SwarmResult<bool> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(false);
        }
        let listed = self.vcs.worktree_list(repo).await?;
        let wanted = canonical(path).await;
        for candidate in listed {
            if candidate == path || canonical(&candidate).await == wanted {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Remove a worktree. Removing an absent worktree is a no-op.
    pub async fn remove(&self, repo: &Path, path: &Path) -> SwarmResult<()> {
        self.vcs.worktree_remove(repo, path).await?;
        debug!(path = %path.display(), "Removed worktree");
        Ok(())
    }

    /// Worktrees registered with `repo` that belong to `project`.
    pub async fn list_active(&self, repo: &Path, project: &str) -> SwarmResult<Vec<PathBuf>> {
        let roots = self.roots().await;
        Ok(self
            .vcs
            .worktree_list(repo)
            .await?
            .into_iter()
            .filter(|p| belongs_to(p, project, &roots))
            .collect())
    }

    /// Remove every worktree of `project`, registered or stray, tolerating
    /// individual failures.
    pub async fn cleanup_all(&self, repo: &Path, project: &str) -> SwarmResult<CleanupReport> {
        let roots = self.roots().await;
        let mut targets: BTreeSet<PathBuf> =
            self.list_active(repo, project).await?.into_iter().collect();
        let known: BTreeSet<_> = targets
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_os_string()))
            .collect();
        for stray in self.project_dirs(project).await? {
            let seen = stray.file_name().is_some_and(|n| known.contains(n));
            if !seen && belongs_to(&stray, project, &roots) {
                targets.insert(stray);
            }
        }

        let mut report = CleanupReport::default();
        for path in targets {
            match self.vcs.worktree_remove(repo, &path).await {
                Ok(()) => report.removed.push(path),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove worktree");
                    report.failed.push(CleanupFailure {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }
        if let Err(e) = self.vcs.worktree_prune(repo).await {
            warn!(error = %e, "Worktree prune failed");
        }
        info!(
            project,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Worktree cleanup finished"
        );
        Ok(report)
    }

    /// Hard-reset a worktree to the main repository's current HEAD so it sees
    /// work merged since it was created. Returns the commit it now sits on.
    pub async fn sync(&self, repo: &Path, path: &Path) -> SwarmResult<String> {
        let head = self.vcs.head_commit(repo).await?;
        self.vcs.reset(path, &head, ResetMode::Hard).await?;
        info!(path = %path.display(), commit = %head, "Synced worktree");
        Ok(head)
    }

    /// Repository `dir` was created from, when it is still a worktree.
    pub async fn owning_repo(&self, dir: &Path) -> Option<PathBuf> {
        match self.vcs.worktree_repo(dir).await {
            Ok(repo) => repo,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "Cannot resolve worktree owner");
                None
            }
        }
    }

    /// Drop `repo`'s records of worktrees whose directories are gone.
    pub async fn prune(&self, repo: &Path) -> SwarmResult<()> {
        self.vcs.worktree_prune(repo).await
    }

    /// Directories directly under the worktrees dir named `<project>-*`.
    pub async fn project_dirs(&self, project: &str) -> SwarmResult<Vec<PathBuf>> {
        let prefix = format!("{project}-");
        Ok(self
            .all_dirs()
            .await?
            .into_iter()
            .filter(|p| dir_name(p).is_some_and(|n| n.starts_with(&prefix)))
            .collect())
    }

    /// Every directory directly under the worktrees dir.
    pub async fn all_dirs(&self) -> SwarmResult<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.worktrees_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// The worktrees dir as configured and as resolved on disk; git reports
    /// resolved paths.
    async fn roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.worktrees_dir.clone()];
        if let Ok(resolved) = tokio::fs::canonicalize(&self.worktrees_dir).await {
            if resolved != self.worktrees_dir {
                roots.push(resolved);
            }
        }
        roots
    }
}

fn dir_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn belongs_to(path: &Path, project: &str, roots: &[PathBuf]) -> bool {
    let in_root = path.parent().is_some_and(|p| roots.iter().any(|r| r == p));
    in_root && dir_name(path).is_some_and(|n| n.starts_with(&format!("{project}-")))
}

async fn canonical(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}
