use crate::{CommitOutcome, ResetMode, VcsBackend};
use async_trait::async_trait;
use git2::{Repository, StatusOptions};
use std::path::{Path, PathBuf};
use std::process::Output;
use swarm_core::{SwarmError, SwarmResult};
use tokio::process::Command;
use tracing::{debug, warn};

/// Backend driving a real repository.
///
/// Read-only inspection goes through `git2`; anything that touches worktrees,
/// the index or HEAD shells out to `git`, which keeps hooks, config and
/// worktree bookkeeping identical to what a user would get.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    /// Backend using the `git` found on `PATH`.
    pub fn new() -> Self {
        Self
    }

    /// Whether a `git` binary is on `PATH`.
    pub async fn available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> SwarmResult<Output> {
        debug!(args = ?args, dir = %dir.display(), "Running git command");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| SwarmError::Vcs(format!("failed to run git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(args = ?args, stderr = %stderr.trim(), "Git command failed");
        }
        Ok(output)
    }

    async fn run_checked(&self, dir: &Path, args: &[&str]) -> SwarmResult<String> {
        let output = self.run(dir, args).await?;
        if !output.status.success() {
            return Err(command_error(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn with_repo<T, F>(&self, path: &Path, f: F) -> SwarmResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T, git2::Error> + Send + 'static,
    {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&path).map_err(git_error)?;
            f(&repo).map_err(git_error)
        })
        .await
        .map_err(|e| SwarmError::Vcs(format!("git task failed: {e}")))?
    }
}

fn git_error(e: git2::Error) -> SwarmError {
    SwarmError::Vcs(e.message().to_string())
}

fn command_error(args: &[&str], output: &Output) -> SwarmError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    SwarmError::Vcs(format!("git {} failed: {}", args.join(" "), stderr.trim()))
}

fn path_arg(path: &Path) -> SwarmResult<&str> {
    path.to_str()
        .ok_or_else(|| SwarmError::Vcs(format!("non UTF-8 path: {}", path.display())))
}

/// Paths from `git worktree list --porcelain`.
fn parse_worktree_list(porcelain: &str) -> Vec<PathBuf> {
    porcelain
        .lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(PathBuf::from)
        .collect()
}

#[async_trait]
impl VcsBackend for GitCli {
    async fn is_repo(&self, path: &Path) -> SwarmResult<bool> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Repository::open(&path).is_ok())
            .await
            .map_err(|e| SwarmError::Vcs(format!("git task failed: {e}")))
    }

    async fn current_branch(&self, repo: &Path) -> SwarmResult<String> {
        self.with_repo(repo, |r| {
            let head = r.head()?;
            Ok(head.shorthand().unwrap_or("HEAD").to_string())
        })
        .await
    }

    async fn head_commit(&self, repo: &Path) -> SwarmResult<String> {
        self.with_repo(repo, |r| Ok(r.head()?.peel_to_commit()?.id().to_string()))
            .await
    }

    async fn has_uncommitted_changes(&self, repo: &Path) -> SwarmResult<bool> {
        self.with_repo(repo, |r| {
            let mut opts = StatusOptions::new();
            opts.include_untracked(true)
                .recurse_untracked_dirs(false)
                .exclude_submodules(true);
            Ok(!r.statuses(Some(&mut opts))?.is_empty())
        })
        .await
    }

    async fn worktree_add(&self, repo: &Path, path: &Path, commit: &str) -> SwarmResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.run_checked(repo, &["worktree", "add", "--detach", path_arg(path)?, commit])
            .await?;
        Ok(())
    }

    async fn worktree_remove(&self, repo: &Path, path: &Path) -> SwarmResult<()> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(());
        }
        let args = ["worktree", "remove", "--force", path_arg(path)?];
        let output = self.run(repo, &args).await?;
        if output.status.success() {
            return Ok(());
        }
        // Not registered (or registration is broken): drop the directory and
        // let prune clean up the bookkeeping.
        warn!(path = %path.display(), "git worktree remove failed, removing directory");
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| SwarmError::Vcs(format!("{}: {e}", command_error(&args, &output))))?;
        self.worktree_prune(repo).await
    }

    async fn worktree_list(&self, repo: &Path) -> SwarmResult<Vec<PathBuf>> {
        let out = self
            .run_checked(repo, &["worktree", "list", "--porcelain"])
            .await?;
        Ok(parse_worktree_list(&out))
    }

    async fn worktree_prune(&self, repo: &Path) -> SwarmResult<()> {
        self.run_checked(repo, &["worktree", "prune"]).await?;
        Ok(())
    }

    async fn worktree_repo(&self, path: &Path) -> SwarmResult<Option<PathBuf>> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&path).ok()?;
            if !repo.is_worktree() {
                return None;
            }
            // commondir is `<repo>/.git`
            repo.commondir().parent().map(Path::to_path_buf)
        })
        .await
        .map_err(|e| SwarmError::Vcs(format!("git task failed: {e}")))
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> SwarmResult<CommitOutcome> {
        self.run_checked(dir, &["add", "-A"]).await?;
        let output = self.run(dir, &["commit", "-m", message]).await?;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") {
                return Ok(CommitOutcome::NothingToCommit);
            }
            return Err(command_error(&["commit"], &output));
        }
        let hash = self.run_checked(dir, &["rev-parse", "HEAD"]).await?;
        Ok(CommitOutcome::Committed(hash))
    }

    async fn cherry_pick(&self, repo: &Path, commit: &str) -> SwarmResult<()> {
        self.run_checked(repo, &["cherry-pick", commit]).await?;
        Ok(())
    }

    async fn cherry_pick_abort(&self, repo: &Path) -> SwarmResult<()> {
        self.run_checked(repo, &["cherry-pick", "--abort"]).await?;
        Ok(())
    }

    async fn reset(&self, dir: &Path, commit: &str, mode: ResetMode) -> SwarmResult<()> {
        self.run_checked(dir, &["reset", mode.flag(), commit]).await?;
        Ok(())
    }

    async fn diff_stat(&self, repo: &Path, base: &str) -> SwarmResult<String> {
        self.run_checked(repo, &["diff", "--stat", base]).await
    }
}
