//! Version-control adapter for the swarm orchestrator.
//!
//! # Main types
//!
//! - [`VcsBackend`] — Repository inspection and worktree/commit/reset primitives.
//! - [`GitCli`] — Backend over `git2` (inspection) and the `git` binary (mutation).
//! - [`InMemoryVcs`] — Deterministic backend for tests and dry runs.

/// `git`-backed implementation.
pub mod git;
/// In-memory implementation.
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use swarm_core::SwarmResult;

pub use git::GitCli;
pub use memory::{InMemoryVcs, RepoSnapshot};

/// Result of asking the backend to commit everything in a working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "commit", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// A commit was created.
    Committed(String),
    /// The working copy had no changes.
    NothingToCommit,
}

impl CommitOutcome {
    /// Hash of the new commit, if any.
    pub fn commit(&self) -> Option<&str> {
        match self {
            CommitOutcome::Committed(hash) => Some(hash),
            CommitOutcome::NothingToCommit => None,
        }
    }
}

/// How far a reset reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    /// Move HEAD only; changes stay staged.
    Soft,
    /// Move HEAD and discard tracked changes.
    Hard,
}

impl ResetMode {
    /// Matching `git reset` flag.
    pub fn flag(self) -> &'static str {
        match self {
            ResetMode::Soft => "--soft",
            ResetMode::Hard => "--hard",
        }
    }
}

/// Operations the orchestrator needs from version control.
///
/// `repo` is always the main working copy; worktree-local operations take the
/// worktree path instead.
#[async_trait]
pub trait VcsBackend: Send + Sync {
    /// Whether `path` is inside a git working copy.
    async fn is_repo(&self, path: &Path) -> SwarmResult<bool>;
    /// Name of the checked-out branch.
    async fn current_branch(&self, repo: &Path) -> SwarmResult<String>;
    /// Full hash of HEAD in `repo` or a worktree.
    async fn head_commit(&self, repo: &Path) -> SwarmResult<String>;
    /// Tracked modifications or untracked files present.
    async fn has_uncommitted_changes(&self, repo: &Path) -> SwarmResult<bool>;

    /// Create a detached worktree at `path` checked out at `commit`.
    async fn worktree_add(&self, repo: &Path, path: &Path, commit: &str) -> SwarmResult<()>;
    /// Remove the worktree at `path`. Absent paths are a no-op.
    async fn worktree_remove(&self, repo: &Path, path: &Path) -> SwarmResult<()>;
    /// Every worktree registered with `repo`, including the main one.
    async fn worktree_list(&self, repo: &Path) -> SwarmResult<Vec<PathBuf>>;
    /// Drop administrative records of worktrees whose directories are gone.
    async fn worktree_prune(&self, repo: &Path) -> SwarmResult<()>;
    /// Main working copy that the worktree at `path` belongs to, or `None`
    /// when `path` is not a worktree of any repository.
    async fn worktree_repo(&self, path: &Path) -> SwarmResult<Option<PathBuf>>;

    /// Stage everything in `dir` and commit it.
    async fn commit_all(&self, dir: &Path, message: &str) -> SwarmResult<CommitOutcome>;
    /// Apply `commit` on top of HEAD in `repo`.
    async fn cherry_pick(&self, repo: &Path, commit: &str) -> SwarmResult<()>;
    /// Abandon an interrupted cherry-pick.
    async fn cherry_pick_abort(&self, repo: &Path) -> SwarmResult<()>;
    /// Move HEAD of `dir` to `commit`.
    async fn reset(&self, dir: &Path, commit: &str, mode: ResetMode) -> SwarmResult<()>;
    /// Human-readable change summary of the working copy against `base`.
    async fn diff_stat(&self, repo: &Path, base: &str) -> SwarmResult<String>;
}
