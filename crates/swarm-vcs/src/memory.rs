use crate::{CommitOutcome, ResetMode, VcsBackend};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use swarm_core::{SwarmError, SwarmResult};

/// Observable state of one in-memory repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSnapshot {
    /// Checked-out branch.
    pub branch: String,
    /// Current HEAD.
    pub head: String,
    /// Whether the working copy has uncommitted changes.
    pub dirty: bool,
    /// Registered worktrees.
    pub worktrees: BTreeSet<PathBuf>,
    /// Commits cherry-picked into the main line, in order.
    pub picked: Vec<String>,
    /// Every reset applied to the main working copy, in order.
    pub resets: Vec<(String, ResetMode)>,
    /// A cherry-pick stopped on a conflict.
    pub cherry_pick_in_progress: bool,
}

#[derive(Default)]
struct State {
    repos: HashMap<PathBuf, RepoSnapshot>,
    /// Worktree path -> owning repository.
    worktree_owner: HashMap<PathBuf, PathBuf>,
    /// Worktree path -> commit checked out there.
    worktree_heads: HashMap<PathBuf, String>,
    /// Worktrees holding uncommitted edits.
    edited: HashSet<PathBuf>,
    failing_picks: HashSet<String>,
    failing_removals: HashSet<PathBuf>,
    next_commit: u64,
}

/// Deterministic [`VcsBackend`] that keeps repository state in memory.
///
/// Worktree directories are still created and removed on disk so that code
/// scanning the worktrees directory sees the same layout as with `git`.
#[derive(Default)]
pub struct InMemoryVcs {
    state: Mutex<State>,
}

impl InMemoryVcs {
    /// Backend with no repositories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a clean repository at `path` on `branch` with HEAD at `head`.
    pub fn add_repo(&self, path: impl Into<PathBuf>, branch: &str, head: &str) {
        self.state.lock().repos.insert(
            path.into(),
            RepoSnapshot {
                branch: branch.to_string(),
                head: head.to_string(),
                ..RepoSnapshot::default()
            },
        );
    }

    /// Mark `repo` as having uncommitted changes, or clean it.
    pub fn set_dirty(&self, repo: &Path, dirty: bool) {
        if let Some(r) = self.state.lock().repos.get_mut(repo) {
            r.dirty = dirty;
        }
    }

    /// Pretend a worker edited files in `worktree`.
    pub fn edit(&self, worktree: &Path) {
        self.state.lock().edited.insert(worktree.to_path_buf());
    }

    /// Pretend a worker committed its own edits in `worktree`; returns the
    /// new worktree HEAD.
    pub fn commit_in(&self, worktree: &Path) -> String {
        let mut state = self.state.lock();
        state.edited.remove(worktree);
        let commit = Self::next_commit(&mut state);
        state
            .worktree_heads
            .insert(worktree.to_path_buf(), commit.clone());
        commit
    }

    /// Make cherry-picking `commit` fail with a conflict.
    pub fn fail_cherry_pick(&self, commit: &str) {
        self.state.lock().failing_picks.insert(commit.to_string());
    }

    /// Make removing `worktree` fail.
    pub fn fail_worktree_removal(&self, worktree: &Path) {
        self.state.lock().failing_removals.insert(worktree.to_path_buf());
    }

    /// Current state of `repo`.
    pub fn snapshot(&self, repo: &Path) -> Option<RepoSnapshot> {
        self.state.lock().repos.get(repo).cloned()
    }

    fn with_repo<T>(
        &self,
        repo: &Path,
        f: impl FnOnce(&mut RepoSnapshot) -> SwarmResult<T>,
    ) -> SwarmResult<T> {
        let mut state = self.state.lock();
        let r = state
            .repos
            .get_mut(repo)
            .ok_or_else(|| SwarmError::Vcs(format!("not a git repository: {}", repo.display())))?;
        f(r)
    }

    fn next_commit(state: &mut State) -> String {
        state.next_commit += 1;
        format!("{:040x}", state.next_commit)
    }

    /// Resolve `dir` to the repository it belongs to, directly or via a worktree.
    fn owner_of(state: &State, dir: &Path) -> Option<PathBuf> {
        if state.repos.contains_key(dir) {
            return Some(dir.to_path_buf());
        }
        state.worktree_owner.get(dir).cloned()
    }
}

#[async_trait]
impl VcsBackend for InMemoryVcs {
    async fn is_repo(&self, path: &Path) -> SwarmResult<bool> {
        Ok(self.state.lock().repos.contains_key(path))
    }

    async fn current_branch(&self, repo: &Path) -> SwarmResult<String> {
        self.with_repo(repo, |r| Ok(r.branch.clone()))
    }

    async fn head_commit(&self, repo: &Path) -> SwarmResult<String> {
        if let Some(head) = self.state.lock().worktree_heads.get(repo) {
            return Ok(head.clone());
        }
        self.with_repo(repo, |r| Ok(r.head.clone()))
    }

    async fn has_uncommitted_changes(&self, repo: &Path) -> SwarmResult<bool> {
        self.with_repo(repo, |r| Ok(r.dirty))
    }

    async fn worktree_add(&self, repo: &Path, path: &Path, commit: &str) -> SwarmResult<()> {
        {
            let mut state = self.state.lock();
            if state.worktree_owner.contains_key(path) {
                return Err(SwarmError::Vcs(format!(
                    "'{}' already exists",
                    path.display()
                )));
            }
            let r = state.repos.get_mut(repo).ok_or_else(|| {
                SwarmError::Vcs(format!("not a git repository: {}", repo.display()))
            })?;
            r.worktrees.insert(path.to_path_buf());
            state
                .worktree_owner
                .insert(path.to_path_buf(), repo.to_path_buf());
            state
                .worktree_heads
                .insert(path.to_path_buf(), commit.to_string());
        }
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn worktree_remove(&self, repo: &Path, path: &Path) -> SwarmResult<()> {
        {
            let mut state = self.state.lock();
            if state.failing_removals.contains(path) {
                return Err(SwarmError::Vcs(format!(
                    "cannot remove worktree '{}': device busy",
                    path.display()
                )));
            }
            state.worktree_owner.remove(path);
            state.worktree_heads.remove(path);
            state.edited.remove(path);
            if let Some(r) = state.repos.get_mut(repo) {
                r.worktrees.remove(path);
            }
        }
        if tokio::fs::try_exists(path).await? {
            tokio::fs::remove_dir_all(path).await?;
        }
        Ok(())
    }

    async fn worktree_list(&self, repo: &Path) -> SwarmResult<Vec<PathBuf>> {
        self.with_repo(repo, |r| {
            let mut all = vec![repo.to_path_buf()];
            all.extend(r.worktrees.iter().cloned());
            Ok(all)
        })
    }

    async fn worktree_prune(&self, repo: &Path) -> SwarmResult<()> {
        let registered: Vec<PathBuf> = self
            .with_repo(repo, |r| Ok(r.worktrees.iter().cloned().collect()))?;
        let mut gone = Vec::new();
        for path in registered {
            if !tokio::fs::try_exists(&path).await? {
                gone.push(path);
            }
        }
        let mut state = self.state.lock();
        for path in gone {
            state.worktree_owner.remove(&path);
            state.worktree_heads.remove(&path);
            if let Some(r) = state.repos.get_mut(repo) {
                r.worktrees.remove(&path);
            }
        }
        Ok(())
    }

    async fn worktree_repo(&self, path: &Path) -> SwarmResult<Option<PathBuf>> {
        Ok(self.state.lock().worktree_owner.get(path).cloned())
    }

    async fn commit_all(&self, dir: &Path, _message: &str) -> SwarmResult<CommitOutcome> {
        let mut state = self.state.lock();
        if Self::owner_of(&state, dir).is_none() {
            return Err(SwarmError::Vcs(format!(
                "not a git repository: {}",
                dir.display()
            )));
        }
        if !state.edited.remove(dir) {
            return Ok(CommitOutcome::NothingToCommit);
        }
        let commit = Self::next_commit(&mut state);
        if state.worktree_owner.contains_key(dir) {
            state
                .worktree_heads
                .insert(dir.to_path_buf(), commit.clone());
        }
        Ok(CommitOutcome::Committed(commit))
    }

    async fn cherry_pick(&self, repo: &Path, commit: &str) -> SwarmResult<()> {
        let mut state = self.state.lock();
        let failing = state.failing_picks.contains(commit);
        let r = state
            .repos
            .get_mut(repo)
            .ok_or_else(|| SwarmError::Vcs(format!("not a git repository: {}", repo.display())))?;
        if failing {
            r.cherry_pick_in_progress = true;
            r.dirty = true;
            return Err(SwarmError::Vcs(format!(
                "git cherry-pick {commit} failed: CONFLICT (content)"
            )));
        }
        r.picked.push(commit.to_string());
        r.head = format!("picked-{commit}");
        Ok(())
    }

    async fn cherry_pick_abort(&self, repo: &Path) -> SwarmResult<()> {
        self.with_repo(repo, |r| {
            if !r.cherry_pick_in_progress {
                return Err(SwarmError::Vcs("no cherry-pick in progress".into()));
            }
            r.cherry_pick_in_progress = false;
            r.dirty = false;
            Ok(())
        })
    }

    async fn reset(&self, dir: &Path, commit: &str, mode: ResetMode) -> SwarmResult<()> {
        let mut state = self.state.lock();
        if state.repos.contains_key(dir) {
            let r = state
                .repos
                .get_mut(dir)
                .ok_or_else(|| SwarmError::Vcs(format!("not a git repository: {}", dir.display())))?;
            r.head = commit.to_string();
            r.resets.push((commit.to_string(), mode));
            if mode == ResetMode::Hard {
                r.dirty = false;
                r.cherry_pick_in_progress = false;
            }
            return Ok(());
        }
        if state.worktree_owner.contains_key(dir) {
            let moved = state
                .worktree_heads
                .insert(dir.to_path_buf(), commit.to_string())
                .is_some_and(|previous| previous != commit);
            match mode {
                ResetMode::Hard => {
                    state.edited.remove(dir);
                }
                // Changes between the old and new HEAD stay staged.
                ResetMode::Soft if moved => {
                    state.edited.insert(dir.to_path_buf());
                }
                ResetMode::Soft => {}
            }
            return Ok(());
        }
        Err(SwarmError::Vcs(format!(
            "not a git repository: {}",
            dir.display()
        )))
    }

    async fn diff_stat(&self, repo: &Path, base: &str) -> SwarmResult<String> {
        self.with_repo(repo, |r| {
            Ok(format!(
                "{} commit(s) applied on top of {}",
                r.picked.len(),
                base
            ))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_requires_edits() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("app");
        let wt = tmp.path().join("worktrees/app-a");
        let vcs = InMemoryVcs::new();
        vcs.add_repo(&repo, "main", "base");
        vcs.worktree_add(&repo, &wt, "base").await.unwrap();
        assert!(wt.exists());

        assert_eq!(
            vcs.commit_all(&wt, "swarm: a").await.unwrap(),
            CommitOutcome::NothingToCommit
        );
        vcs.edit(&wt);
        let outcome = vcs.commit_all(&wt, "swarm: a").await.unwrap();
        assert!(outcome.commit().is_some());
    }

    #[tokio::test]
    async fn test_failed_pick_needs_abort() {
        let vcs = InMemoryVcs::new();
        let repo = PathBuf::from("/repo");
        vcs.add_repo(&repo, "main", "base");
        vcs.fail_cherry_pick("c1");

        assert!(vcs.cherry_pick(&repo, "c1").await.is_err());
        assert!(vcs.snapshot(&repo).unwrap().cherry_pick_in_progress);
        vcs.cherry_pick_abort(&repo).await.unwrap();
        let snap = vcs.snapshot(&repo).unwrap();
        assert!(!snap.dirty);
        assert!(snap.picked.is_empty());
    }

    #[tokio::test]
    async fn test_hard_reset_clears_interrupted_pick() {
        let vcs = InMemoryVcs::new();
        let repo = PathBuf::from("/repo");
        vcs.add_repo(&repo, "main", "base");
        vcs.fail_cherry_pick("c1");
        assert!(vcs.cherry_pick(&repo, "c1").await.is_err());

        vcs.reset(&repo, "base", ResetMode::Hard).await.unwrap();
        let snap = vcs.snapshot(&repo).unwrap();
        assert!(!snap.cherry_pick_in_progress);
        assert!(!snap.dirty);
        assert!(vcs.cherry_pick_abort(&repo).await.is_err());
    }

    #[tokio::test]
    async fn test_worktree_heads_follow_commits_and_resets() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("app");
        let wt = tmp.path().join("worktrees/app-a");
        let vcs = InMemoryVcs::new();
        vcs.add_repo(&repo, "main", "base");
        vcs.worktree_add(&repo, &wt, "base").await.unwrap();
        assert_eq!(vcs.head_commit(&wt).await.unwrap(), "base");

        let own = vcs.commit_in(&wt);
        assert_eq!(vcs.head_commit(&wt).await.unwrap(), own);
        assert_eq!(vcs.head_commit(&repo).await.unwrap(), "base");

        // Soft reset back to base leaves the worker's commit staged.
        vcs.reset(&wt, "base", ResetMode::Soft).await.unwrap();
        let squashed = vcs.commit_all(&wt, "swarm: a").await.unwrap();
        assert_eq!(vcs.head_commit(&wt).await.unwrap(), squashed.commit().unwrap());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("app");
        let wt = tmp.path().join("wt");
        let vcs = InMemoryVcs::new();
        vcs.add_repo(&repo, "main", "base");
        vcs.worktree_add(&repo, &wt, "base").await.unwrap();
        vcs.worktree_remove(&repo, &wt).await.unwrap();
        vcs.worktree_remove(&repo, &wt).await.unwrap();
        assert_eq!(vcs.worktree_list(&repo).await.unwrap(), vec![repo.clone()]);
    }
}
