#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::Command;
use swarm_vcs::{CommitOutcome, GitCli, ResetMode, VcsBackend};

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(status.status.success(), "git {args:?} failed: {status:?}");
}

/// Initialise a repository with one commit; `None` when git is unavailable.
async fn init_repo(root: &Path) -> Option<std::path::PathBuf> {
    if !GitCli::available().await {
        eprintln!("git not available, skipping");
        return None;
    }
    let repo = root.join("webapp");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q", "-b", "main"]);
    git(&repo, &["config", "user.name", "Swarm Test"]);
    git(&repo, &["config", "user.email", "swarm@example.com"]);
    git(&repo, &["config", "commit.gpgsign", "false"]);
    std::fs::write(repo.join("README.md"), "hello\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "initial"]);
    Some(repo)
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_inspection() {
    let tmp = tempfile::tempdir().unwrap();
    let Some(repo) = init_repo(tmp.path()).await else {
        return;
    };
    let vcs = GitCli::new();

    assert!(vcs.is_repo(&repo).await.unwrap());
    assert!(!vcs.is_repo(tmp.path()).await.unwrap());
    assert_eq!(vcs.current_branch(&repo).await.unwrap(), "main");
    assert_eq!(vcs.head_commit(&repo).await.unwrap().len(), 40);
    assert!(!vcs.has_uncommitted_changes(&repo).await.unwrap());

    std::fs::write(repo.join("untracked.txt"), "x").unwrap();
    assert!(vcs.has_uncommitted_changes(&repo).await.unwrap());
}

// ---------------------------------------------------------------------------
// Worktrees, commits and merging back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_worktree_commit_and_cherry_pick() {
    let tmp = tempfile::tempdir().unwrap();
    let Some(repo) = init_repo(tmp.path()).await else {
        return;
    };
    let vcs = GitCli::new();
    let base = vcs.head_commit(&repo).await.unwrap();
    let wt = tmp.path().join("worktrees").join("webapp-task-1");

    vcs.worktree_add(&repo, &wt, &base).await.unwrap();
    assert!(wt.join("README.md").exists());
    let listed = vcs.worktree_list(&repo).await.unwrap();
    assert_eq!(listed.len(), 2);

    assert_eq!(
        vcs.commit_all(&wt, "swarm: nothing").await.unwrap(),
        CommitOutcome::NothingToCommit
    );

    std::fs::write(wt.join("feature.rs"), "fn main() {}\n").unwrap();
    let outcome = vcs.commit_all(&wt, "swarm: feature").await.unwrap();
    let commit = outcome.commit().unwrap().to_string();

    vcs.cherry_pick(&repo, &commit).await.unwrap();
    assert!(repo.join("feature.rs").exists());

    vcs.worktree_remove(&repo, &wt).await.unwrap();
    assert!(!wt.exists());
    vcs.worktree_remove(&repo, &wt).await.unwrap();

    vcs.reset(&repo, &base, ResetMode::Soft).await.unwrap();
    assert_eq!(vcs.head_commit(&repo).await.unwrap(), base);
    assert!(repo.join("feature.rs").exists());
    let stat = vcs.diff_stat(&repo, &base).await.unwrap();
    assert!(stat.contains("feature.rs"));

    vcs.reset(&repo, &base, ResetMode::Hard).await.unwrap();
    assert!(!repo.join("feature.rs").exists());
}

#[tokio::test]
async fn test_conflicting_cherry_pick_can_be_aborted() {
    let tmp = tempfile::tempdir().unwrap();
    let Some(repo) = init_repo(tmp.path()).await else {
        return;
    };
    let vcs = GitCli::new();
    let base = vcs.head_commit(&repo).await.unwrap();
    let wt = tmp.path().join("worktrees").join("webapp-task-2");
    vcs.worktree_add(&repo, &wt, &base).await.unwrap();

    std::fs::write(wt.join("README.md"), "from worker\n").unwrap();
    let commit = vcs.commit_all(&wt, "swarm: edit").await.unwrap();

    std::fs::write(repo.join("README.md"), "from main\n").unwrap();
    git(&repo, &["commit", "-q", "-am", "diverge"]);

    assert!(vcs
        .cherry_pick(&repo, commit.commit().unwrap())
        .await
        .is_err());
    vcs.cherry_pick_abort(&repo).await.unwrap();
    assert!(!vcs.has_uncommitted_changes(&repo).await.unwrap());
}

#[tokio::test]
async fn test_worktree_head_and_owner() {
    let tmp = tempfile::tempdir().unwrap();
    let Some(repo) = init_repo(tmp.path()).await else {
        return;
    };
    let vcs = GitCli::new();
    let base = vcs.head_commit(&repo).await.unwrap();
    let wt = tmp.path().join("worktrees").join("webapp-task-3");
    vcs.worktree_add(&repo, &wt, &base).await.unwrap();
    assert_eq!(vcs.head_commit(&wt).await.unwrap(), base);

    let owner = vcs.worktree_repo(&wt).await.unwrap().unwrap();
    assert_eq!(
        std::fs::canonicalize(owner).unwrap(),
        std::fs::canonicalize(&repo).unwrap()
    );
    assert_eq!(vcs.worktree_repo(&repo).await.unwrap(), None);
    assert_eq!(vcs.worktree_repo(tmp.path()).await.unwrap(), None);

    std::fs::write(wt.join("own.rs"), "fn own() {}\n").unwrap();
    git(&wt, &["add", "."]);
    git(&wt, &["commit", "-q", "-m", "worker commit"]);
    assert_ne!(vcs.head_commit(&wt).await.unwrap(), base);
    assert_eq!(vcs.head_commit(&repo).await.unwrap(), base);
}
