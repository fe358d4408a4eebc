#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use swarm_core::SwarmConfig;
use swarm_orchestrator::{Decomposition, Swarm};
use swarm_session::{FileMailbox, FileSessionStore};
use swarm_vcs::GitCli;

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "git {args:?} failed: {out:?}");
}

/// Repository with one commit plus a swarm over it; `None` when git is missing.
async fn setup(root: &Path) -> Option<(Swarm, PathBuf)> {
    if !GitCli::available().await {
        eprintln!("git not available, skipping");
        return None;
    }
    let repo = root.join("webapp");
    std::fs::create_dir_all(&repo).unwrap();
    let repo = std::fs::canonicalize(&repo).unwrap();
    git(&repo, &["init", "-q", "-b", "main"]);
    git(&repo, &["config", "user.name", "Swarm Test"]);
    git(&repo, &["config", "user.email", "swarm@example.com"]);
    git(&repo, &["config", "commit.gpgsign", "false"]);
    std::fs::write(repo.join("README.md"), "hello\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "initial"]);

    let config = SwarmConfig::with_root(root.join("swarm"));
    let store = Arc::new(FileSessionStore::new(&config).await.unwrap());
    let mailbox = Arc::new(FileMailbox::new(&config));
    let swarm = Swarm::new(config, store, mailbox, Arc::new(GitCli::new()));
    Some((swarm, repo))
}

fn single_task_plan() -> Decomposition {
    let raw = json!({
        "epic": { "title": "Add f0" },
        "subtasks": [{
            "id": "f0",
            "title": "Add f0",
            "description": "Create f0.rs and f1.rs",
            "files": ["f0.rs", "f1.rs"],
            "complexity": 1,
        }],
    });
    Decomposition::parse(&raw.to_string()).unwrap()
}

// ---------------------------------------------------------------------------
// Completion with commits made by the worker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_worker_commits_reach_the_main_line() {
    let tmp = tempfile::tempdir().unwrap();
    let Some((swarm, repo)) = setup(tmp.path()).await else {
        return;
    };
    let init = swarm.init_session("add f0", &repo).await.unwrap();
    let id = init.session_id;
    swarm.validate_plan(id, single_task_plan()).await.unwrap();
    let wt = swarm.create_worktree(id, "f0").await.unwrap();
    swarm.spawn_worker(id, "f0").await.unwrap();

    // The worker commits part of its work and leaves the rest uncommitted.
    std::fs::write(wt.path.join("f0.rs"), "fn f0() {}\n").unwrap();
    git(&wt.path, &["add", "f0.rs"]);
    git(&wt.path, &["commit", "-q", "-m", "worker: f0"]);
    std::fs::write(wt.path.join("f1.rs"), "fn f1() {}\n").unwrap();

    let done = swarm.complete_task(id, "f0", Some("done")).await.unwrap();
    assert!(!done.empty);
    assert!(done.commit.is_some());

    let merged = swarm.merge_all(id).await.unwrap();
    assert_eq!(merged.merged.len(), 1);
    assert!(merged.skipped.is_empty());
    assert!(merged.failed.is_empty());

    let report = swarm.finalize(id).await.unwrap();
    assert!(report.unmerged_tasks.is_empty());
    assert!(report.diff_summary.contains("f0.rs"));
    assert!(repo.join("f0.rs").exists());
    assert!(repo.join("f1.rs").exists());
}

#[tokio::test]
async fn test_untouched_worktree_is_still_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let Some((swarm, repo)) = setup(tmp.path()).await else {
        return;
    };
    let init = swarm.init_session("add f0", &repo).await.unwrap();
    let id = init.session_id;
    swarm.validate_plan(id, single_task_plan()).await.unwrap();
    swarm.create_worktree(id, "f0").await.unwrap();
    swarm.spawn_worker(id, "f0").await.unwrap();

    let done = swarm.complete_task(id, "f0", None).await.unwrap();
    assert!(done.empty);
    assert!(done.commit.is_none());
}
