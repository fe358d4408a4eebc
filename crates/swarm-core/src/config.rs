//! Process-wide settings, threaded explicitly into every component.

use crate::error::{SwarmError, SwarmResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration shared by the store, mailbox, worktree manager and engine.
///
/// Every field has a default so a partial `swarm.toml` is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Directory holding `sessions/` and `worktrees/`.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Admission bound: tasks allowed in `running` or `reviewing` at once.
    #[serde(default = "default_max_parallel_workers")]
    pub max_parallel_workers: usize,
    /// Needs-changes verdicts allowed before a task fails permanently.
    #[serde(default = "default_max_review_attempts")]
    pub max_review_attempts: u32,
    /// Sessions untouched for longer than this are garbage collected.
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: u64,
    /// How long to wait for the per-session lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Lock files older than this are considered abandoned and broken.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

fn default_root_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".swarm"))
        .unwrap_or_else(|| PathBuf::from(".swarm"))
}
fn default_max_parallel_workers() -> usize {
    3
}
fn default_max_review_attempts() -> u32 {
    3
}
fn default_session_ttl_days() -> u64 {
    7
}
fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_stale_lock_secs() -> u64 {
    60
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            max_parallel_workers: default_max_parallel_workers(),
            max_review_attempts: default_max_review_attempts(),
            session_ttl_days: default_session_ttl_days(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}

impl SwarmConfig {
    /// Defaults rooted at `root_dir`. Handy for tests and embedders.
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Cap on running or reviewing tasks.
    pub fn with_max_parallel_workers(mut self, max: usize) -> Self {
        self.max_parallel_workers = max;
        self
    }

    /// Rejected reviews allowed before a task fails.
    pub fn with_max_review_attempts(mut self, max: u32) -> Self {
        self.max_review_attempts = max;
        self
    }

    /// Days an untouched session survives garbage collection.
    pub fn with_session_ttl_days(mut self, days: u64) -> Self {
        self.session_ttl_days = days;
        self
    }

    /// Parse a TOML document and validate it.
    pub fn from_toml_str(raw: &str) -> SwarmResult<Self> {
        let config: SwarmConfig = toml::from_str(raw)
            .map_err(|e| SwarmError::Config(format!("invalid swarm config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or fall back to defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> SwarmResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SwarmError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> SwarmResult<()> {
        if self.max_parallel_workers == 0 {
            return Err(SwarmError::Config(
                "max_parallel_workers must be at least 1".into(),
            ));
        }
        if self.max_review_attempts == 0 {
            return Err(SwarmError::Config(
                "max_review_attempts must be at least 1".into(),
            ));
        }
        if self.root_dir.as_os_str().is_empty() {
            return Err(SwarmError::Config("root_dir must not be empty".into()));
        }
        Ok(())
    }

    /// Directory holding one subdirectory per session.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root_dir.join("sessions")
    }

    /// Directory holding every task worktree.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.root_dir.join("worktrees")
    }

    /// Deterministic worktree location for a task of a given project.
    pub fn worktree_path(&self, project_name: &str, task_id: &str) -> PathBuf {
        self.worktrees_dir()
            .join(format!("{project_name}-{task_id}"))
    }

    /// Session time-to-live.
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.session_ttl_days as i64)
    }

    /// How long to wait for a session lock.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Age after which a lock file is considered abandoned.
    pub fn stale_lock_age(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SwarmConfig::default();
        assert_eq!(config.max_parallel_workers, 3);
        assert_eq!(config.max_review_attempts, 3);
        assert_eq!(config.session_ttl_days, 7);
        assert!(config.root_dir.ends_with(".swarm"));
    }

    #[test]
    fn test_partial_toml() {
        let config = SwarmConfig::from_toml_str(
            r#"
            root_dir = "/tmp/swarm-test"
            max_parallel_workers = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/tmp/swarm-test"));
        assert_eq!(config.max_parallel_workers, 5);
        assert_eq!(config.max_review_attempts, 3);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = SwarmConfig::from_toml_str("max_parallel_workers = 0").unwrap_err();
        assert!(matches!(err, SwarmError::Config(_)));
    }

    #[test]
    fn test_worktree_path_layout() {
        let config = SwarmConfig::with_root("/data/swarm");
        assert_eq!(
            config.worktree_path("webapp", "task-2"),
            PathBuf::from("/data/swarm/worktrees/webapp-task-2")
        );
        assert_eq!(config.sessions_dir(), PathBuf::from("/data/swarm/sessions"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SwarmConfig::load_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, SwarmConfig::default());
    }
}
