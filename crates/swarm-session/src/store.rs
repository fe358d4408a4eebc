use crate::lock::SessionLock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use swarm_core::{Failure, Plan, SwarmConfig, SwarmError, SwarmResult, TaskBoard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PLAN_FILE: &str = "plan.json";
const TASKS_FILE: &str = "tasks.json";
const FAILURE_FILE: &str = "failure.json";
const LOCK_FILE: &str = ".lock";
pub(crate) const MESSAGES_DIR: &str = "messages";

/// How much of a session to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Remove the whole session directory.
    All,
    /// Keep the plan and failure records for post-mortem inspection.
    KeepPostMortem,
}

/// Persistence of per-session plan, task board and failure records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create the session directory with `plan` and an empty task board.
    async fn create(&self, plan: &Plan) -> SwarmResult<()>;
    /// Plan of session `id`, or `None` if there is none.
    async fn read_plan(&self, id: Uuid) -> SwarmResult<Option<Plan>>;
    /// Replace the plan record.
    async fn write_plan(&self, plan: &Plan) -> SwarmResult<()>;
    /// A missing board reads as empty at revision 0.
    async fn read_tasks(&self, id: Uuid) -> SwarmResult<TaskBoard>;
    /// Compare-and-set write. Fails with `StateConflict` if `board.revision`
    /// is not the stored revision; returns the new revision otherwise.
    async fn write_tasks(&self, id: Uuid, board: &TaskBoard) -> SwarmResult<u64>;
    /// Failure record of an aborted session.
    async fn read_failure(&self, id: Uuid) -> SwarmResult<Option<Failure>>;
    /// Write the failure record.
    async fn write_failure(&self, id: Uuid, failure: &Failure) -> SwarmResult<()>;
    /// Remove the session's records according to `teardown`.
    async fn delete(&self, id: Uuid, teardown: Teardown) -> SwarmResult<()>;
    /// Ids of every stored session.
    async fn list(&self) -> SwarmResult<Vec<Uuid>>;
    /// Most recent modification time of anything stored for the session.
    async fn last_touched(&self, id: Uuid) -> SwarmResult<Option<DateTime<Utc>>>;
    /// Take the exclusive per-session lock.
    async fn lock(&self, id: Uuid) -> SwarmResult<SessionLock>;

    /// A session bound to `project_path` whose plan exists and which has no
    /// failure record.
    async fn find_active(&self, project_path: &Path) -> SwarmResult<Option<Uuid>> {
        for id in self.list().await? {
            let plan = match self.read_plan(id).await {
                Ok(Some(plan)) => plan,
                Ok(None) => continue,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Skipping unreadable session");
                    continue;
                }
            };
            if plan.project_path == project_path && self.read_failure(id).await?.is_none() {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Delete every session untouched for longer than `ttl` as of `now`.
    /// Individual failures are logged and skipped.
    async fn collect_garbage(
        &self,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> SwarmResult<Vec<Uuid>> {
        let mut deleted = Vec::new();
        for id in self.list().await? {
            let touched = match self.last_touched(id).await {
                Ok(Some(t)) => t,
                Ok(None) => continue,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Cannot stat session");
                    continue;
                }
            };
            if now - touched <= ttl {
                continue;
            }
            match self.delete(id, Teardown::All).await {
                Ok(()) => {
                    info!(session_id = %id, last_touched = %touched, "Collected stale session");
                    deleted.push(id);
                }
                Err(e) => warn!(session_id = %id, error = %e, "Failed to collect session"),
            }
        }
        Ok(deleted)
    }
}

/// Session store keeping one directory of JSON records per session.
pub struct FileSessionStore {
    dir: PathBuf,
    lock_timeout: Duration,
    stale_lock_age: Duration,
}

impl FileSessionStore {
    /// Store under the configured sessions directory, created if missing.
    pub async fn new(config: &SwarmConfig) -> SwarmResult<Self> {
        let dir = config.sessions_dir();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            lock_timeout: config.lock_timeout(),
            stale_lock_age: config.stale_lock_age(),
        })
    }

    /// Directory holding the records of session `id`.
    pub fn session_dir(&self, id: Uuid) -> PathBuf {
        self.dir.join(id.to_string())
    }

    fn record_path(&self, id: Uuid, file: &str) -> PathBuf {
        self.session_dir(id).join(file)
    }

    async fn read_record<T: DeserializeOwned>(&self, path: &Path) -> SwarmResult<Option<T>> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_str(&data).map_err(|e| {
            SwarmError::Storage(format!("failed to parse {}: {e}", path.display()))
        })?;
        Ok(Some(record))
    }

    async fn require_session(&self, id: Uuid) -> SwarmResult<()> {
        if tokio::fs::try_exists(self.session_dir(id)).await? {
            Ok(())
        } else {
            Err(SwarmError::session_not_found(id))
        }
    }
}

/// Write `value` next to `path` and rename it into place.
async fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> SwarmResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, plan: &Plan) -> SwarmResult<()> {
        let dir = self.session_dir(plan.session_id);
        tokio::fs::create_dir_all(dir.join(MESSAGES_DIR)).await?;
        write_atomic(&dir.join(PLAN_FILE), plan).await?;
        write_atomic(&dir.join(TASKS_FILE), &TaskBoard::default()).await?;
        debug!(session_id = %plan.session_id, dir = %dir.display(), "Session created");
        Ok(())
    }

    async fn read_plan(&self, id: Uuid) -> SwarmResult<Option<Plan>> {
        self.read_record(&self.record_path(id, PLAN_FILE)).await
    }

    async fn write_plan(&self, plan: &Plan) -> SwarmResult<()> {
        self.require_session(plan.session_id).await?;
        write_atomic(&self.record_path(plan.session_id, PLAN_FILE), plan).await
    }

    async fn read_tasks(&self, id: Uuid) -> SwarmResult<TaskBoard> {
        Ok(self
            .read_record(&self.record_path(id, TASKS_FILE))
            .await?
            .unwrap_or_default())
    }

    async fn write_tasks(&self, id: Uuid, board: &TaskBoard) -> SwarmResult<u64> {
        self.require_session(id).await?;
        let current = self.read_tasks(id).await?;
        if current.revision != board.revision {
            return Err(SwarmError::StateConflict(format!(
                "task board of session {id} changed (revision {} on disk, {} in hand)",
                current.revision, board.revision
            )));
        }
        let mut next = board.clone();
        next.revision += 1;
        write_atomic(&self.record_path(id, TASKS_FILE), &next).await?;
        Ok(next.revision)
    }

    async fn read_failure(&self, id: Uuid) -> SwarmResult<Option<Failure>> {
        self.read_record(&self.record_path(id, FAILURE_FILE)).await
    }

    async fn write_failure(&self, id: Uuid, failure: &Failure) -> SwarmResult<()> {
        self.require_session(id).await?;
        write_atomic(&self.record_path(id, FAILURE_FILE), failure).await
    }

    async fn delete(&self, id: Uuid, teardown: Teardown) -> SwarmResult<()> {
        let dir = self.session_dir(id);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(());
        }
        match teardown {
            Teardown::All => tokio::fs::remove_dir_all(&dir).await?,
            Teardown::KeepPostMortem => {
                let mut entries = tokio::fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name();
                    // The lock is released by its guard.
                    if name == PLAN_FILE || name == FAILURE_FILE || name == LOCK_FILE {
                        continue;
                    }
                    if entry.file_type().await?.is_dir() {
                        tokio::fs::remove_dir_all(entry.path()).await?;
                    } else {
                        tokio::fs::remove_file(entry.path()).await?;
                    }
                }
            }
        }
        debug!(session_id = %id, ?teardown, "Session artifacts deleted");
        Ok(())
    }

    async fn list(&self) -> SwarmResult<Vec<Uuid>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(id) = Uuid::parse_str(name) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn last_touched(&self, id: Uuid) -> SwarmResult<Option<DateTime<Utc>>> {
        let dir = self.session_dir(id);
        let mut latest = match tokio::fs::metadata(&dir).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut pending = vec![dir];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                }
                let modified = meta.modified()?;
                if modified > latest {
                    latest = modified;
                }
            }
        }
        Ok(Some(DateTime::<Utc>::from(latest)))
    }

    async fn lock(&self, id: Uuid) -> SwarmResult<SessionLock> {
        self.require_session(id).await?;
        SessionLock::acquire(
            self.record_path(id, LOCK_FILE),
            self.lock_timeout,
            self.stale_lock_age,
        )
        .await
    }
}
