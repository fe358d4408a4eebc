use crate::store::MESSAGES_DIR;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::message::validate_agent_id;
use swarm_core::{Message, MessageType, SwarmConfig, SwarmResult};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// Default number of records returned by [`Mailbox::read`].
pub const DEFAULT_READ_LIMIT: usize = 10;
/// How far back [`Mailbox::poll`] looks.
pub const POLL_LOOKBACK: usize = 20;

const REPOLL_INTERVAL: Duration = Duration::from_millis(250);

/// Selects messages in a poll or wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFilter {
    /// Message type to match.
    pub kind: MessageType,
    /// Only messages from this sender.
    pub from: Option<String>,
    /// Only messages strictly newer than this.
    pub since: Option<DateTime<Utc>>,
}

impl MessageFilter {
    /// Filter on `kind` alone.
    pub fn kind(kind: MessageType) -> Self {
        Self {
            kind,
            from: None,
            since: None,
        }
    }

    /// Also require the sender to be `from`.
    pub fn from_agent(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Also require messages newer than `since`.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Whether `msg` passes the filter.
    pub fn matches(&self, msg: &Message) -> bool {
        msg.kind == self.kind
            && self.from.as_deref().map_or(true, |f| msg.from == f)
            && self.since.map_or(true, |s| msg.timestamp > s)
    }
}

/// Matches found by a poll or wait.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    /// At least one message matched.
    pub found: bool,
    /// Number of matches.
    pub count: usize,
    /// Newest match.
    pub latest: Option<Message>,
    /// Every match, oldest first.
    pub messages: Vec<Message>,
}

impl PollResult {
    fn from_matches(messages: Vec<Message>) -> Self {
        Self {
            found: !messages.is_empty(),
            count: messages.len(),
            latest: messages.last().cloned(),
            messages,
        }
    }
}

/// Append-only, per-recipient message log.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Append `msg` to the log of `msg.to`.
    async fn send(&self, session_id: Uuid, msg: &Message) -> SwarmResult<()>;

    /// The most recent `limit` messages for `agent`, oldest first.
    async fn read(&self, session_id: Uuid, agent: &str, limit: usize) -> SwarmResult<Vec<Message>>;

    /// Non-blocking scan of the last [`POLL_LOOKBACK`] messages.
    async fn poll(
        &self,
        session_id: Uuid,
        agent: &str,
        filter: &MessageFilter,
    ) -> SwarmResult<PollResult> {
        let window = self.read(session_id, agent, POLL_LOOKBACK).await?;
        Ok(PollResult::from_matches(
            window.into_iter().filter(|m| filter.matches(m)).collect(),
        ))
    }

    /// Poll until something matches or `timeout` elapses. A timeout yields an
    /// empty result, not an error.
    async fn wait(
        &self,
        session_id: Uuid,
        agent: &str,
        filter: &MessageFilter,
        timeout: Duration,
    ) -> SwarmResult<PollResult>;
}

type Waiters = Mutex<HashMap<(Uuid, String), Arc<Notify>>>;

/// Mailbox storing one JSONL file per recipient under the session directory.
pub struct FileMailbox {
    sessions_dir: PathBuf,
    waiters: Waiters,
}

/// One in-flight `wait`. The recipient's notifier is dropped from the map
/// together with its last waiter.
struct Waiter<'a> {
    waiters: &'a Waiters,
    key: (Uuid, String),
    notify: Arc<Notify>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let mut waiters = self.waiters.lock();
        // The map holds one reference and this waiter the other.
        if Arc::strong_count(&self.notify) <= 2 {
            waiters.remove(&self.key);
        }
    }
}

impl FileMailbox {
    /// Mailbox storing logs under the configured sessions directory.
    pub fn new(config: &SwarmConfig) -> Self {
        Self {
            sessions_dir: config.sessions_dir(),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    fn log_path(&self, session_id: Uuid, agent: &str) -> PathBuf {
        self.sessions_dir
            .join(session_id.to_string())
            .join(MESSAGES_DIR)
            .join(format!("{agent}.jsonl"))
    }

    fn register(&self, session_id: Uuid, agent: &str) -> Waiter<'_> {
        let key = (session_id, agent.to_string());
        let notify = self
            .waiters
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        Waiter {
            waiters: &self.waiters,
            key,
            notify,
        }
    }
}

#[async_trait]
impl Mailbox for FileMailbox {
    async fn send(&self, session_id: Uuid, msg: &Message) -> SwarmResult<()> {
        validate_agent_id(&msg.to)?;
        validate_agent_id(&msg.from)?;
        let path = self.log_path(session_id, &msg.to);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(
            session_id = %session_id,
            from = %msg.from,
            to = %msg.to,
            kind = %msg.kind,
            "Message appended"
        );

        // Notified under the lock so reference counts only change while it is held.
        if let Some(notify) = self.waiters.lock().get(&(session_id, msg.to.clone())) {
            notify.notify_waiters();
        }
        Ok(())
    }

    async fn read(&self, session_id: Uuid, agent: &str, limit: usize) -> SwarmResult<Vec<Message>> {
        validate_agent_id(agent)?;
        let data = match tokio::fs::read_to_string(self.log_path(session_id, agent)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut messages: Vec<Message> = data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    async fn wait(
        &self,
        session_id: Uuid,
        agent: &str,
        filter: &MessageFilter,
        timeout: Duration,
    ) -> SwarmResult<PollResult> {
        let waiter = self.register(session_id, agent);
        let notify = &waiter.notify;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before polling so a send in between is not missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let result = self.poll(session_id, agent, filter).await?;
            if result.found {
                return Ok(result);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(PollResult::default());
            }
            let nap = (deadline - now).min(REPOLL_INTERVAL);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}
