use crate::error::{SwarmError, SwarmResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mailbox id of the agent driving admission, merging and teardown.
pub const ORCHESTRATOR: &str = "orchestrator";
/// Mailbox id of the reviewing agent.
pub const REVIEWER: &str = "reviewer";

/// Mailbox id of the worker bound to `task_id`.
pub fn worker_id(task_id: &str) -> String {
    format!("worker-{task_id}")
}

/// Whether `id` can be used as a single path component: letters, digits,
/// `-`, `_` and `.`, and neither `.` nor `..`.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Agent ids double as file names, so keep them to a safe alphabet.
pub fn validate_agent_id(agent_id: &str) -> SwarmResult<()> {
    if is_safe_id(agent_id) {
        Ok(())
    } else {
        Err(SwarmError::Validation(format!(
            "invalid agent id '{agent_id}': use letters, digits, '-', '_' or '.'"
        )))
    }
}

/// The kind of signal a [`Message`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Work is under way.
    Progress,
    /// A task finished.
    Complete,
    /// Work cannot continue.
    Blocker,
    /// An agent needs an answer.
    Question,
    /// A reviewer asked for changes.
    Feedback,
    /// A reviewer accepted the work.
    Approved,
    /// A worker was handed its brief.
    Spawn,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageType::Progress => "progress",
            MessageType::Complete => "complete",
            MessageType::Blocker => "blocker",
            MessageType::Question => "question",
            MessageType::Feedback => "feedback",
            MessageType::Approved => "approved",
            MessageType::Spawn => "spawn",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MessageType {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "progress" => Ok(MessageType::Progress),
            "complete" => Ok(MessageType::Complete),
            "blocker" => Ok(MessageType::Blocker),
            "question" => Ok(MessageType::Question),
            "feedback" => Ok(MessageType::Feedback),
            "approved" => Ok(MessageType::Approved),
            "spawn" => Ok(MessageType::Spawn),
            other => Err(SwarmError::Validation(format!(
                "unknown message type '{other}'"
            ))),
        }
    }
}

/// An immutable unit of inter-agent communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// Sender agent id.
    pub from: String,
    /// Recipient agent id; also selects the mailbox log it is appended to.
    pub to: String,
    /// Signal carried by the message.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Free-text body.
    #[serde(rename = "message")]
    pub body: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Message stamped with a fresh id and the current time.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageType,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            kind,
            body: body.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_names() {
        let msg = Message::new("worker-task-1", ORCHESTRATOR, MessageType::Blocker, "stuck")
            .with_data(serde_json::json!({"file": "src/a.rs"}));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "blocker");
        assert_eq!(json["message"], "stuck");
        assert_eq!(json["from"], "worker-task-1");
        assert_eq!(json["data"]["file"], "src/a.rs");
    }

    #[test]
    fn test_message_without_data_omits_field() {
        let msg = Message::new("a", "b", MessageType::Progress, "50%");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("\"data\""));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_message_type_parse() {
        assert_eq!("approved".parse::<MessageType>().unwrap(), MessageType::Approved);
        assert_eq!("SPAWN".parse::<MessageType>().unwrap(), MessageType::Spawn);
        assert!("shout".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_agent_id_validation() {
        assert!(validate_agent_id("worker-task-1").is_ok());
        assert!(validate_agent_id("orchestrator").is_ok());
        assert!(validate_agent_id("../etc").is_err());
        assert!(validate_agent_id("a/b").is_err());
        assert!(validate_agent_id("..").is_err());
        assert!(validate_agent_id("").is_err());
    }

    #[test]
    fn test_worker_id() {
        assert_eq!(worker_id("task-3"), "worker-task-3");
    }
}
