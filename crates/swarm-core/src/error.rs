use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`SwarmError`].
pub type SwarmResult<T> = Result<T, SwarmError>;

/// Top-level error type for every swarm operation.
#[derive(Error, Debug)]
pub enum SwarmError {
    /// A session, task or agent that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A malformed or contradictory decomposition or request payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// The request is well-formed but the world is not in a state that allows it.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The task or record is already in a state that conflicts with the request.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// A version-control command failed.
    #[error("vcs error: {0}")]
    Vcs(String),

    /// A storage operation failed for a reason other than plain I/O.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The coarse error categories reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A session, task or record does not exist.
    NotFound,
    /// Input was rejected.
    Validation,
    /// The environment is not in the required state.
    Precondition,
    /// Storage or version control failed.
    Backend,
    /// The operation conflicts with the current task state.
    StateConflict,
}

impl SwarmError {
    /// Category reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwarmError::NotFound(_) => ErrorKind::NotFound,
            SwarmError::Validation(_) | SwarmError::Config(_) => ErrorKind::Validation,
            SwarmError::Precondition(_) => ErrorKind::Precondition,
            SwarmError::StateConflict(_) => ErrorKind::StateConflict,
            SwarmError::Vcs(_)
            | SwarmError::Storage(_)
            | SwarmError::Json(_)
            | SwarmError::Io(_) => ErrorKind::Backend,
        }
    }

    /// `NotFound` for a missing session.
    pub fn session_not_found(session_id: impl std::fmt::Display) -> Self {
        SwarmError::NotFound(format!("session {session_id} not found"))
    }

    /// `NotFound` for a task id absent from the plan.
    pub fn task_not_found(task_id: &str) -> Self {
        SwarmError::NotFound(format!("task {task_id} not found in plan"))
    }
}

/// Structured error body handed back to callers instead of a bare error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl From<&SwarmError> for ErrorPayload {
    fn from(err: &SwarmError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
