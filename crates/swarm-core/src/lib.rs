//! Shared data model, configuration and errors for the swarm orchestrator.
//!
//! Every other swarm crate builds on the types defined here.
//!
//! # Main types
//!
//! - [`SwarmError`] — Unified error enum; [`SwarmError::kind`] maps it to the caller-facing [`ErrorKind`].
//! - [`SwarmConfig`] — Explicit configuration threaded into every component.
//! - [`Plan`] / [`Subtask`] — A session's committed decomposition.
//! - [`TaskState`] / [`TaskBoard`] — Per-subtask lifecycle records.
//! - [`Message`] — A single inter-agent mailbox record.
//! - [`ReviewVerdict`] — Structured reviewer output.

/// Configuration loading and derived paths.
pub mod config;
/// Error types.
pub mod error;
/// Mailbox message records and agent ids.
pub mod message;
/// Plan, subtask and failure records.
pub mod plan;
/// Review verdicts.
pub mod review;
/// Task status state machine and the task board.
pub mod task;

pub use config::SwarmConfig;
pub use error::{ErrorKind, ErrorPayload, SwarmError, SwarmResult};
pub use message::{Message, MessageType};
pub use plan::{Epic, Failure, Plan, Subtask};
pub use review::{ReviewIssue, ReviewVerdict};
pub use task::{TaskBoard, TaskState, TaskStatus};
