//! File-backed storage for swarm sessions.
//!
//! # Main types
//!
//! - [`SessionStore`] / [`FileSessionStore`] — Plan, task board and failure records per session.
//! - [`SessionLock`] — Exclusive cross-process lock guarding read-modify-write cycles.
//! - [`Mailbox`] / [`FileMailbox`] — Append-only per-recipient message logs.

/// Per-recipient JSONL message logs.
pub mod mailbox;
/// Lock files.
pub mod lock;
/// Session records.
pub mod store;

pub use lock::SessionLock;
pub use mailbox::{FileMailbox, Mailbox, MessageFilter, PollResult, DEFAULT_READ_LIMIT, POLL_LOOKBACK};
pub use store::{FileSessionStore, SessionStore, Teardown};
