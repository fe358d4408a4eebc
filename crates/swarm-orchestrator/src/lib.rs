//! Orchestration core for a swarm of coding agents working on one repository.
//!
//! A session decomposes a task into subtasks with exclusive file ownership,
//! gives each subtask its own detached worktree, admits workers under a
//! parallelism bound, runs a bounded review loop, merges finished work back
//! in dependency order and finally squashes or rolls everything back.
//!
//! # Main types
//!
//! - [`Swarm`] — Engine exposing every session, task, worktree and messaging operation.
//! - [`PlanValidator`] — File-exclusivity and dependency-DAG checks on a decomposition.
//! - [`AdmissionController`] — Decides which subtasks may start.
//! - [`WorktreeManager`] — Creates, syncs and removes per-task worktrees.
//! - [`Janitor`] — Background sweep of expired sessions and orphaned worktrees.

/// Admission of ready subtasks under the worker bound.
pub mod admission;
/// The `Swarm` engine.
pub mod engine;
/// Background garbage collection.
pub mod janitor;
/// Dependency-ordered merging.
pub mod merge;
/// Decomposition parsing and plan validation.
pub mod planner;
/// Result types of engine operations.
pub mod report;
/// Review verdict application.
pub mod review;
/// Per-task worktrees.
pub mod worktree;

pub use admission::{AdmissionController, AdmissionReport, ReadyTask};
pub use engine::{AbortRequest, Swarm};
pub use janitor::{Janitor, SweepReport};
pub use merge::{MergeFailure, MergeReport, MergedTask, SkippedTask};
pub use planner::{Decomposition, PlanValidator, SubtaskDraft, ValidationReport};
pub use review::{apply_verdict, ReviewOutcome};
pub use worktree::{CleanupFailure, CleanupReport, WorktreeManager};
