//! Task plan executor with review-gated file changes.
//!
//! A planner turns a request into an ordered task plan; the executor runs it
//! one task at a time against a sandboxed runtime. New files are written
//! straight through, while edits to existing files wait as pending diffs until
//! they are accepted or rejected. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure logic (stores, path and command heuristics, edit
//!   application). No I/O, fully testable in isolation.
//! - **[`io`]**: Side effects (runtime adapter, agent processes, config,
//!   persisted review state and session logs).
//!
//! Orchestration modules ([`executor`], [`reconcile`], [`planning`], [`run`]) combine
//! both around a [`workspace::Workspace`] to implement the CLI commands.

pub mod core;
pub mod error;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod planning;
pub mod reconcile;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workspace;
