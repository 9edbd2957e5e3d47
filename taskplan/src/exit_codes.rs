//! Stable exit codes for taskplan CLI commands.

/// Command succeeded; for `run`, every task succeeded.
pub const OK: i32 = 0;
/// Invalid config, plan or arguments, a missing pending diff, or other errors.
pub const INVALID: i32 = 1;
/// `taskplan run` finished but at least one task failed or was cancelled.
pub const TASKS_FAILED: i32 = 2;
/// The planner asked a question instead of returning tasks.
pub const NEEDS_CLARIFICATION: i32 = 3;
/// The runtime became unavailable and the session stopped early.
pub const HALTED: i32 = 4;
