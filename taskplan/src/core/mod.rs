//! Deterministic, pure logic shared by the task plan executor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod command;
pub mod diff_store;
pub mod edits;
pub mod file_store;
pub mod path;
pub mod rate_limit;
pub mod response;
pub mod types;
