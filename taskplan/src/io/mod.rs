//! Side-effecting adapters: filesystem, child processes and collaborators.

pub mod agent;
pub mod config;
pub mod console;
pub mod generator;
pub mod init;
pub mod planner;
pub mod process;
pub mod prompt;
pub mod review_store;
pub mod runtime;
pub mod session_log;
