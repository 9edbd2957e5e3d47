//! Task-level failure taxonomy.
//!
//! Collaborators return `anyhow::Error`; the executor classifies each failure
//! at the task boundary so the result list can tell throttling, command exits
//! and a dead runtime apart.

use std::time::Duration;

use thiserror::Error;

use crate::core::rate_limit::{is_rate_limited, parse_retry_delay};
use crate::core::types::ErrorKind;
use crate::io::runtime::RuntimeError;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("runtime unavailable")]
    RuntimeUnavailable,
    #[error("path not found: {path}")]
    PathNotFound { path: String },
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("command exited with status {}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Command { code: Option<i32> },
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    /// Build a generation failure, promoting throttling text to `RateLimited`.
    pub fn from_generation_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limited(&message) {
            let retry_after = parse_retry_delay(&message);
            return TaskError::RateLimited {
                message,
                retry_after,
            };
        }
        TaskError::Generation(message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::RuntimeUnavailable => ErrorKind::RuntimeUnavailable,
            TaskError::PathNotFound { .. } => ErrorKind::PathNotFound,
            TaskError::Generation(_) => ErrorKind::Generation,
            TaskError::Command { .. } => ErrorKind::Command,
            TaskError::RateLimited { .. } => ErrorKind::RateLimited,
            TaskError::TimedOut(_) => ErrorKind::TimedOut,
            TaskError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Classify any failure surfaced while running a task.
///
/// Typed errors anywhere in the chain win; otherwise the message is inspected
/// for throttling markers and the failure is attributed to `fallback`.
pub fn classify(err: &anyhow::Error, fallback: ErrorKind) -> ErrorKind {
    for cause in err.chain() {
        if let Some(task_err) = cause.downcast_ref::<TaskError>() {
            return task_err.kind();
        }
        if let Some(runtime_err) = cause.downcast_ref::<RuntimeError>() {
            return match runtime_err {
                RuntimeError::Unavailable => ErrorKind::RuntimeUnavailable,
                RuntimeError::NotFound { .. } => ErrorKind::PathNotFound,
                _ => ErrorKind::Runtime,
            };
        }
    }
    if is_rate_limited(&format!("{err:#}")) {
        return ErrorKind::RateLimited;
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn typed_errors_are_found_through_context() {
        let err = anyhow::Error::new(RuntimeError::Unavailable).context("write src/App.jsx");
        assert_eq!(
            classify(&err, ErrorKind::Runtime),
            ErrorKind::RuntimeUnavailable
        );
    }

    #[test]
    fn throttling_text_is_rate_limited() {
        let err = anyhow!("upstream said 429 Too Many Requests");
        assert_eq!(classify(&err, ErrorKind::Generation), ErrorKind::RateLimited);
    }

    #[test]
    fn unknown_errors_use_fallback() {
        let err: anyhow::Result<()> = Err(anyhow!("boom")).context("generate");
        assert_eq!(
            classify(&err.unwrap_err(), ErrorKind::Generation),
            ErrorKind::Generation
        );
    }

    #[test]
    fn generation_message_promotes_quota_errors() {
        let err = TaskError::from_generation_message("Quota exceeded. Please retry in 7s");
        match err {
            TaskError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn command_error_mentions_code() {
        assert_eq!(
            TaskError::Command { code: Some(2) }.to_string(),
            "command exited with status 2"
        );
    }
}
