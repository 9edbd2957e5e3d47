//! Generation collaborator: produces new file content for a file task.
//!
//! The [`Generator`] trait decouples the executor from the backend. The
//! command-backed implementation renders a prompt, runs the configured agent
//! and turns its JSON reply into content; [`RetryingGenerator`] adds back-off
//! and throttling waits around any generator.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::edits::{Edit, apply_edits};
use crate::core::rate_limit::{
    DEFAULT_RETRY_DELAY, backoff_delay, is_rate_limited, parse_retry_delay,
};
use crate::core::response::extract_json;
use crate::core::types::{ChangeNote, FileAction};
use crate::error::TaskError;
use crate::io::agent::invoke_agent;
use crate::io::config::{AgentConfig, RetryConfig};
use crate::io::process::sleep_or_cancel;
use crate::io::prompt::render_generation_prompt;

/// Input to one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub path: String,
    pub action: FileAction,
    pub description: String,
    /// `None` when the file does not exist yet.
    pub current_content: Option<String>,
    /// Recent change notes from the same session, oldest first.
    pub context: Vec<ChangeNote>,
}

/// Reply from the generation collaborator.
///
/// Either `{success, path, content}` or `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResponse {
    pub success: bool,
    pub path: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl GenerationResponse {
    pub fn ok(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            success: true,
            path: path.into(),
            content: Some(content.into()),
            summary: None,
            error: None,
        }
    }

    pub fn failure(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            path: path.into(),
            content: None,
            summary: None,
            error: Some(error.into()),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        if !summary.trim().is_empty() {
            self.summary = Some(summary);
        }
        self
    }
}

/// Abstraction over content generation backends.
pub trait Generator {
    /// Produce content for `request`. Transport problems are `Err`; a
    /// well-formed refusal is `Ok` with `success == false`.
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse> {
        (**self).generate(request, cancel)
    }
}

/// Generator backed by an external agent command.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    config: AgentConfig,
    workdir: PathBuf,
}

impl CommandGenerator {
    pub fn new(config: AgentConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workdir: workdir.into(),
        }
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(path = %request.path, action = request.action.as_str()))]
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse> {
        let prompt = render_generation_prompt(request)?;
        let reply = invoke_agent(&self.config, &prompt, &self.workdir, cancel)?;
        let value = extract_json(&reply)?;
        let reply: GenerationReply =
            serde_json::from_value(value).context("decode generation reply")?;
        Ok(reply.into_response(request))
    }
}

#[derive(Debug, Deserialize)]
struct GenerationReply {
    #[serde(default)]
    file_content: Option<String>,
    #[serde(default)]
    changes: Option<Vec<Edit>>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl GenerationReply {
    fn into_response(self, request: &GenerationRequest) -> GenerationResponse {
        let path = request.path.as_str();
        if let Some(error) = self.error.filter(|e| !e.trim().is_empty()) {
            return GenerationResponse::failure(path, error);
        }
        let summary = self.summary.unwrap_or_default();

        if let Some(content) = self.file_content {
            // Empty is a valid new file (`.gitkeep`); for an existing file it
            // would wipe the content, so it counts as a non-answer.
            if content.is_empty() && request.current_content.is_some() {
                return GenerationResponse::failure(path, "no file content provided");
            }
            return GenerationResponse::ok(path, content).with_summary(summary);
        }

        let Some(changes) = self.changes else {
            return GenerationResponse::failure(path, "reply has neither file_content nor changes");
        };
        if changes.is_empty() {
            return GenerationResponse::failure(path, "no changes provided");
        }
        let current = request.current_content.as_deref().unwrap_or_default();
        let outcome = apply_edits(current, &changes);
        if outcome.applied == 0 {
            return GenerationResponse::failure(
                path,
                format!(
                    "none of the {} changes matched the current content",
                    changes.len()
                ),
            );
        }
        if !outcome.failed.is_empty() {
            warn!(
                path,
                failed = ?outcome.failed,
                applied = outcome.applied,
                "some changes did not match and were skipped"
            );
        }
        GenerationResponse::ok(path, outcome.content).with_summary(summary)
    }
}

/// Wraps a generator with retries.
///
/// Transport errors back off exponentially. Throttling (in an error or in a
/// refusal) waits the server-suggested delay, capped at the configured max.
/// Other refusals are returned as-is.
#[derive(Debug, Clone)]
pub struct RetryingGenerator<G> {
    inner: G,
    retry: RetryConfig,
}

impl<G: Generator> RetryingGenerator<G> {
    pub fn new(inner: G, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    fn throttle_delay(&self, message: &str) -> std::time::Duration {
        parse_retry_delay(message)
            .unwrap_or(DEFAULT_RETRY_DELAY)
            .min(self.retry.max_delay())
    }
}

impl<G: Generator> Generator for RetryingGenerator<G> {
    #[instrument(skip_all, fields(path = %request.path, max_retries = self.retry.max_retries))]
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(TaskError::Cancelled.into());
            }
            let can_retry = attempt < self.retry.max_retries;
            let delay = match self.inner.generate(request, cancel) {
                Ok(response) if response.success => return Ok(response),
                Ok(response) => {
                    let message = response.error.as_deref().unwrap_or_default();
                    if !can_retry || !is_rate_limited(message) {
                        return Ok(response);
                    }
                    self.throttle_delay(message)
                }
                Err(err) => {
                    if !can_retry
                        || matches!(
                            err.downcast_ref::<TaskError>(),
                            Some(TaskError::Cancelled)
                        )
                    {
                        return Err(err);
                    }
                    let message = format!("{err:#}");
                    if is_rate_limited(&message) {
                        self.throttle_delay(&message)
                    } else {
                        debug!(err = %message, "generation attempt failed");
                        backoff_delay(self.retry.base_delay(), attempt, self.retry.max_delay())
                    }
                }
            };
            attempt += 1;
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying generation"
            );
            if sleep_or_cancel(delay, cancel) {
                return Err(TaskError::Cancelled.into());
            }
        }
    }
}
