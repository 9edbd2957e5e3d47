//! Invocation of external agent commands.
//!
//! An agent is any command that reads a prompt on stdin and prints a reply on
//! stdout. Both the planner and the generator run through [`invoke_agent`].

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::TaskError;
use crate::io::config::AgentConfig;
use crate::io::process::run_command;

/// Tail of stderr quoted in failure messages.
const STDERR_TAIL_BYTES: usize = 2_000;

/// Run the agent with `prompt` on stdin and return its stdout.
///
/// A non-zero exit is an error that quotes the stderr tail so throttling
/// markers survive into error classification.
#[instrument(skip_all, fields(program = %config.command.first().map(String::as_str).unwrap_or(""), timeout_secs = config.timeout_secs))]
pub fn invoke_agent(
    config: &AgentConfig,
    prompt: &str,
    workdir: &Path,
    cancel: &CancellationToken,
) -> Result<String> {
    let (program, args) = config
        .command
        .split_first()
        .ok_or_else(|| anyhow!("agent command is empty"))?;
    info!(prompt_bytes = prompt.len(), "invoking agent");

    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(workdir);
    let output = run_command(
        cmd,
        Some(prompt.as_bytes()),
        config.timeout(),
        config.output_limit_bytes,
        cancel,
    )
    .with_context(|| format!("run agent `{program}`"))?;

    if output.cancelled {
        return Err(TaskError::Cancelled.into());
    }
    if output.timed_out {
        warn!("agent timed out");
        return Err(TaskError::TimedOut(config.timeout()).into());
    }
    if !output.success() {
        let code = output.code;
        warn!(exit_code = ?code, "agent failed");
        let stderr = output.stderr_lossy();
        return Err(anyhow!(
            "agent `{program}` exited with status {code:?}: {}",
            tail(stderr.trim(), STDERR_TAIL_BYTES)
        ));
    }
    if output.stdout_truncated > 0 {
        warn!(
            truncated = output.stdout_truncated,
            "agent reply truncated; JSON may be incomplete"
        );
    }
    debug!(reply_bytes = output.stdout.len(), "agent replied");
    Ok(output.stdout_lossy())
}

/// Last `max_bytes` of `text`, cut on a char boundary.
pub fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello", 3), "llo");
        assert_eq!(tail("héllo", 4), "llo");
    }

    #[cfg(unix)]
    fn sh(script: &str) -> AgentConfig {
        AgentConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            ..AgentConfig::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn agent_reads_prompt_from_stdin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let reply = invoke_agent(
            &sh("tr a-z A-Z"),
            "hello",
            temp.path(),
            &CancellationToken::new(),
        )
        .expect("invoke");
        assert_eq!(reply, "HELLO");
    }

    #[cfg(unix)]
    #[test]
    fn failing_agent_quotes_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = invoke_agent(
            &sh("cat >/dev/null; echo '429 Too Many Requests' >&2; exit 1"),
            "hello",
            temp.path(),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("429 Too Many Requests"));
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_agent_is_a_cancelled_task_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let token = CancellationToken::new();
        token.cancel();
        let err = invoke_agent(&sh("sleep 5"), "", temp.path(), &token).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TaskError>(),
            Some(TaskError::Cancelled)
        ));
    }
}
