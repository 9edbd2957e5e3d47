//! Task Plan Executor: drives a plan one task at a time.
//!
//! Tasks run strictly in plan order. Each task ends with exactly one
//! [`TaskResult`] at its position, whatever happens to it. New files are
//! written through to the runtime and the file store; edits to existing files
//! become pending diffs. The session snapshot tracks generated content so later
//! tasks see earlier ones even before review.

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::command::{AutoConfirmRule, default_auto_confirm_rules, resolve_command};
use crate::core::path::{PathRules, normalize_task_path};
use crate::core::rate_limit::{parse_retry_delay, rate_limit_hint};
use crate::core::types::{
    ChangeNote, CommandTask, ErrorKind, FileAction, FileEffect, FileTask, Task, TaskResult,
};
use crate::error::{TaskError, classify};
use crate::io::config::TaskplanConfig;
use crate::io::console::{ConsoleLine, ConsoleSink};
use crate::io::generator::{GenerationRequest, Generator};
use crate::io::process::{OutputChunk, POLL_INTERVAL, sleep_or_cancel};
use crate::io::runtime::{ProcessHandle, Runtime, RuntimeError};
use crate::workspace::Workspace;

/// How long to keep reading output after a command exits.
const OUTPUT_GRACE: Duration = Duration::from_millis(200);

/// Lifecycle of one plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    /// The runtime became unavailable; remaining tasks were skipped.
    Halted,
}

/// Executor settings, usually derived from [`TaskplanConfig`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub path_rules: PathRules,
    pub auto_confirm: Vec<AutoConfirmRule>,
    pub command_timeout: Duration,
    pub command_output_limit_bytes: usize,
    /// Zero means yield instead of sleeping.
    pub inter_task_pause: Duration,
    pub context_window: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            path_rules: PathRules::default(),
            auto_confirm: default_auto_confirm_rules(),
            command_timeout: Duration::from_secs(10 * 60),
            command_output_limit_bytes: 100_000,
            inter_task_pause: Duration::from_millis(50),
            context_window: 5,
        }
    }
}

impl From<&TaskplanConfig> for ExecutorConfig {
    fn from(cfg: &TaskplanConfig) -> Self {
        Self {
            path_rules: cfg.paths.rules(),
            auto_confirm: cfg.auto_confirm.clone(),
            command_timeout: cfg.command_timeout(),
            command_output_limit_bytes: cfg.command_output_limit_bytes,
            inter_task_pause: cfg.inter_task_pause(),
            context_window: cfg.context_window,
        }
    }
}

/// One run of a task plan and everything it accumulated.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    pub id: String,
    pub tasks: Vec<Task>,
    /// One entry per finished task, in task order.
    pub results: Vec<TaskResult>,
    pub state: SessionState,
    /// Path → content as this run has shaped it, pending diffs included.
    pub snapshot: BTreeMap<String, String>,
    /// Notes for successful file tasks, oldest first.
    pub changes: Vec<ChangeNote>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Success tally of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub succeeded: usize,
    pub total: usize,
    pub state: SessionState,
}

impl SessionSummary {
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

impl ExecutionSession {
    pub fn new(id: impl Into<String>, tasks: Vec<Task>, snapshot: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            tasks,
            results: Vec::new(),
            state: SessionState::Idle,
            snapshot,
            changes: Vec::new(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Index of the next task to run.
    pub fn cursor(&self) -> usize {
        self.results.len()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            succeeded: self.results.iter().filter(|r| r.success).count(),
            total: self.tasks.len(),
            state: self.state,
        }
    }

    fn recent_changes(&self, window: usize) -> Vec<ChangeNote> {
        let skip = self.changes.len().saturating_sub(window);
        self.changes[skip..].to_vec()
    }

    fn fill_remaining(&mut self, kind: ErrorKind, reason: &str) {
        while self.results.len() < self.tasks.len() {
            self.results.push(TaskResult::failed(kind, reason));
        }
    }
}

/// Everything the executor borrows for a run.
pub struct ExecutorDeps<'a, R, G, C> {
    pub workspace: &'a mut Workspace<R>,
    pub generator: &'a G,
    pub console: &'a mut C,
    pub config: &'a ExecutorConfig,
}

/// Run every task of `session` in order.
///
/// Never fails as a whole: per-task errors become failed results. Only a
/// runtime that is unavailable halts the loop early, and cancellation stops it
/// at the next checkpoint; in both cases the remaining tasks still get results.
#[instrument(skip_all, fields(session = %session.id, tasks = session.tasks.len()))]
pub fn run_session<R, G, C>(
    session: &mut ExecutionSession,
    deps: ExecutorDeps<'_, R, G, C>,
    cancel: &CancellationToken,
) -> SessionSummary
where
    R: Runtime,
    G: Generator,
    C: ConsoleSink,
{
    let ExecutorDeps {
        workspace,
        generator,
        console,
        config,
    } = deps;
    session.state = SessionState::Running;
    session.started_at = Some(Utc::now());
    let total = session.tasks.len();
    info!(total, "session started");

    while session.cursor() < total {
        let index = session.cursor();
        if cancel.is_cancelled() {
            info!(index, "session cancelled");
            session.fill_remaining(ErrorKind::Cancelled, "cancelled before start");
            session.state = SessionState::Cancelled;
            break;
        }

        let task = session.tasks[index].clone();
        console.emit(ConsoleLine::TaskStarted {
            index,
            total,
            label: task.label(),
        });
        let result = match &task {
            Task::File(file_task) => {
                run_file_task(session, workspace, generator, config, file_task, cancel)
            }
            Task::Command(command_task) => {
                run_command_task(workspace, console, config, command_task, cancel)
            }
        };
        report(console, index, total, &task, &result);
        let kind = result.error_kind;
        session.results.push(result);

        if kind == Some(ErrorKind::Cancelled) {
            session.fill_remaining(ErrorKind::Cancelled, "cancelled before start");
            session.state = SessionState::Cancelled;
            break;
        }
        if kind.is_some_and(|k| k.is_session_fatal()) {
            warn!(index, "runtime unavailable; halting session");
            session.fill_remaining(ErrorKind::Skipped, "skipped: session halted");
            session.state = SessionState::Halted;
            console.emit(ConsoleLine::Notice(
                "runtime unavailable; remaining tasks skipped".to_string(),
            ));
            break;
        }

        if session.cursor() < total {
            pause(config.inter_task_pause, cancel);
        }
    }

    if session.state == SessionState::Running {
        session.state = SessionState::Completed;
    }
    session.ended_at = Some(Utc::now());
    let summary = session.summary();
    info!(
        succeeded = summary.succeeded,
        total = summary.total,
        state = ?summary.state,
        "session finished"
    );
    console.emit(ConsoleLine::Summary {
        succeeded: summary.succeeded,
        total: summary.total,
    });
    summary
}

/// Hint shown next to a failed result, if its kind has one.
pub fn failure_hint(result: &TaskResult) -> Option<String> {
    match result.error_kind? {
        ErrorKind::RateLimited => Some(rate_limit_hint(
            result.error.as_deref().and_then(parse_retry_delay),
        )),
        ErrorKind::RuntimeUnavailable => Some("boot the runtime and run the plan again".to_string()),
        _ => None,
    }
}

fn report<C: ConsoleSink>(
    console: &mut C,
    index: usize,
    total: usize,
    task: &Task,
    result: &TaskResult,
) {
    if result.success {
        let detail = match (result.effect, result.exit_code) {
            (Some(FileEffect::PendingReview), _) => Some("pending review".to_string()),
            (Some(FileEffect::Unchanged), _) => Some("unchanged".to_string()),
            (Some(FileEffect::Created), _) => Some("created".to_string()),
            (Some(FileEffect::Deleted), _) => Some("deleted".to_string()),
            (None, Some(code)) => Some(format!("exit {code}")),
            (None, None) => None,
        };
        let label = match (&result.path, task) {
            (Some(path), Task::File(file_task)) => format!("{} {path}", file_task.action.as_str()),
            _ => task.label(),
        };
        console.emit(ConsoleLine::TaskSucceeded {
            index,
            total,
            label,
            detail,
        });
    } else {
        console.emit(ConsoleLine::TaskFailed {
            index,
            total,
            description: task.description().to_string(),
            error: result.error.clone().unwrap_or_default(),
            hint: failure_hint(result),
        });
    }
}

fn pause(duration: Duration, cancel: &CancellationToken) {
    if duration.is_zero() {
        thread::yield_now();
    } else {
        sleep_or_cancel(duration, cancel);
    }
}

fn run_file_task<R: Runtime, G: Generator>(
    session: &mut ExecutionSession,
    workspace: &mut Workspace<R>,
    generator: &G,
    config: &ExecutorConfig,
    task: &FileTask,
    cancel: &CancellationToken,
) -> TaskResult {
    let path = normalize_task_path(&task.path, &config.path_rules);
    if path != task.path {
        debug!(from = %task.path, to = %path, "normalized task path");
    }
    let outcome = if path.is_empty() {
        Err(anyhow::Error::new(RuntimeError::InvalidPath {
            path: task.path.clone(),
        }))
    } else if task.action == FileAction::Delete {
        delete_file(session, workspace, &path)
    } else {
        generate_file(session, workspace, generator, config, task, &path, cancel)
    };
    outcome.unwrap_or_else(|err| {
        let kind = classify(&err, ErrorKind::Generation);
        warn!(path = %path, kind = ?kind, err = %format!("{err:#}"), "file task failed");
        TaskResult::failed(kind, format!("{err:#}")).with_path(&path)
    })
}

#[instrument(skip_all, fields(path = %path))]
fn delete_file<R: Runtime>(
    session: &mut ExecutionSession,
    workspace: &mut Workspace<R>,
    path: &str,
) -> Result<TaskResult> {
    match workspace.runtime().remove(path) {
        Ok(()) => {}
        Err(RuntimeError::NotFound { .. }) => debug!("already absent"),
        Err(err) => return Err(err).with_context(|| format!("delete {path}")),
    }
    workspace.files_mut().remove(path);
    if workspace.diffs_mut().discard(path).is_some() {
        info!("discarded pending diff for deleted path");
    }
    session.snapshot.remove(path);
    Ok(TaskResult::file(path, FileEffect::Deleted, None))
}

#[instrument(skip_all, fields(path = %path, action = task.action.as_str()))]
fn generate_file<R: Runtime, G: Generator>(
    session: &mut ExecutionSession,
    workspace: &mut Workspace<R>,
    generator: &G,
    config: &ExecutorConfig,
    task: &FileTask,
    path: &str,
    cancel: &CancellationToken,
) -> Result<TaskResult> {
    let current = session.snapshot.get(path).cloned();
    let request = GenerationRequest {
        path: path.to_string(),
        action: task.action,
        description: task.description.clone(),
        current_content: current.clone(),
        context: session.recent_changes(config.context_window),
    };
    let response = generator
        .generate(&request, cancel)
        .with_context(|| format!("generate {path}"))?;
    if cancel.is_cancelled() {
        debug!("discarding generation result that arrived after cancellation");
        return Err(TaskError::Cancelled.into());
    }
    if !response.success {
        let message = response
            .error
            .unwrap_or_else(|| "generation failed without an error message".to_string());
        return Err(TaskError::from_generation_message(message).into());
    }
    let content = response
        .content
        .ok_or_else(|| TaskError::Generation("reply carried no content".to_string()))?;

    let effect = match current {
        None => {
            workspace
                .runtime()
                .write_file(path, &content)
                .with_context(|| format!("write {path}"))?;
            workspace.files_mut().upsert(path, &content);
            FileEffect::Created
        }
        Some(old) if old == content => FileEffect::Unchanged,
        Some(old) => {
            let original = workspace
                .files()
                .content(path)
                .map(str::to_string)
                .unwrap_or(old);
            if workspace
                .diffs_mut()
                .propose(path, &original, &content)
                .is_some()
            {
                debug!("replaced an earlier diff for the same path");
            }
            FileEffect::PendingReview
        }
    };
    info!(effect = ?effect, bytes = content.len(), "file task done");

    session.snapshot.insert(path.to_string(), content.clone());
    session.changes.push(ChangeNote {
        path: path.to_string(),
        summary: response
            .summary
            .filter(|summary| !summary.trim().is_empty())
            .unwrap_or_else(|| task.description.clone()),
    });
    Ok(TaskResult::file(path, effect, Some(content)))
}

fn run_command_task<R: Runtime, C: ConsoleSink>(
    workspace: &Workspace<R>,
    console: &mut C,
    config: &ExecutorConfig,
    task: &CommandTask,
    cancel: &CancellationToken,
) -> TaskResult {
    execute_command(workspace, console, config, task, cancel).unwrap_or_else(|err| {
        let kind = classify(&err, ErrorKind::Command);
        warn!(kind = ?kind, err = %format!("{err:#}"), "command task failed");
        TaskResult::failed(kind, format!("{err:#}"))
    })
}

#[instrument(skip_all, fields(command = %task.command))]
fn execute_command<R: Runtime, C: ConsoleSink>(
    workspace: &Workspace<R>,
    console: &mut C,
    config: &ExecutorConfig,
    task: &CommandTask,
    cancel: &CancellationToken,
) -> Result<TaskResult> {
    let (program, args) = resolve_command(task, &config.auto_confirm)?;
    info!(program = %program, args = ?args, "spawning command");
    let mut process = workspace
        .runtime()
        .spawn(&program, &args)
        .with_context(|| format!("spawn {program}"))?;

    let deadline = Instant::now() + config.command_timeout;
    let mut tail = OutputTail::new(config.command_output_limit_bytes);
    let mut exited = None;
    loop {
        if cancel.is_cancelled() {
            process.kill()?;
            process.wait(POLL_INTERVAL, cancel)?;
            return Err(TaskError::Cancelled.into());
        }
        if Instant::now() >= deadline {
            break;
        }
        match process.output().recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                tail.push(&chunk.text);
                console.emit(ConsoleLine::Output(chunk));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        // The pipes can outlive the command when it leaves a background
        // process behind, so completion is the exit, not end of output.
        if let Some(outcome) = process.try_wait()? {
            exited = Some(outcome);
            break;
        }
    }

    let outcome = match exited {
        Some(outcome) => {
            drain_buffered(process.output(), &mut tail, console);
            outcome
        }
        None => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            process.wait(remaining, cancel)?
        }
    };
    if outcome.cancelled {
        return Err(TaskError::Cancelled.into());
    }
    let output = tail.into_string();
    let content = (!output.is_empty()).then_some(output);
    if outcome.timed_out {
        let mut result = TaskResult::failed(
            ErrorKind::TimedOut,
            TaskError::TimedOut(config.command_timeout).to_string(),
        );
        result.content = content;
        return Ok(result);
    }

    let code = outcome.code;
    if outcome.success() {
        return Ok(TaskResult {
            success: true,
            content,
            exit_code: code,
            ..TaskResult::default()
        });
    }
    warn!(exit_code = ?code, "command failed");
    let mut result = TaskResult::failed(ErrorKind::Command, TaskError::Command { code }.to_string());
    result.content = content;
    result.exit_code = code;
    Ok(result)
}

/// Collect lines the command wrote before exiting that are still in flight.
///
/// Stops at the grace deadline even if a leftover background process keeps
/// the channel open.
fn drain_buffered<C: ConsoleSink>(
    output: &Receiver<OutputChunk>,
    tail: &mut OutputTail,
    console: &mut C,
) {
    let grace = Instant::now() + OUTPUT_GRACE;
    loop {
        let remaining = grace.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("output still open after exit; leaving the rest unread");
            return;
        }
        match output.recv_timeout(remaining) {
            Ok(chunk) => {
                tail.push(&chunk.text);
                console.emit(ConsoleLine::Output(chunk));
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Keeps the last `limit` bytes of streamed output.
struct OutputTail {
    buf: String,
    limit: usize,
}

impl OutputTail {
    fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
        }
    }

    fn push(&mut self, text: &str) {
        self.buf.push_str(text);
        if self.buf.len() > self.limit {
            let mut cut = self.buf.len() - self.limit;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    fn into_string(self) -> String {
        self.buf
    }
}
