//! Orchestration for `taskplan run` and `taskplan clarify`.
//!
//! Executes a plan against a workspace, then persists the review state and a
//! session log so review can happen in later invocations.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument};

use crate::core::types::Plan;
use crate::executor::{ExecutionSession, ExecutorConfig, ExecutorDeps, SessionState, SessionSummary, run_session};
use crate::exit_codes;
use crate::io::config::TaskplanConfig;
use crate::io::console::ConsoleSink;
use crate::io::generator::Generator;
use crate::io::init::ProjectPaths;
use crate::io::review_store::{load_review_state, write_review_state};
use crate::io::runtime::{LocalRuntime, Runtime};
use crate::io::session_log::{SessionMeta, SessionPaths, new_session_id, write_session};
use crate::workspace::Workspace;

/// What a finished run left behind.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: SessionSummary,
    pub session: SessionPaths,
    /// Paths awaiting review after the run, in display order.
    pub pending: Vec<String>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        exit_code(&self.summary)
    }
}

pub fn exit_code(summary: &SessionSummary) -> i32 {
    match summary.state {
        SessionState::Halted => exit_codes::HALTED,
        _ if summary.all_succeeded() => exit_codes::OK,
        _ => exit_codes::TASKS_FAILED,
    }
}

/// Open the project directory as a workspace with its persisted review state.
pub fn open_local_workspace(
    paths: &ProjectPaths,
    cfg: &TaskplanConfig,
) -> Result<Workspace<LocalRuntime>> {
    let mut workspace = Workspace::open(LocalRuntime::new(&paths.root), &cfg.ignore)?;
    *workspace.diffs_mut() = load_review_state(&paths.review_path)?;
    Ok(workspace)
}

/// Run `plan` to completion and persist what it produced.
#[instrument(skip_all, fields(tasks = plan.tasks.len()))]
pub fn execute_plan<R, G, C>(
    paths: &ProjectPaths,
    workspace: &mut Workspace<R>,
    generator: &G,
    console: &mut C,
    config: &ExecutorConfig,
    plan: &Plan,
    request: Option<&str>,
) -> Result<RunOutcome>
where
    R: Runtime,
    G: Generator,
    C: ConsoleSink,
{
    let cancel = workspace.begin_session();
    let started_at = Utc::now();
    let mut session = ExecutionSession::new(
        new_session_id(started_at),
        plan.tasks.clone(),
        workspace.files().snapshot(),
    );
    let summary = run_session(
        &mut session,
        ExecutorDeps {
            workspace: &mut *workspace,
            generator,
            console,
            config,
        },
        &cancel,
    );

    write_review_state(&paths.review_path, workspace.diffs()).context("persist review state")?;
    let meta = SessionMeta {
        session_id: session.id.clone(),
        request: request.map(str::to_string),
        state: summary.state,
        started_at: session.started_at.unwrap_or(started_at),
        ended_at: session.ended_at.unwrap_or_else(Utc::now),
        succeeded: summary.succeeded,
        total: summary.total,
        changes: session.changes.clone(),
    };
    let session_paths =
        write_session(paths, &meta, plan, &session.results).context("write session log")?;
    let pending = workspace.pending_paths();
    info!(session = %session.id, pending = pending.len(), "run recorded");
    Ok(RunOutcome {
        summary,
        session: session_paths,
        pending,
    })
}
