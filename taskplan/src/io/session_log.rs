//! Session logging helpers for `.taskplan/sessions/` and the last plan.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{ChangeNote, Plan, TaskResult};
use crate::executor::SessionState;
use crate::io::config::write_atomic;
use crate::io::init::ProjectPaths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub succeeded: usize,
    pub total: usize,
    /// Notes for file tasks that succeeded, in task order.
    #[serde(default)]
    pub changes: Vec<ChangeNote>,
}

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub plan_path: PathBuf,
    pub results_path: PathBuf,
}

impl SessionPaths {
    pub fn new(paths: &ProjectPaths, session_id: &str) -> Self {
        let dir = paths.session_dir(session_id);
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            plan_path: dir.join("plan.json"),
            results_path: dir.join("results.json"),
        }
    }
}

/// Sortable, filesystem-safe session id derived from the start time.
pub fn new_session_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

pub fn write_session(
    paths: &ProjectPaths,
    meta: &SessionMeta,
    plan: &Plan,
    results: &[TaskResult],
) -> Result<SessionPaths> {
    let session = SessionPaths::new(paths, &meta.session_id);
    fs::create_dir_all(&session.dir)
        .with_context(|| format!("create session dir {}", session.dir.display()))?;

    write_json(&session.meta_path, meta)?;
    write_json(&session.plan_path, plan)?;
    write_json(&session.results_path, results)?;
    debug!(dir = %session.dir.display(), "wrote session log");
    Ok(session)
}

/// Change notes from the most recent sessions, oldest first, at most `limit`.
pub fn recent_changes(paths: &ProjectPaths, limit: usize) -> Result<Vec<ChangeNote>> {
    if !paths.sessions_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(&paths.sessions_dir)
        .with_context(|| format!("read {}", paths.sessions_dir.display()))?
    {
        let entry = entry.with_context(|| format!("read {}", paths.sessions_dir.display()))?;
        if entry.path().is_dir() {
            ids.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    ids.sort();

    let mut notes: Vec<ChangeNote> = Vec::new();
    for id in ids.iter().rev() {
        if notes.len() >= limit {
            break;
        }
        let meta_path = SessionPaths::new(paths, id).meta_path;
        if !meta_path.exists() {
            continue;
        }
        let meta: SessionMeta = read_json(&meta_path)?;
        let mut batch = meta.changes;
        batch.append(&mut notes);
        notes = batch;
    }
    let skip = notes.len().saturating_sub(limit);
    Ok(notes.split_off(skip))
}

pub fn write_last_plan(paths: &ProjectPaths, plan: &Plan) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(plan).context("serialize plan")?;
    buf.push('\n');
    write_atomic(&paths.last_plan_path, &buf)
}

pub fn load_last_plan(paths: &ProjectPaths) -> Result<Option<Plan>> {
    if !paths.last_plan_path.exists() {
        return Ok(None);
    }
    read_json(&paths.last_plan_path).map(Some)
}

/// Load a plan file written by `write_last_plan` or by hand.
pub fn read_plan(path: &Path) -> Result<Plan> {
    read_json(path)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
