//! Shared deterministic types for the task plan core.
//!
//! These types define the contracts between the planner, the executor and the
//! review stores. They carry no I/O and serialize to stable JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a file task does to its target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Update,
    Delete,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Create => "create",
            FileAction::Update => "update",
            FileAction::Delete => "delete",
        }
    }
}

/// Generate (or remove) the content of a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTask {
    pub path: String,
    pub action: FileAction,
    pub description: String,
}

/// Run a shell-free command inside the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTask {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub description: String,
}

/// One step of a task plan. Plan order is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Task {
    File(FileTask),
    Command(CommandTask),
}

impl Task {
    pub fn description(&self) -> &str {
        match self {
            Task::File(task) => &task.description,
            Task::Command(task) => &task.description,
        }
    }

    /// Short human label: `update src/App.jsx` or `npm install axios`.
    pub fn label(&self) -> String {
        match self {
            Task::File(task) => format!("{} {}", task.action.as_str(), task.path),
            Task::Command(task) if task.args.is_empty() => task.command.clone(),
            Task::Command(task) => format!("{} {}", task.command, task.args.join(" ")),
        }
    }
}

/// Planner's effort estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Medium,
    Complex,
}

/// An executable plan produced by the planning collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub understanding: String,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub estimated_complexity: Complexity,
}

/// Planner reply: either a plan or a question for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanResponse {
    Clarification {
        question: String,
        understanding: String,
    },
    Plan(Plan),
}

/// Failure classification attached to a failed task result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Runtime not booted or gone; halts the session.
    RuntimeUnavailable,
    PathNotFound,
    Generation,
    Command,
    RateLimited,
    TimedOut,
    Cancelled,
    /// Task never ran because the session stopped early.
    Skipped,
    /// Any other runtime I/O failure.
    Runtime,
}

impl ErrorKind {
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, ErrorKind::RuntimeUnavailable)
    }
}

/// What a successful file task did to the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEffect {
    /// New path written straight through.
    Created,
    /// Existing path; a pending diff awaits review.
    PendingReview,
    /// Generated content equals the current content.
    Unchanged,
    Deleted,
}

/// Outcome of one task, matched to its task by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<FileEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl TaskResult {
    pub fn failed(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn file(path: &str, effect: FileEffect, content: Option<String>) -> Self {
        Self {
            success: true,
            path: Some(path.to_string()),
            content,
            effect: Some(effect),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }
}

/// A short note about a completed file change, fed back as generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNote {
    pub path: String,
    pub summary: String,
}

/// A node of a mounted file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    File(String),
    Folder(FolderMarker),
}

/// Sentinel for an empty directory. Serializes as `{"folder": true}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMarker {
    pub folder: bool,
}

impl TreeNode {
    pub fn folder() -> Self {
        TreeNode::Folder(FolderMarker { folder: true })
    }
}

/// Path → node mapping used for bulk mounts and store seeding.
pub type FileTree = BTreeMap<String, TreeNode>;
