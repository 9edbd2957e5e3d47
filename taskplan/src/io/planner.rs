//! Planning collaborator: turns a user request into a task plan.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::core::command::split_command_line;
use crate::core::response::extract_json;
use crate::core::types::{
    ChangeNote, CommandTask, Complexity, FileAction, FileTask, Plan, PlanResponse, Task,
};
use crate::io::agent::invoke_agent;
use crate::io::config::AgentConfig;
use crate::io::prompt::{PlanPromptInput, render_plan_prompt};

const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/plan/v1.schema.json"
));

const DEFAULT_QUESTION: &str = "Could you describe the change in more detail?";

/// Input to one planning call.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub request: String,
    /// Committed project files (path → content).
    pub files: BTreeMap<String, String>,
    /// Change notes from earlier sessions, oldest first.
    pub recent_changes: Vec<ChangeNote>,
}

/// Abstraction over planning backends.
pub trait Planner {
    fn plan(&self, request: &PlanRequest, cancel: &CancellationToken) -> Result<PlanResponse>;
}

impl<P: Planner + ?Sized> Planner for &P {
    fn plan(&self, request: &PlanRequest, cancel: &CancellationToken) -> Result<PlanResponse> {
        (**self).plan(request, cancel)
    }
}

/// Planner backed by an external agent command.
#[derive(Debug, Clone)]
pub struct CommandPlanner {
    config: AgentConfig,
    workdir: PathBuf,
    source_dir: String,
}

impl CommandPlanner {
    pub fn new(config: AgentConfig, workdir: impl Into<PathBuf>, source_dir: &str) -> Self {
        Self {
            config,
            workdir: workdir.into(),
            source_dir: source_dir.to_string(),
        }
    }
}

impl Planner for CommandPlanner {
    #[instrument(skip_all, fields(files = request.files.len()))]
    fn plan(&self, request: &PlanRequest, cancel: &CancellationToken) -> Result<PlanResponse> {
        let prompt = render_plan_prompt(&PlanPromptInput {
            request: &request.request,
            source_dir: &self.source_dir,
            files: &request.files,
            recent_changes: &request.recent_changes,
        })?;
        let reply = invoke_agent(&self.config, &prompt, &self.workdir, cancel)?;
        let value = extract_json(&reply).context("parse planner reply")?;
        let response = parse_plan_reply(&value)?;
        match &response {
            PlanResponse::Plan(plan) => info!(tasks = plan.tasks.len(), "planner returned a plan"),
            PlanResponse::Clarification { .. } => info!("planner asked for clarification"),
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct WirePlan {
    #[serde(default)]
    understanding: String,
    #[serde(default)]
    needs_clarification: bool,
    #[serde(default)]
    clarification_question: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    tasks: Vec<WireTask>,
    #[serde(default)]
    estimated_complexity: Option<Complexity>,
}

#[derive(Debug, Deserialize)]
struct WireTask {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    action: Option<FileAction>,
    #[serde(default)]
    command: Option<String>,
}

/// Validate a planner reply against the plan schema and convert it.
pub fn parse_plan_reply(value: &Value) -> Result<PlanResponse> {
    validate_schema(value)?;
    let wire: WirePlan = serde_json::from_value(value.clone()).context("decode plan reply")?;

    if let Some(error) = wire.error.as_deref().filter(|e| !e.trim().is_empty())
        && wire.tasks.is_empty()
        && !wire.needs_clarification
    {
        bail!("planner failed: {error}");
    }

    if wire.needs_clarification {
        let question = wire
            .clarification_question
            .or(wire.question)
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUESTION.to_string());
        return Ok(PlanResponse::Clarification {
            question,
            understanding: wire.understanding,
        });
    }

    let mut tasks = Vec::with_capacity(wire.tasks.len());
    for (idx, task) in wire.tasks.into_iter().enumerate() {
        tasks.push(convert_task(task).with_context(|| format!("plan task {}", idx + 1))?);
    }
    debug!(tasks = tasks.len(), "converted plan");
    Ok(PlanResponse::Plan(Plan {
        understanding: wire.understanding,
        tasks,
        estimated_complexity: wire.estimated_complexity.unwrap_or_default(),
    }))
}

fn convert_task(task: WireTask) -> Result<Task> {
    match task.kind.as_str() {
        "file" => {
            let path = task
                .file
                .filter(|f| !f.trim().is_empty())
                .ok_or_else(|| anyhow!("file task without a file"))?;
            let action = task.action.unwrap_or(FileAction::Update);
            let description = if task.description.trim().is_empty() {
                format!("{} {path}", action.as_str())
            } else {
                task.description
            };
            Ok(Task::File(FileTask {
                path,
                action,
                description,
            }))
        }
        "command" => {
            let line = task
                .command
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| anyhow!("command task without a command"))?;
            let (command, args) = split_command_line(&line)?;
            let description = if task.description.trim().is_empty() {
                line
            } else {
                task.description
            };
            Ok(Task::Command(CommandTask {
                command,
                args,
                description,
            }))
        }
        other => Err(anyhow!("unknown task type `{other}`")),
    }
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).context("parse plan schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid plan schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("plan schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_reply_converts_tasks_in_order() {
        let reply = json!({
            "understanding": "add axios client",
            "needs_clarification": false,
            "tasks": [
                {"id": 1, "type": "command", "description": "install", "command": "npm install axios", "dependencies": []},
                {"id": 2, "type": "file", "description": "client", "file": "src/api.js", "action": "create"},
                {"id": 3, "type": "file", "description": "use it", "file": "App.jsx"}
            ],
            "estimated_complexity": "medium"
        });
        let PlanResponse::Plan(plan) = parse_plan_reply(&reply).expect("parse") else {
            panic!("expected a plan");
        };
        assert_eq!(plan.estimated_complexity, Complexity::Medium);
        assert_eq!(plan.tasks.len(), 3);
        assert_eq!(
            plan.tasks[0],
            Task::Command(CommandTask {
                command: "npm".to_string(),
                args: vec!["install".to_string(), "axios".to_string()],
                description: "install".to_string(),
            })
        );
        match &plan.tasks[2] {
            Task::File(task) => {
                assert_eq!(task.path, "App.jsx");
                assert_eq!(task.action, FileAction::Update);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn clarification_uses_either_question_key() {
        let reply = json!({
            "understanding": "a todo app",
            "needs_clarification": true,
            "question": "Which storage?"
        });
        assert_eq!(
            parse_plan_reply(&reply).expect("parse"),
            PlanResponse::Clarification {
                question: "Which storage?".to_string(),
                understanding: "a todo app".to_string(),
            }
        );
    }

    #[test]
    fn file_task_without_file_fails_schema() {
        let reply = json!({
            "understanding": "x",
            "tasks": [{"type": "file", "description": "missing path"}]
        });
        let err = parse_plan_reply(&reply).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn unknown_task_type_fails_schema() {
        let reply = json!({
            "understanding": "x",
            "tasks": [{"type": "deploy"}]
        });
        assert!(parse_plan_reply(&reply).is_err());
    }

    #[test]
    fn error_reply_without_tasks_fails() {
        let reply = json!({"understanding": "Failed to create plan", "error": "429 quota", "tasks": []});
        let err = parse_plan_reply(&reply).unwrap_err();
        assert!(err.to_string().contains("429 quota"));
    }

    #[cfg(unix)]
    #[test]
    fn command_planner_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"cat >/dev/null; echo '{"understanding": "u", "tasks": [{"type": "file", "file": "src/a.js", "action": "create", "description": "a"}]}'"#;
        let planner = CommandPlanner::new(
            AgentConfig {
                command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
                ..AgentConfig::default()
            },
            temp.path(),
            "src",
        );
        let response = planner
            .plan(
                &PlanRequest {
                    request: "add a".to_string(),
                    ..PlanRequest::default()
                },
                &CancellationToken::new(),
            )
            .expect("plan");
        let PlanResponse::Plan(plan) = response else {
            panic!("expected a plan");
        };
        assert_eq!(plan.tasks.len(), 1);
    }
}
