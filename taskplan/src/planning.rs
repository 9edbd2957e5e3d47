//! Plan and clarify flow around the planning collaborator.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::core::types::{Complexity, Plan, PlanResponse};
use crate::io::init::ProjectPaths;
use crate::io::planner::{PlanRequest, Planner};
use crate::io::prompt::MAX_RECENT_CHANGES;
use crate::io::session_log::{load_last_plan, recent_changes, write_last_plan};

/// Ask the planner for a plan and remember its understanding.
///
/// A clarification request is stored as a task-less plan so a later
/// [`clarify`] can build on its understanding.
#[instrument(skip_all, fields(files = files.len()))]
pub fn request_plan<P: Planner>(
    planner: &P,
    paths: &ProjectPaths,
    files: BTreeMap<String, String>,
    request: &str,
    cancel: &CancellationToken,
) -> Result<PlanResponse> {
    let request = request.trim();
    if request.is_empty() {
        return Err(anyhow!("request must not be empty"));
    }
    let recent_changes = recent_changes(paths, MAX_RECENT_CHANGES)?;
    let response = planner.plan(
        &PlanRequest {
            request: request.to_string(),
            files,
            recent_changes,
        },
        cancel,
    )?;

    let remembered = match &response {
        PlanResponse::Plan(plan) => plan.clone(),
        PlanResponse::Clarification { understanding, .. } => Plan {
            understanding: understanding.clone(),
            tasks: Vec::new(),
            estimated_complexity: Complexity::default(),
        },
    };
    write_last_plan(paths, &remembered)?;
    info!(
        tasks = remembered.tasks.len(),
        clarification = matches!(response, PlanResponse::Clarification { .. }),
        "plan recorded"
    );
    Ok(response)
}

/// Re-plan from the last understanding plus the user's answer.
pub fn clarify<P: Planner>(
    planner: &P,
    paths: &ProjectPaths,
    files: BTreeMap<String, String>,
    answer: &str,
    cancel: &CancellationToken,
) -> Result<PlanResponse> {
    let last = load_last_plan(paths)?
        .ok_or_else(|| anyhow!("nothing to clarify: no previous plan (run `taskplan plan` first)"))?;
    let request = clarification_request(&last.understanding, answer);
    request_plan(planner, paths, files, &request, cancel)
}

pub fn clarification_request(understanding: &str, answer: &str) -> String {
    format!("{}\n\nUser clarification: {}", understanding.trim(), answer.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::core::types::{FileAction, FileTask, Task};

    struct RecordingPlanner {
        reply: PlanResponse,
        requests: RefCell<Vec<String>>,
    }

    impl Planner for RecordingPlanner {
        fn plan(&self, request: &PlanRequest, _cancel: &CancellationToken) -> Result<PlanResponse> {
            self.requests.borrow_mut().push(request.request.clone());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn clarification_request_format() {
        assert_eq!(
            clarification_request("a todo app ", " use local storage"),
            "a todo app\n\nUser clarification: use local storage"
        );
    }

    #[test]
    fn clarify_builds_on_stored_understanding() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let asking = RecordingPlanner {
            reply: PlanResponse::Clarification {
                question: "Which storage?".to_string(),
                understanding: "a todo app".to_string(),
            },
            requests: RefCell::new(Vec::new()),
        };
        request_plan(
            &asking,
            &paths,
            BTreeMap::new(),
            "build a todo app",
            &CancellationToken::new(),
        )
        .expect("plan");

        let planning = RecordingPlanner {
            reply: PlanResponse::Plan(Plan {
                understanding: "a todo app with local storage".to_string(),
                tasks: vec![Task::File(FileTask {
                    path: "src/Todo.jsx".to_string(),
                    action: FileAction::Create,
                    description: "todo".to_string(),
                })],
                estimated_complexity: Complexity::Simple,
            }),
            requests: RefCell::new(Vec::new()),
        };
        let response = clarify(
            &planning,
            &paths,
            BTreeMap::new(),
            "local storage",
            &CancellationToken::new(),
        )
        .expect("clarify");
        assert!(matches!(response, PlanResponse::Plan(_)));
        assert_eq!(
            planning.requests.borrow().as_slice(),
            ["a todo app\n\nUser clarification: local storage".to_string()]
        );
        let stored = load_last_plan(&paths).expect("load").expect("plan");
        assert_eq!(stored.tasks.len(), 1);
    }

    #[test]
    fn clarify_without_previous_plan_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let planner = RecordingPlanner {
            reply: PlanResponse::Clarification {
                question: "q".to_string(),
                understanding: "u".to_string(),
            },
            requests: RefCell::new(Vec::new()),
        };
        let err = clarify(
            &planner,
            &paths,
            BTreeMap::new(),
            "x",
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("nothing to clarify"));
    }
}
