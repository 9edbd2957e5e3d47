//! Prompt rendering for the planning and generation collaborators.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::{ChangeNote, FileAction};
use crate::io::generator::GenerationRequest;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const CREATE_TEMPLATE: &str = include_str!("prompts/create.md");
const UPDATE_TEMPLATE: &str = include_str!("prompts/update.md");

/// Paths listed in the planning prompt's file tree.
pub const MAX_TREE_PATHS: usize = 20;
/// File contents included in the planning prompt.
pub const MAX_RELEVANT_FILES: usize = 5;
/// Change notes included in the planning prompt.
pub const MAX_RECENT_CHANGES: usize = 10;

const ENTRY_POINT_LIMIT: usize = 3;
const SOURCE_EXTENSIONS: &[&str] = &["jsx", "tsx", "js", "ts"];

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("plan", PLAN_TEMPLATE)
        .expect("plan template should be valid");
    env.add_template("create", CREATE_TEMPLATE)
        .expect("create template should be valid");
    env.add_template("update", UPDATE_TEMPLATE)
        .expect("update template should be valid");
    env
});

#[derive(Debug, Clone, Serialize)]
struct FileContext<'a> {
    path: &'a str,
    content: &'a str,
}

/// Everything the planning prompt is built from.
#[derive(Debug, Clone)]
pub struct PlanPromptInput<'a> {
    pub request: &'a str,
    pub source_dir: &'a str,
    /// Committed project files (path → content).
    pub files: &'a BTreeMap<String, String>,
    pub recent_changes: &'a [ChangeNote],
}

pub fn render_plan_prompt(input: &PlanPromptInput<'_>) -> Result<String> {
    let tree: Vec<&str> = input
        .files
        .keys()
        .take(MAX_TREE_PATHS)
        .map(String::as_str)
        .collect();
    let files: Vec<FileContext<'_>> = select_relevant_files(input.files, input.source_dir)
        .into_iter()
        .map(|(path, content)| FileContext { path, content })
        .collect();
    let skip = input
        .recent_changes
        .len()
        .saturating_sub(MAX_RECENT_CHANGES);
    let recent_changes = &input.recent_changes[skip..];

    debug!(
        tree = tree.len(),
        files = files.len(),
        recent_changes = recent_changes.len(),
        "rendering plan prompt"
    );
    ENGINE
        .get_template("plan")?
        .render(context! {
            request => input.request.trim(),
            source_dir => input.source_dir,
            tree => tree,
            files => files,
            recent_changes => recent_changes,
        })
        .context("render plan prompt")
}

pub fn render_generation_prompt(request: &GenerationRequest) -> Result<String> {
    let name = match request.action {
        FileAction::Create => "create",
        FileAction::Update | FileAction::Delete => "update",
    };
    ENGINE
        .get_template(name)?
        .render(context! {
            description => request.description.trim(),
            path => request.path.as_str(),
            current_content => request.current_content.as_deref().unwrap_or_default(),
            context => request.context.as_slice(),
        })
        .with_context(|| format!("render {name} prompt"))
}

/// Pick the files most useful to the planner.
///
/// Entry points (`<source_dir>/App.*`) come first, then component sources.
/// Dependency folders, JSON and `*.config.*` files are skipped.
pub fn select_relevant_files<'a>(
    files: &'a BTreeMap<String, String>,
    source_dir: &str,
) -> Vec<(&'a str, &'a str)> {
    let mut entry_points = Vec::new();
    let mut components = Vec::new();
    for (path, content) in files {
        if path.contains("node_modules/") || path.ends_with(".json") || path.contains(".config.") {
            continue;
        }
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let extension = file_name.rsplit_once('.').map(|(_, ext)| ext);
        if !extension.is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext)) {
            continue;
        }
        let parent = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        if parent == source_dir && file_name.starts_with("App.") {
            entry_points.push((path.as_str(), content.as_str()));
        } else if path.contains("components/") {
            components.push((path.as_str(), content.as_str()));
        }
    }
    entry_points.truncate(ENTRY_POINT_LIMIT);
    let room = MAX_RELEVANT_FILES.saturating_sub(entry_points.len());
    entry_points.extend(components.into_iter().take(room));
    entry_points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(path, content)| (path.to_string(), content.to_string()))
            .collect()
    }

    #[test]
    fn relevant_files_put_entry_point_first_and_skip_config() {
        let files = files(&[
            ("package.json", "{}"),
            ("vite.config.js", "export default {}"),
            ("src/components/B.jsx", "b"),
            ("src/components/A.jsx", "a"),
            ("src/App.jsx", "app"),
            ("src/index.css", "body {}"),
        ]);
        let picked: Vec<&str> = select_relevant_files(&files, "src")
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert_eq!(
            picked,
            vec!["src/App.jsx", "src/components/A.jsx", "src/components/B.jsx"]
        );
    }

    #[test]
    fn relevant_files_are_capped() {
        let mut entries: Vec<(String, String)> = (0..10)
            .map(|i| (format!("src/components/C{i}.jsx"), "c".to_string()))
            .collect();
        entries.push(("src/App.jsx".to_string(), "app".to_string()));
        let files: BTreeMap<String, String> = entries.into_iter().collect();
        let picked = select_relevant_files(&files, "src");
        assert_eq!(picked.len(), MAX_RELEVANT_FILES);
        assert_eq!(picked[0].0, "src/App.jsx");
    }

    #[test]
    fn plan_prompt_lists_tree_changes_and_request() {
        let files = files(&[("src/App.jsx", "export default function App() {}")]);
        let changes = vec![ChangeNote {
            path: "src/App.jsx".to_string(),
            summary: "added header".to_string(),
        }];
        let prompt = render_plan_prompt(&PlanPromptInput {
            request: "  add a footer ",
            source_dir: "src",
            files: &files,
            recent_changes: &changes,
        })
        .expect("render");
        assert!(prompt.contains("- src/App.jsx\n"));
        assert!(prompt.contains("- src/App.jsx: added header"));
        assert!(prompt.contains("--- src/App.jsx ---"));
        assert!(prompt.trim_end().ends_with("add a footer"));
    }

    #[test]
    fn plan_prompt_keeps_last_recent_changes() {
        let files = BTreeMap::new();
        let changes: Vec<ChangeNote> = (0..15)
            .map(|i| ChangeNote {
                path: format!("src/f{i}.js"),
                summary: format!("change {i}"),
            })
            .collect();
        let prompt = render_plan_prompt(&PlanPromptInput {
            request: "r",
            source_dir: "src",
            files: &files,
            recent_changes: &changes,
        })
        .expect("render");
        assert!(!prompt.contains("change 4\n"));
        assert!(prompt.contains("change 5\n"));
        assert!(prompt.contains("change 14\n"));
        assert!(!prompt.contains("### Project Files"));
    }

    #[test]
    fn update_prompt_embeds_current_content() {
        let request = GenerationRequest {
            path: "src/App.jsx".to_string(),
            action: FileAction::Update,
            description: "rename title".to_string(),
            current_content: Some("<h1>Old</h1>".to_string()),
            context: Vec::new(),
        };
        let prompt = render_generation_prompt(&request).expect("render");
        assert!(prompt.contains("search/replace"));
        assert!(prompt.contains("<h1>Old</h1>"));
        assert!(!prompt.contains("### Previous Changes"));
    }

    #[test]
    fn create_prompt_lists_context() {
        let request = GenerationRequest {
            path: "src/components/Footer.jsx".to_string(),
            action: FileAction::Create,
            description: "footer".to_string(),
            current_content: None,
            context: vec![ChangeNote {
                path: "src/App.jsx".to_string(),
                summary: "layout".to_string(),
            }],
        };
        let prompt = render_generation_prompt(&request).expect("render");
        assert!(prompt.contains("file_content"));
        assert!(prompt.contains("- src/App.jsx: layout"));
    }
}
