//! Initialization helpers for `.taskplan/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{TaskplanConfig, write_config};
use crate::core::types::FileTree;
use crate::io::runtime::{LocalRuntime, Runtime};

/// All canonical paths within `.taskplan/` for a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub taskplan_dir: PathBuf,
    pub state_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub review_path: PathBuf,
    pub last_plan_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let taskplan_dir = root.join(".taskplan");
        let state_dir = taskplan_dir.join("state");
        Self {
            root: root.clone(),
            taskplan_dir: taskplan_dir.clone(),
            state_dir: state_dir.clone(),
            sessions_dir: taskplan_dir.join("sessions"),
            gitignore_path: taskplan_dir.join(".gitignore"),
            config_path: taskplan_dir.join("config.toml"),
            review_path: state_dir.join("review.json"),
            last_plan_path: state_dir.join("last_plan.json"),
        }
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, overwrite existing taskplan-owned files.
    pub force: bool,
    /// JSON file tree mounted into the project after scaffolding.
    pub template: Option<PathBuf>,
}

/// Create `.taskplan/` scaffolding in `root`.
///
/// Fails if `.taskplan/` already exists unless `options.force` is set.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root);
    if paths.taskplan_dir.exists() && !paths.taskplan_dir.is_dir() {
        return Err(anyhow!(
            "taskplan init: .taskplan exists but is not a directory"
        ));
    }
    if paths.taskplan_dir.exists() && !options.force {
        return Err(anyhow!(
            "taskplan init: .taskplan already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.taskplan_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.sessions_dir)?;
    fs::write(&paths.gitignore_path, TASKPLAN_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &TaskplanConfig::default())?;

    if let Some(template) = &options.template {
        let tree = read_template(template)?;
        let runtime = LocalRuntime::new(root);
        runtime.boot()?;
        runtime
            .mount(&tree)
            .with_context(|| format!("mount template {}", template.display()))?;
        info!(entries = tree.len(), "mounted template");
    }

    Ok(paths)
}

/// Read a JSON file tree (`{"path": "content" | {"folder": true}}`).
pub fn read_template(path: &Path) -> Result<FileTree> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read template {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse template {}", path.display()))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const TASKPLAN_GITIGNORE: &str = "sessions/\nstate/\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions::default()).expect("init");

        assert!(paths.state_dir.is_dir());
        assert!(paths.sessions_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("gitignore"),
            TASKPLAN_GITIGNORE
        );
        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            TaskplanConfig::default()
        );
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_project(temp.path(), &InitOptions::default()).expect("init");
        let err = init_project(temp.path(), &InitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_rewrites_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions::default()).expect("init");
        fs::write(&paths.config_path, "context_window = 1\n").expect("custom");
        init_project(
            temp.path(),
            &InitOptions {
                force: true,
                template: None,
            },
        )
        .expect("re-init");
        assert_eq!(load_config(&paths.config_path).expect("config").context_window, 5);
    }

    #[test]
    fn init_mounts_template_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        let template = temp.path().join("template.json");
        fs::write(
            &template,
            r#"{"src/App.jsx": "export default function App() {}", "public": {"folder": true}}"#,
        )
        .expect("template");
        let root = temp.path().join("project");
        init_project(
            &root,
            &InitOptions {
                force: false,
                template: Some(template),
            },
        )
        .expect("init");
        assert!(root.join("src/App.jsx").is_file());
        assert!(root.join("public").is_dir());
    }
}
