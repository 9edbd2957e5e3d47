//! CLI tests for `taskplan init`, `run --plan` and the review commands.
//!
//! Spawns the taskplan binary and checks exit codes, files on disk and the
//! persisted review state across separate invocations.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use taskplan::core::diff_store::DiffStore;
use taskplan::exit_codes;
use taskplan::io::init::{InitOptions, ProjectPaths, init_project};
use taskplan::io::review_store::{load_review_state, write_review_state};

fn taskplan(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskplan"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("run taskplan")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn project_with_pending(root: &Path) -> ProjectPaths {
    let paths = init_project(root, &InitOptions::default()).expect("init");
    fs::create_dir_all(root.join("src")).expect("mkdir src");
    fs::write(root.join("src/App.jsx"), "OLD\n").expect("write app");
    fs::write(root.join("src/main.jsx"), "main\n").expect("write main");
    let mut store = DiffStore::new();
    store.propose("src/App.jsx", "OLD\n", "NEW\n");
    store.propose("src/main.jsx", "main\n", "main v2\n");
    write_review_state(&paths.review_path, &store).expect("write review state");
    paths
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = taskplan(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join(".taskplan/config.toml").is_file());

    let second = taskplan(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));

    let forced = taskplan(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn init_mounts_a_template_tree() {
    let temp = tempfile::tempdir().expect("tempdir");
    let template = temp.path().join("template.json");
    fs::write(
        &template,
        r#"{"package.json": "{}\n", "src/App.jsx": "app\n", "public": {"folder": true}}"#,
    )
    .expect("write template");
    let project = temp.path().join("project");

    let output = taskplan(
        temp.path(),
        &[
            "--root",
            project.to_str().expect("utf8 path"),
            "init",
            "--template",
            template.to_str().expect("utf8 path"),
        ],
    );

    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
    assert_eq!(
        fs::read_to_string(project.join("src/App.jsx")).expect("read"),
        "app\n"
    );
    assert!(project.join("public").is_dir());
}

#[test]
fn review_decisions_persist_across_invocations() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = project_with_pending(temp.path());

    let pending = taskplan(temp.path(), &["pending"]);
    assert_eq!(pending.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&pending), "src/App.jsx\nsrc/main.jsx\n");

    let diff = taskplan(temp.path(), &["diff", "src/App.jsx"]);
    assert_eq!(diff.status.code(), Some(exit_codes::OK));
    assert!(stdout(&diff).contains("+NEW"));

    let accept = taskplan(temp.path(), &["accept", "src/App.jsx"]);
    assert_eq!(accept.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(temp.path().join("src/App.jsx")).expect("read"),
        "NEW\n"
    );

    let reject = taskplan(temp.path(), &["reject", "--all"]);
    assert_eq!(reject.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(temp.path().join("src/main.jsx")).expect("read"),
        "main\n"
    );

    let store = load_review_state(&paths.review_path).expect("load");
    assert!(store.pending_paths().is_empty());
    assert_eq!(store.history().len(), 2);

    let history = stdout(&taskplan(temp.path(), &["history"]));
    assert!(history.contains("accepted src/App.jsx"), "{history}");
    assert!(history.contains("rejected src/main.jsx"), "{history}");
}

#[test]
fn accepting_an_unknown_path_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    project_with_pending(temp.path());

    let output = taskplan(temp.path(), &["accept", "src/Nope.jsx"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no pending diff"));
}

#[cfg(unix)]
mod run {
    use super::*;
    use taskplan::io::config::{AgentConfig, TaskplanConfig, write_config};

    /// Configure a generator that ignores the prompt and returns `content`.
    fn configure_generator(paths: &ProjectPaths, content: &str) {
        let reply = serde_json::json!({ "file_content": content, "summary": "scripted" });
        let script = format!("cat >/dev/null; printf '%s' '{reply}'");
        let cfg = TaskplanConfig {
            inter_task_pause_ms: 0,
            generator: AgentConfig {
                command: vec!["sh".to_string(), "-c".to_string(), script],
                ..AgentConfig::default()
            },
            ..TaskplanConfig::default()
        };
        write_config(&paths.config_path, &cfg).expect("write config");
    }

    fn write_plan(root: &Path, plan: serde_json::Value) -> String {
        let path = root.join("plan.json");
        fs::write(&path, plan.to_string()).expect("write plan");
        path.to_str().expect("utf8 path").to_string()
    }

    #[test]
    fn run_plan_writes_new_files_and_reports_failed_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions::default()).expect("init");
        configure_generator(&paths, "hello\n");
        let plan = write_plan(
            temp.path(),
            serde_json::json!({
                "understanding": "greet",
                "tasks": [
                    {"type": "file", "path": "src/hello.txt", "action": "create", "description": "greeting"},
                    {"type": "command", "command": "false", "description": "fail on purpose"}
                ]
            }),
        );

        let output = taskplan(temp.path(), &["run", "--plan", &plan]);

        assert_eq!(
            output.status.code(),
            Some(exit_codes::TASKS_FAILED),
            "{output:?}"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("src/hello.txt")).expect("read"),
            "hello\n"
        );
        assert!(stdout(&output).contains("1/2 tasks succeeded"));
        let sessions: Vec<_> = fs::read_dir(&paths.sessions_dir)
            .expect("sessions dir")
            .collect();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn run_plan_keeps_updates_pending_until_accepted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions::default()).expect("init");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/App.jsx"), "OLD\n").expect("write");
        configure_generator(&paths, "NEW\n");
        let plan = write_plan(
            temp.path(),
            serde_json::json!({
                "understanding": "update app",
                "tasks": [
                    {"type": "file", "path": "App.jsx", "action": "update", "description": "rewrite"}
                ]
            }),
        );

        let output = taskplan(temp.path(), &["run", "--plan", &plan]);

        assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
        assert_eq!(
            fs::read_to_string(temp.path().join("src/App.jsx")).expect("read"),
            "OLD\n"
        );
        assert_eq!(
            load_review_state(&paths.review_path)
                .expect("load")
                .pending_paths(),
            vec!["src/App.jsx"]
        );

        let accept = taskplan(temp.path(), &["accept", "--all"]);
        assert_eq!(accept.status.code(), Some(exit_codes::OK));
        assert_eq!(
            fs::read_to_string(temp.path().join("src/App.jsx")).expect("read"),
            "NEW\n"
        );
    }
}
