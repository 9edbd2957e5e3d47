//! Task plan runner with review-gated edits.
//!
//! Turns a request into a task plan, executes it against the project
//! directory, and keeps edits to existing files as pending diffs until they
//! are accepted or rejected. State lives under `.taskplan/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use taskplan::core::diff_store::Decision;
use taskplan::core::types::{Plan, PlanResponse};
use taskplan::executor::ExecutorConfig;
use taskplan::exit_codes;
use taskplan::io::config::{TaskplanConfig, load_config};
use taskplan::io::console::AnsiConsole;
use taskplan::io::generator::{CommandGenerator, RetryingGenerator};
use taskplan::io::init::{InitOptions, ProjectPaths, init_project};
use taskplan::io::planner::CommandPlanner;
use taskplan::io::review_store::write_review_state;
use taskplan::io::session_log::read_plan;
use taskplan::logging;
use taskplan::planning::{clarify, request_plan};
use taskplan::reconcile::BatchOutcome;
use taskplan::run::{execute_plan, open_local_workspace};

#[derive(Parser, Debug)]
#[command(
    name = "taskplan",
    version,
    about = "Run task plans against a project with review-gated edits"
)]
struct Cli {
    /// Project root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create `.taskplan/` with a default config.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
        /// JSON file tree to write into the project.
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Ask the planner for a plan and print it.
    Plan { request: String },
    /// Plan (unless `--plan` is given) and execute.
    Run {
        /// Execute this plan file instead of asking the planner.
        #[arg(long, conflicts_with = "request")]
        plan: Option<PathBuf>,
        #[arg(required_unless_present = "plan")]
        request: Option<String>,
    },
    /// Answer the planner's question, re-plan and execute.
    Clarify { answer: String },
    /// List paths with pending diffs.
    Pending,
    /// Show the pending diff for a path.
    Diff { path: String },
    /// Apply a pending diff.
    Accept {
        #[arg(required_unless_present = "all")]
        path: Option<String>,
        #[arg(long, conflicts_with = "path")]
        all: bool,
    },
    /// Discard a pending diff.
    Reject {
        #[arg(required_unless_present = "all")]
        path: Option<String>,
        #[arg(long, conflicts_with = "path")]
        all: bool,
    },
    /// Show past accept/reject decisions.
    History,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = ProjectPaths::new(&cli.root);
    match cli.command {
        Command::Init { force, template } => cmd_init(&cli.root, force, template),
        Command::Plan { request } => cmd_plan(&paths, &request),
        Command::Run { plan, request } => cmd_run(&paths, plan.as_deref(), request.as_deref()),
        Command::Clarify { answer } => cmd_clarify(&paths, &answer),
        Command::Pending => cmd_pending(&paths),
        Command::Diff { path } => cmd_diff(&paths, &path),
        Command::Accept { path, all } => cmd_review(&paths, path.as_deref(), all, Review::Accept),
        Command::Reject { path, all } => cmd_review(&paths, path.as_deref(), all, Review::Reject),
        Command::History => cmd_history(&paths),
    }
}

fn load(paths: &ProjectPaths) -> Result<TaskplanConfig> {
    load_config(&paths.config_path).context("load .taskplan/config.toml")
}

fn cmd_init(root: &Path, force: bool, template: Option<PathBuf>) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force, template })?;
    println!("initialized {}", paths.taskplan_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_plan(paths: &ProjectPaths, request: &str) -> Result<i32> {
    let cfg = load(paths)?;
    let workspace = open_local_workspace(paths, &cfg)?;
    let planner = planner_for(paths, &cfg);
    let response = request_plan(
        &planner,
        paths,
        workspace.files().snapshot(),
        request,
        &CancellationToken::new(),
    )?;
    match response {
        PlanResponse::Plan(plan) => {
            print_plan(&plan);
            Ok(exit_codes::OK)
        }
        PlanResponse::Clarification { question, .. } => {
            print_question(&question);
            Ok(exit_codes::NEEDS_CLARIFICATION)
        }
    }
}

fn cmd_run(
    paths: &ProjectPaths,
    plan_path: Option<&Path>,
    request: Option<&str>,
) -> Result<i32> {
    let cfg = load(paths)?;
    let plan = match (plan_path, request) {
        (Some(path), _) => {
            read_plan(path).with_context(|| format!("load plan {}", path.display()))?
        }
        (None, Some(request)) => {
            let workspace = open_local_workspace(paths, &cfg)?;
            let planner = planner_for(paths, &cfg);
            match request_plan(
                &planner,
                paths,
                workspace.files().snapshot(),
                request,
                &CancellationToken::new(),
            )? {
                PlanResponse::Plan(plan) => plan,
                PlanResponse::Clarification { question, .. } => {
                    print_question(&question);
                    return Ok(exit_codes::NEEDS_CLARIFICATION);
                }
            }
        }
        (None, None) => return Err(anyhow!("either a request or --plan is required")),
    };
    execute(paths, &cfg, &plan, request)
}

fn cmd_clarify(paths: &ProjectPaths, answer: &str) -> Result<i32> {
    let cfg = load(paths)?;
    let files = open_local_workspace(paths, &cfg)?.files().snapshot();
    let planner = planner_for(paths, &cfg);
    let response = clarify(&planner, paths, files, answer, &CancellationToken::new())?;
    match response {
        PlanResponse::Plan(plan) => execute(paths, &cfg, &plan, Some(answer)),
        PlanResponse::Clarification { question, .. } => {
            print_question(&question);
            Ok(exit_codes::NEEDS_CLARIFICATION)
        }
    }
}

fn execute(
    paths: &ProjectPaths,
    cfg: &TaskplanConfig,
    plan: &Plan,
    request: Option<&str>,
) -> Result<i32> {
    if !plan.understanding.is_empty() {
        println!("{}", plan.understanding);
    }
    let mut workspace = open_local_workspace(paths, cfg)?;
    let generator = RetryingGenerator::new(
        CommandGenerator::new(cfg.generator.clone(), &paths.root),
        cfg.retry.clone(),
    );
    let mut console = AnsiConsole::stdout();
    let outcome = execute_plan(
        paths,
        &mut workspace,
        &generator,
        &mut console,
        &ExecutorConfig::from(cfg),
        plan,
        request,
    )?;
    if !outcome.pending.is_empty() {
        println!("pending review:");
        for path in &outcome.pending {
            println!("  {path}");
        }
    }
    println!("session log: {}", outcome.session.dir.display());
    Ok(outcome.exit_code())
}

fn cmd_pending(paths: &ProjectPaths) -> Result<i32> {
    let cfg = load(paths)?;
    let workspace = open_local_workspace(paths, &cfg)?;
    for path in workspace.pending_paths() {
        println!("{path}");
    }
    Ok(exit_codes::OK)
}

fn cmd_diff(paths: &ProjectPaths, path: &str) -> Result<i32> {
    let cfg = load(paths)?;
    let workspace = open_local_workspace(paths, &cfg)?;
    print!("{}", workspace.render_diff(path)?);
    Ok(exit_codes::OK)
}

#[derive(Debug, Clone, Copy)]
enum Review {
    Accept,
    Reject,
}

fn cmd_review(
    paths: &ProjectPaths,
    path: Option<&str>,
    all: bool,
    review: Review,
) -> Result<i32> {
    let cfg = load(paths)?;
    let mut workspace = open_local_workspace(paths, &cfg)?;
    let verb = match review {
        Review::Accept => "accepted",
        Review::Reject => "rejected",
    };

    let outcome = match (path, all) {
        (_, true) => match review {
            Review::Accept => workspace.accept_all(),
            Review::Reject => workspace.reject_all(),
        },
        (Some(path), false) => {
            let resolved = match review {
                Review::Accept => workspace.accept(path),
                Review::Reject => workspace.reject(path),
            };
            let diff = resolved?;
            BatchOutcome {
                resolved: vec![diff.path],
                failed: Vec::new(),
            }
        }
        (None, false) => return Err(anyhow!("a path or --all is required")),
    };
    write_review_state(&paths.review_path, workspace.diffs())?;

    for path in &outcome.resolved {
        println!("{verb} {path}");
    }
    for (path, err) in &outcome.failed {
        eprintln!("could not resolve {path}: {err}");
    }
    if outcome.is_clean() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::INVALID)
    }
}

fn cmd_history(paths: &ProjectPaths) -> Result<i32> {
    let cfg = load(paths)?;
    let workspace = open_local_workspace(paths, &cfg)?;
    for record in workspace.diffs().history() {
        let decision = match record.decision {
            Decision::Accepted => "accepted",
            Decision::Rejected => "rejected",
        };
        println!(
            "{} {decision} {}",
            record.decided_at.format("%Y-%m-%d %H:%M:%S"),
            record.path
        );
    }
    Ok(exit_codes::OK)
}

fn planner_for(paths: &ProjectPaths, cfg: &TaskplanConfig) -> CommandPlanner {
    CommandPlanner::new(cfg.planner.clone(), &paths.root, &cfg.paths.source_dir)
}

fn print_plan(plan: &Plan) {
    println!("{}", plan.understanding);
    for (index, task) in plan.tasks.iter().enumerate() {
        println!("{}. {} ({})", index + 1, task.label(), task.description());
    }
}

fn print_question(question: &str) {
    println!("{question}");
    println!("answer with `taskplan clarify <answer>`");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_request_or_plan() {
        assert!(Cli::try_parse_from(["taskplan", "run"]).is_err());
        assert!(Cli::try_parse_from(["taskplan", "run", "add a button"]).is_ok());
        assert!(Cli::try_parse_from(["taskplan", "run", "--plan", "plan.json"]).is_ok());
        assert!(
            Cli::try_parse_from(["taskplan", "run", "--plan", "plan.json", "add a button"])
                .is_err()
        );
    }

    #[test]
    fn accept_takes_a_path_or_all() {
        assert!(Cli::try_parse_from(["taskplan", "accept"]).is_err());
        assert!(Cli::try_parse_from(["taskplan", "accept", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["taskplan", "accept", "src/App.jsx", "--all"]).is_err());
        let cli = Cli::try_parse_from(["taskplan", "--root", "/tmp/p", "reject", "src/App.jsx"])
            .expect("parse");
        assert_eq!(cli.root, PathBuf::from("/tmp/p"));
        assert!(matches!(
            cli.command,
            Command::Reject { path: Some(ref p), all: false } if p == "src/App.jsx"
        ));
    }
}
