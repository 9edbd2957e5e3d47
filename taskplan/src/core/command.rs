//! Command-line splitting and auto-confirm normalization for command tasks.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::CommandTask;

/// Inject `flag` into invocations of `program` that carry none of `aliases`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoConfirmRule {
    pub program: String,
    pub flag: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl AutoConfirmRule {
    fn accepts(&self, arg: &str) -> bool {
        arg == self.flag || self.aliases.iter().any(|alias| alias == arg)
    }
}

pub fn default_auto_confirm_rules() -> Vec<AutoConfirmRule> {
    vec![
        AutoConfirmRule {
            program: "npx".to_string(),
            flag: "--yes".to_string(),
            aliases: vec!["-y".to_string()],
        },
        AutoConfirmRule {
            program: "pnpx".to_string(),
            flag: "--yes".to_string(),
            aliases: vec!["-y".to_string()],
        },
    ]
}

/// Split a command line into program and arguments (POSIX shell quoting).
pub fn split_command_line(line: &str) -> Result<(String, Vec<String>)> {
    let mut words =
        shell_words::split(line).map_err(|err| anyhow!("parse command `{line}`: {err}"))?;
    if words.is_empty() {
        return Err(anyhow!("empty command"));
    }
    let program = words.remove(0);
    Ok((program, words))
}

/// Resolve a command task into the argv that is actually spawned.
///
/// A task whose `command` still holds a whole command line (no separate
/// `args`) is split first. Known package runners get their auto-confirm flag
/// inserted right after the program so the run never blocks on a prompt.
pub fn resolve_command(
    task: &CommandTask,
    rules: &[AutoConfirmRule],
) -> Result<(String, Vec<String>)> {
    let (program, mut args) = if task.args.is_empty() {
        split_command_line(&task.command)?
    } else {
        (task.command.trim().to_string(), task.args.clone())
    };
    if program.is_empty() {
        return Err(anyhow!("empty command"));
    }

    if let Some(rule) = rules.iter().find(|rule| program_name(&program) == rule.program)
        && !args.iter().any(|arg| rule.accepts(arg))
    {
        args.insert(0, rule.flag.clone());
    }
    Ok((program, args))
}

fn program_name(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> CommandTask {
        CommandTask {
            command: line.to_string(),
            args: Vec::new(),
            description: "cmd".to_string(),
        }
    }

    #[test]
    fn splits_quoted_arguments() {
        let (program, args) = split_command_line(r#"npm run "dev server""#).expect("split");
        assert_eq!(program, "npm");
        assert_eq!(args, vec!["run", "dev server"]);
    }

    #[test]
    fn empty_line_is_rejected() {
        assert!(split_command_line("   ").is_err());
    }

    #[test]
    fn npx_without_flag_gets_yes() {
        let (program, args) =
            resolve_command(&command("npx shadcn add button"), &default_auto_confirm_rules())
                .expect("resolve");
        assert_eq!(program, "npx");
        assert_eq!(args, vec!["--yes", "shadcn", "add", "button"]);
    }

    #[test]
    fn existing_alias_is_respected() {
        let (_, args) =
            resolve_command(&command("npx -y create-vite"), &default_auto_confirm_rules())
                .expect("resolve");
        assert_eq!(args, vec!["-y", "create-vite"]);
    }

    #[test]
    fn other_programs_are_untouched() {
        let (program, args) =
            resolve_command(&command("npm install axios"), &default_auto_confirm_rules())
                .expect("resolve");
        assert_eq!(program, "npm");
        assert_eq!(args, vec!["install", "axios"]);
    }

    #[test]
    fn pre_split_args_are_used_verbatim() {
        let task = CommandTask {
            command: "/usr/bin/npx".to_string(),
            args: vec!["tsc".to_string()],
            description: "typecheck".to_string(),
        };
        let (program, args) =
            resolve_command(&task, &default_auto_confirm_rules()).expect("resolve");
        assert_eq!(program, "/usr/bin/npx");
        assert_eq!(args, vec!["--yes", "tsc"]);
    }
}
