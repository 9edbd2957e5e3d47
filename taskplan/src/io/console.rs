//! Product console stream: task progress, live command output and the tally.
//!
//! This is what the user watches during a run. Diagnostics go through
//! `tracing` instead.

use std::io::{IsTerminal, Write};

use colored::Colorize;
use tracing::warn;

use crate::io::process::{OutputChunk, OutputStream};

/// One line of user-facing progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    TaskStarted {
        index: usize,
        total: usize,
        label: String,
    },
    /// Live output from a running command task.
    Output(OutputChunk),
    TaskSucceeded {
        index: usize,
        total: usize,
        label: String,
        detail: Option<String>,
    },
    TaskFailed {
        index: usize,
        total: usize,
        description: String,
        error: String,
        hint: Option<String>,
    },
    Notice(String),
    Summary {
        succeeded: usize,
        total: usize,
    },
}

impl ConsoleLine {
    /// Uncolored rendering.
    pub fn plain(&self) -> String {
        match self {
            ConsoleLine::TaskStarted {
                index,
                total,
                label,
            } => format!("[{}/{total}] {label}", index + 1),
            ConsoleLine::Output(chunk) => chunk.text.trim_end_matches('\n').to_string(),
            ConsoleLine::TaskSucceeded {
                index,
                total,
                label,
                detail,
            } => match detail {
                Some(detail) => format!("[{}/{total}] ok {label} ({detail})", index + 1),
                None => format!("[{}/{total}] ok {label}", index + 1),
            },
            ConsoleLine::TaskFailed {
                index,
                total,
                description,
                error,
                hint,
            } => {
                let mut line = format!("[{}/{total}] failed {description}: {error}", index + 1);
                if let Some(hint) = hint {
                    line.push_str(&format!("\n  hint: {hint}"));
                }
                line
            }
            ConsoleLine::Notice(message) => message.clone(),
            ConsoleLine::Summary { succeeded, total } => {
                format!("{succeeded}/{total} tasks succeeded")
            }
        }
    }

    fn colored(&self) -> String {
        match self {
            ConsoleLine::TaskStarted {
                index,
                total,
                label,
            } => format!(
                "{} {}",
                format!("[{}/{total}]", index + 1).dimmed(),
                label.bold()
            ),
            ConsoleLine::Output(chunk) => {
                let text = chunk.text.trim_end_matches('\n');
                match chunk.stream {
                    OutputStream::Stdout => format!("  {text}"),
                    OutputStream::Stderr => format!("  {}", text.yellow()),
                }
            }
            ConsoleLine::TaskSucceeded {
                index,
                total,
                label,
                detail,
            } => {
                let prefix = format!("[{}/{total}]", index + 1).dimmed();
                match detail {
                    Some(detail) => format!(
                        "{prefix} {} {label} {}",
                        "✓".green(),
                        format!("({detail})").dimmed()
                    ),
                    None => format!("{prefix} {} {label}", "✓".green()),
                }
            }
            ConsoleLine::TaskFailed {
                index,
                total,
                description,
                error,
                hint,
            } => {
                let mut line = format!(
                    "{} {} {description}: {}",
                    format!("[{}/{total}]", index + 1).dimmed(),
                    "✗".red(),
                    error.red()
                );
                if let Some(hint) = hint {
                    line.push_str(&format!("\n  {} {}", "hint:".cyan(), hint));
                }
                line
            }
            ConsoleLine::Notice(message) => message.cyan().to_string(),
            ConsoleLine::Summary { succeeded, total } => {
                let tally = format!("{succeeded}/{total} tasks succeeded");
                if succeeded == total {
                    tally.green().bold().to_string()
                } else {
                    tally.yellow().bold().to_string()
                }
            }
        }
    }
}

/// Receiver of console lines.
pub trait ConsoleSink {
    fn emit(&mut self, line: ConsoleLine);
}

/// Writes console lines to a terminal-like writer.
pub struct AnsiConsole<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> AnsiConsole<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }
}

impl AnsiConsole<std::io::Stdout> {
    /// Colored only when stdout is a terminal.
    pub fn stdout() -> Self {
        let out = std::io::stdout();
        let color = out.is_terminal();
        Self::new(out, color)
    }
}

impl<W: Write> ConsoleSink for AnsiConsole<W> {
    fn emit(&mut self, line: ConsoleLine) {
        let text = if self.color {
            line.colored()
        } else {
            line.plain()
        };
        if let Err(err) = writeln!(self.out, "{text}").and_then(|()| self.out.flush()) {
            warn!(err = %err, "failed to write console line");
        }
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullConsole;

impl ConsoleSink for NullConsole {
    fn emit(&mut self, _line: ConsoleLine) {}
}

impl<C: ConsoleSink + ?Sized> ConsoleSink for &mut C {
    fn emit(&mut self, line: ConsoleLine) {
        (**self).emit(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_failure_includes_hint() {
        let line = ConsoleLine::TaskFailed {
            index: 1,
            total: 3,
            description: "update src/App.jsx".to_string(),
            error: "rate limited".to_string(),
            hint: Some("wait a minute".to_string()),
        };
        assert_eq!(
            line.plain(),
            "[2/3] failed update src/App.jsx: rate limited\n  hint: wait a minute"
        );
    }

    #[test]
    fn ansi_console_without_color_writes_plain_lines() {
        let mut buf = Vec::new();
        {
            let mut console = AnsiConsole::new(&mut buf, false);
            console.emit(ConsoleLine::Output(OutputChunk::stdout("added 1 package\n")));
            console.emit(ConsoleLine::Summary {
                succeeded: 1,
                total: 2,
            });
        }
        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "added 1 package\n1/2 tasks succeeded\n"
        );
    }
}
