//! Project configuration stored under `.taskplan/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::command::{AutoConfirmRule, default_auto_confirm_rules};
use crate::core::path::{DEFAULT_ROOT_FILES, DEFAULT_SOURCE_SUBDIRS, PathRules};

/// Task plan configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values suitable for a small web project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskplanConfig {
    /// Wall-clock limit for a single command task.
    pub command_timeout_secs: u64,

    /// Keep at most this many bytes of combined command output per task.
    pub command_output_limit_bytes: usize,

    /// Pause between tasks so observers can render progress.
    pub inter_task_pause_ms: u64,

    /// Number of recent change notes passed to the generator.
    pub context_window: usize,

    pub generator: AgentConfig,
    pub planner: AgentConfig,
    pub retry: RetryConfig,
    pub paths: PathConfig,
    pub auto_confirm: Vec<AutoConfirmRule>,

    /// Directory names skipped when loading the project tree.
    pub ignore: Vec<String>,
}

/// An external command that receives a prompt on stdin and replies with JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string(), "-".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(anyhow!("{name}.command must be a non-empty array"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("{name}.timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("{name}.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathConfig {
    pub source_dir: String,
    pub root_files: Vec<String>,
    pub source_subdirs: Vec<String>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            source_dir: "src".to_string(),
            root_files: DEFAULT_ROOT_FILES.iter().map(|s| s.to_string()).collect(),
            source_subdirs: DEFAULT_SOURCE_SUBDIRS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PathConfig {
    pub fn rules(&self) -> PathRules {
        PathRules {
            source_dir: self.source_dir.clone(),
            root_files: self.root_files.clone(),
            source_subdirs: self.source_subdirs.clone(),
        }
    }
}

impl Default for TaskplanConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 10 * 60,
            command_output_limit_bytes: 100_000,
            inter_task_pause_ms: 50,
            context_window: 5,
            generator: AgentConfig::default(),
            planner: AgentConfig::default(),
            retry: RetryConfig::default(),
            paths: PathConfig::default(),
            auto_confirm: default_auto_confirm_rules(),
            ignore: [".git", "node_modules", ".taskplan", "dist"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TaskplanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.command_output_limit_bytes == 0 {
            return Err(anyhow!("command_output_limit_bytes must be > 0"));
        }
        self.generator.validate("generator")?;
        self.planner.validate("planner")?;
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(anyhow!("retry.max_delay_ms must be >= retry.base_delay_ms"));
        }
        for rule in &self.auto_confirm {
            if rule.program.trim().is_empty() || rule.flag.trim().is_empty() {
                return Err(anyhow!("auto_confirm rules need a program and a flag"));
            }
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn inter_task_pause(&self) -> Duration {
        Duration::from_millis(self.inter_task_pause_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TaskplanConfig::default()`.
pub fn load_config(path: &Path) -> Result<TaskplanConfig> {
    if !path.exists() {
        let cfg = TaskplanConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TaskplanConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TaskplanConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
