//! Runtime filesystem adapter: the sandboxed environment the plan mutates.
//!
//! The [`Runtime`] trait is the only way the executor and the reconciliation
//! API touch files or processes. [`LocalRuntime`] backs it with a directory on
//! disk; tests use the in-memory fake from `test_support`.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::core::path::normalize_path;
use crate::core::types::{FileTree, TreeNode};
use crate::io::process::{OutputChunk, StreamingChild, WaitOutcome, spawn_streaming};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime unavailable (not booted)")]
    Unavailable,
    #[error("not found: {path}")]
    NotFound { path: String },
    #[error("invalid runtime path `{path}`")]
    InvalidPath { path: String },
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// A spawned runtime process.
///
/// Output is only available through [`ProcessHandle::output`]; lines that are
/// not received are lost.
pub trait ProcessHandle {
    fn output(&self) -> &Receiver<OutputChunk>;
    /// Non-blocking exit check; `None` while the process is still running.
    fn try_wait(&mut self) -> Result<Option<WaitOutcome>>;
    fn wait(&mut self, timeout: Duration, cancel: &CancellationToken) -> Result<WaitOutcome>;
    fn kill(&mut self) -> Result<()>;
}

/// Contract over the sandboxed execution environment.
///
/// Paths are POSIX-style and relative to the runtime root.
pub trait Runtime {
    type Process: ProcessHandle;

    /// Idempotent. Later calls are no-ops once booted.
    fn boot(&self) -> Result<(), RuntimeError>;
    fn is_booted(&self) -> bool;
    /// Bulk write of a whole tree; folder markers become directories.
    fn mount(&self, tree: &FileTree) -> Result<(), RuntimeError> {
        for (path, node) in tree {
            match node {
                TreeNode::File(content) => self.write_file(path, content)?,
                TreeNode::Folder(_) => self.mkdir(path)?,
            }
        }
        Ok(())
    }
    /// Creates parent directories before writing.
    fn write_file(&self, path: &str, content: &str) -> Result<(), RuntimeError>;
    /// Recursive; an existing directory is success.
    fn mkdir(&self, path: &str) -> Result<(), RuntimeError>;
    fn read_file(&self, path: &str) -> Result<String, RuntimeError>;
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, RuntimeError>;
    /// Recursive; a missing path is success.
    fn remove(&self, path: &str) -> Result<(), RuntimeError>;
    fn spawn(&self, command: &str, args: &[String]) -> Result<Self::Process, RuntimeError>;

    fn exists(&self, path: &str) -> bool {
        self.read_file(path).is_ok() || self.read_dir(path).is_ok()
    }
}

/// Runtime rooted at a local directory.
#[derive(Debug)]
pub struct LocalRuntime {
    root: PathBuf,
    booted: OnceLock<()>,
}

impl LocalRuntime {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            booted: OnceLock::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_booted(&self) -> Result<(), RuntimeError> {
        if self.booted.get().is_none() {
            return Err(RuntimeError::Unavailable);
        }
        Ok(())
    }

    /// Map a runtime path onto the root, refusing escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf, RuntimeError> {
        let normalized = normalize_path(path);
        let relative = Path::new(&normalized);
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || path.starts_with('/') {
            return Err(RuntimeError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(op: &'static str, path: &str, source: std::io::Error) -> RuntimeError {
    if source.kind() == std::io::ErrorKind::NotFound {
        return RuntimeError::NotFound {
            path: path.to_string(),
        };
    }
    RuntimeError::Io {
        op,
        path: path.to_string(),
        source,
    }
}

impl Runtime for LocalRuntime {
    type Process = LocalProcess;

    #[instrument(skip_all, fields(root = %self.root.display()))]
    fn boot(&self) -> Result<(), RuntimeError> {
        if self.booted.get().is_some() {
            return Ok(());
        }
        fs::create_dir_all(&self.root)
            .map_err(|source| io_error("create root", &self.root.display().to_string(), source))?;
        let _ = self.booted.set(());
        info!("runtime booted");
        Ok(())
    }

    fn is_booted(&self) -> bool {
        self.booted.get().is_some()
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), RuntimeError> {
        self.ensure_booted()?;
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error("create parent of", path, source))?;
        }
        fs::write(&target, content).map_err(|source| io_error("write", path, source))?;
        debug!(path, bytes = content.len(), "wrote file");
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<(), RuntimeError> {
        self.ensure_booted()?;
        let target = self.resolve(path)?;
        match fs::create_dir_all(&target) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(source) => Err(io_error("mkdir", path, source)),
        }
    }

    fn read_file(&self, path: &str) -> Result<String, RuntimeError> {
        self.ensure_booted()?;
        let target = self.resolve(path)?;
        fs::read_to_string(&target).map_err(|source| io_error("read", path, source))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, RuntimeError> {
        self.ensure_booted()?;
        let target = self.resolve(path)?;
        let mut entries = Vec::new();
        let listing = fs::read_dir(&target).map_err(|source| io_error("read dir", path, source))?;
        for entry in listing {
            let entry = entry.map_err(|source| io_error("read dir", path, source))?;
            let file_type = entry
                .file_type()
                .map_err(|source| io_error("stat", path, source))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn remove(&self, path: &str) -> Result<(), RuntimeError> {
        self.ensure_booted()?;
        let target = self.resolve(path)?;
        let result = if target.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        };
        match result {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                debug!(path, "remove: already absent");
                Ok(())
            }
            Err(source) => Err(io_error("remove", path, source)),
        }
    }

    #[instrument(skip_all, fields(command = %command))]
    fn spawn(&self, command: &str, args: &[String]) -> Result<Self::Process, RuntimeError> {
        self.ensure_booted()?;
        let mut cmd = Command::new(command);
        cmd.args(args).current_dir(&self.root);
        let child = spawn_streaming(cmd).map_err(|source| RuntimeError::Spawn {
            command: command.to_string(),
            source,
        })?;
        Ok(LocalProcess { child })
    }
}

/// Process spawned by [`LocalRuntime`].
pub struct LocalProcess {
    child: StreamingChild,
}

impl ProcessHandle for LocalProcess {
    fn output(&self) -> &Receiver<OutputChunk> {
        self.child.output()
    }

    fn try_wait(&mut self) -> Result<Option<WaitOutcome>> {
        self.child.try_wait()
    }

    fn wait(&mut self, timeout: Duration, cancel: &CancellationToken) -> Result<WaitOutcome> {
        self.child.wait(timeout, cancel)
    }

    fn kill(&mut self) -> Result<()> {
        self.child.kill()
    }
}

/// Walk the runtime and collect every file (and empty directory) as a tree.
///
/// Directory names listed in `ignore` are skipped at any depth.
pub fn load_tree<R: Runtime>(runtime: &R, ignore: &[String]) -> Result<FileTree, RuntimeError> {
    let mut tree = FileTree::new();
    walk(runtime, "", ignore, &mut tree)?;
    Ok(tree)
}

fn walk<R: Runtime>(
    runtime: &R,
    dir: &str,
    ignore: &[String],
    tree: &mut FileTree,
) -> Result<(), RuntimeError> {
    let entries = runtime.read_dir(dir)?;
    let mut kept = 0usize;
    for entry in entries {
        let path = if dir.is_empty() {
            entry.name.clone()
        } else {
            format!("{dir}/{}", entry.name)
        };
        if entry.is_dir {
            if ignore.iter().any(|name| name == &entry.name) {
                continue;
            }
            walk(runtime, &path, ignore, tree)?;
        } else {
            match runtime.read_file(&path) {
                Ok(content) => {
                    tree.insert(path, TreeNode::File(content));
                }
                // Binary or unreadable files are not editable text.
                Err(RuntimeError::Io { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        kept += 1;
    }
    if kept == 0 && !dir.is_empty() {
        tree.insert(dir.to_string(), TreeNode::folder());
    }
    Ok(())
}
