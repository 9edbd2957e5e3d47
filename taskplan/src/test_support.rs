//! Test-only fakes for the runtime, the generator and the console.
//!
//! [`FakeRuntime`] and [`ScriptedGenerator`] can share one [`Journal`] so a
//! test can assert the order in which the executor touched them.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio_util::sync::CancellationToken;

use crate::core::types::{CommandTask, FileAction, FileTask, FileTree, Task, TreeNode};
use crate::executor::ExecutorConfig;
use crate::io::console::{ConsoleLine, ConsoleSink};
use crate::io::generator::{GenerationRequest, GenerationResponse, Generator};
use crate::io::init::ProjectPaths;
use crate::io::process::{OutputChunk, WaitOutcome, sleep_or_cancel};
use crate::io::runtime::{DirEntry, ProcessHandle, Runtime, RuntimeError};

/// One observable call made against a fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Boot,
    Write { path: String, content: String },
    Mkdir(String),
    Remove(String),
    Spawn { command: String, args: Vec<String> },
    Exited { command: String, code: Option<i32> },
    Killed { command: String },
    Generate { path: String },
}

/// Shared, ordered record of fake calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Event>>>);

impl Journal {
    pub fn record(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    /// Index of the first event matching `pred`.
    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.0.borrow().iter().position(pred)
    }

    pub fn writes_to(&self, path: &str) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::Write { path: p, content } if p == path => Some(content.clone()),
                _ => None,
            })
            .collect()
    }
}

/// How a scripted process behaves once spawned.
#[derive(Debug, Clone)]
pub struct ScriptedProcess {
    pub output: Vec<OutputChunk>,
    pub exit_code: i32,
    /// Never finishes on its own; only a timeout or cancellation ends it.
    pub hang: bool,
}

impl ScriptedProcess {
    pub fn exits(code: i32) -> Self {
        Self {
            output: Vec::new(),
            exit_code: code,
            hang: false,
        }
    }

    pub fn hangs() -> Self {
        Self {
            output: Vec::new(),
            exit_code: 0,
            hang: true,
        }
    }

    pub fn with_stdout(mut self, text: &str) -> Self {
        self.output.push(OutputChunk::stdout(text));
        self
    }

    pub fn with_stderr(mut self, text: &str) -> Self {
        self.output.push(OutputChunk::stderr(text));
        self
    }
}

/// In-memory [`Runtime`].
///
/// Starts booted. Spawned processes follow the queued [`ScriptedProcess`]es
/// and exit 0 silently once the queue is empty.
#[derive(Debug)]
pub struct FakeRuntime {
    files: RefCell<BTreeMap<String, String>>,
    dirs: RefCell<BTreeSet<String>>,
    booted: Cell<bool>,
    failing_writes: RefCell<BTreeSet<String>>,
    processes: RefCell<VecDeque<ScriptedProcess>>,
    journal: Journal,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            files: RefCell::new(BTreeMap::new()),
            dirs: RefCell::new(BTreeSet::new()),
            booted: Cell::new(true),
            failing_writes: RefCell::new(BTreeSet::new()),
            processes: RefCell::new(VecDeque::new()),
            journal: Journal::default(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Seed files without journaling the writes.
    pub fn with_files(self, files: &[(&str, &str)]) -> Self {
        for (path, content) in files {
            self.files
                .borrow_mut()
                .insert((*path).to_string(), (*content).to_string());
        }
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn set_booted(&self, booted: bool) {
        self.booted.set(booted);
    }

    /// Make every later write to `path` fail with an I/O error.
    pub fn fail_writes_to(&self, path: &str) {
        self.failing_writes.borrow_mut().insert(path.to_string());
    }

    pub fn heal_writes_to(&self, path: &str) {
        self.failing_writes.borrow_mut().remove(path);
    }

    pub fn push_process(&self, process: ScriptedProcess) {
        self.processes.borrow_mut().push_back(process);
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }

    fn ensure_booted(&self) -> Result<(), RuntimeError> {
        if self.booted.get() {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable)
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() || self.dirs.borrow().contains(path) {
            return true;
        }
        let prefix = format!("{path}/");
        self.files.borrow().keys().any(|p| p.starts_with(&prefix))
            || self.dirs.borrow().iter().any(|d| d.starts_with(&prefix))
    }
}

impl Runtime for FakeRuntime {
    type Process = FakeProcess;

    fn boot(&self) -> Result<(), RuntimeError> {
        if !self.booted.get() {
            self.booted.set(true);
            self.journal.record(Event::Boot);
        }
        Ok(())
    }

    fn is_booted(&self) -> bool {
        self.booted.get()
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), RuntimeError> {
        self.ensure_booted()?;
        if self.failing_writes.borrow().contains(path) {
            return Err(RuntimeError::Io {
                op: "write",
                path: path.to_string(),
                source: std::io::Error::other("injected write failure"),
            });
        }
        self.journal.record(Event::Write {
            path: path.to_string(),
            content: content.to_string(),
        });
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<(), RuntimeError> {
        self.ensure_booted()?;
        self.journal.record(Event::Mkdir(path.to_string()));
        self.dirs.borrow_mut().insert(path.to_string());
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<String, RuntimeError> {
        self.ensure_booted()?;
        self.file(path).ok_or_else(|| RuntimeError::NotFound {
            path: path.to_string(),
        })
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, RuntimeError> {
        self.ensure_booted()?;
        if !self.is_dir(path) {
            return Err(RuntimeError::NotFound {
                path: path.to_string(),
            });
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        let files = self.files.borrow();
        let dirs = self.dirs.borrow();
        for (full, is_dir) in files
            .keys()
            .map(|p| (p, false))
            .chain(dirs.iter().map(|d| (d, true)))
        {
            let Some(rest) = full.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((name, _)) => {
                    entries.insert(name.to_string(), true);
                }
                None if !rest.is_empty() => {
                    entries.entry(rest.to_string()).or_insert(is_dir);
                }
                None => {}
            }
        }
        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }

    fn remove(&self, path: &str) -> Result<(), RuntimeError> {
        self.ensure_booted()?;
        self.journal.record(Event::Remove(path.to_string()));
        let prefix = format!("{path}/");
        self.files
            .borrow_mut()
            .retain(|p, _| p != path && !p.starts_with(&prefix));
        self.dirs
            .borrow_mut()
            .retain(|d| d != path && !d.starts_with(&prefix));
        Ok(())
    }

    fn spawn(&self, command: &str, args: &[String]) -> Result<Self::Process, RuntimeError> {
        self.ensure_booted()?;
        self.journal.record(Event::Spawn {
            command: command.to_string(),
            args: args.to_vec(),
        });
        let script = self
            .processes
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ScriptedProcess::exits(0));
        Ok(FakeProcess::new(command, script, self.journal.clone()))
    }
}

/// Process handed out by [`FakeRuntime::spawn`].
pub struct FakeProcess {
    command: String,
    output: Receiver<OutputChunk>,
    // Held open while hanging so the output channel never disconnects.
    sender: Option<Sender<OutputChunk>>,
    exit_code: i32,
    hang: bool,
    killed: bool,
    reaped: bool,
    journal: Journal,
}

impl FakeProcess {
    fn new(command: &str, script: ScriptedProcess, journal: Journal) -> Self {
        let (tx, rx) = mpsc::channel();
        for chunk in script.output {
            // The receiver lives in `self`; sending cannot fail here.
            let _ = tx.send(chunk);
        }
        Self {
            command: command.to_string(),
            output: rx,
            sender: script.hang.then_some(tx),
            exit_code: script.exit_code,
            hang: script.hang,
            killed: false,
            reaped: false,
            journal,
        }
    }

    fn killed_outcome() -> WaitOutcome {
        WaitOutcome {
            code: None,
            timed_out: false,
            cancelled: true,
        }
    }

    fn exit(&mut self) -> WaitOutcome {
        if !self.reaped {
            self.reaped = true;
            self.journal.record(Event::Exited {
                command: self.command.clone(),
                code: Some(self.exit_code),
            });
        }
        WaitOutcome::exited(self.exit_code)
    }
}

impl ProcessHandle for FakeProcess {
    fn output(&self) -> &Receiver<OutputChunk> {
        &self.output
    }

    fn try_wait(&mut self) -> Result<Option<WaitOutcome>> {
        if self.killed {
            return Ok(Some(Self::killed_outcome()));
        }
        Ok((!self.hang).then(|| self.exit()))
    }

    fn wait(&mut self, timeout: Duration, cancel: &CancellationToken) -> Result<WaitOutcome> {
        if self.killed {
            return Ok(Self::killed_outcome());
        }
        if self.hang {
            let cancelled = sleep_or_cancel(timeout, cancel);
            self.killed = true;
            self.journal.record(Event::Killed {
                command: self.command.clone(),
            });
            return Ok(WaitOutcome {
                code: None,
                timed_out: !cancelled,
                cancelled,
            });
        }
        Ok(self.exit())
    }

    fn kill(&mut self) -> Result<()> {
        if !self.killed {
            self.killed = true;
            self.sender.take();
            self.journal.record(Event::Killed {
                command: self.command.clone(),
            });
        }
        Ok(())
    }
}

/// One scripted generator reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Content(String),
    Summary { content: String, summary: String },
    Refusal(String),
    Error(String),
    /// Cancels the session token, then replies with content anyway.
    CancelThen(String),
}

/// [`Generator`] that answers from a queue and records every request.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<Reply>>,
    requests: RefCell<Vec<GenerationRequest>>,
    journal: Journal,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn reply(self, reply: Reply) -> Self {
        self.replies.borrow_mut().push_back(reply);
        self
    }

    pub fn content(self, content: &str) -> Self {
        self.reply(Reply::Content(content.to_string()))
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse> {
        self.journal.record(Event::Generate {
            path: request.path.clone(),
        });
        self.requests.borrow_mut().push(request.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply for {}", request.path))?;
        match reply {
            Reply::Content(content) => Ok(GenerationResponse::ok(&request.path, content)),
            Reply::Summary { content, summary } => {
                Ok(GenerationResponse::ok(&request.path, content).with_summary(summary))
            }
            Reply::Refusal(error) => Ok(GenerationResponse::failure(&request.path, error)),
            Reply::Error(error) => Err(anyhow!(error)),
            Reply::CancelThen(content) => {
                cancel.cancel();
                Ok(GenerationResponse::ok(&request.path, content))
            }
        }
    }
}

/// Console that keeps every line.
#[derive(Debug, Default)]
pub struct MemoryConsole {
    pub lines: Vec<ConsoleLine>,
}

impl MemoryConsole {
    pub fn rendered(&self) -> String {
        self.lines.iter().map(ConsoleLine::plain).collect()
    }
}

impl ConsoleSink for MemoryConsole {
    fn emit(&mut self, line: ConsoleLine) {
        self.lines.push(line);
    }
}

pub fn file_task(action: FileAction, path: &str) -> Task {
    Task::File(FileTask {
        path: path.to_string(),
        action,
        description: format!("{} {path}", action.as_str()),
    })
}

/// A command task from a full command line; arguments stay in `command`.
pub fn command_task(line: &str) -> Task {
    Task::Command(CommandTask {
        command: line.to_string(),
        args: Vec::new(),
        description: format!("run {line}"),
    })
}

pub fn tree(files: &[(&str, &str)]) -> FileTree {
    files
        .iter()
        .map(|(path, content)| ((*path).to_string(), TreeNode::File((*content).to_string())))
        .collect()
}

/// Executor settings with no pause between tasks and a short command timeout.
pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        inter_task_pause: Duration::ZERO,
        command_timeout: Duration::from_millis(300),
        ..ExecutorConfig::default()
    }
}

/// A fresh temporary project root with its `.taskplan` layout paths.
pub fn temp_project() -> Result<(tempfile::TempDir, ProjectPaths)> {
    let dir = tempfile::tempdir()?;
    let paths = ProjectPaths::new(dir.path());
    Ok((dir, paths))
}
