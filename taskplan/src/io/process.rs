//! Helpers for running child processes with timeouts, cancellation and
//! bounded or streamed output.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Granularity for timeout and cancellation checks while a child runs.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit code; `None` when the child was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// The child is killed when `timeout` elapses or `cancel` fires.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        if let Err(e) = child_stdin.write_all(input) {
            // The child may exit without reading its input; its status tells the story.
            warn!(err = %e, "failed to write stdin");
        }
    }

    let outcome = wait_until(&mut child, timeout, cancel)?;

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?outcome.code, timed_out = outcome.timed_out, cancelled = outcome.cancelled, "command finished");
    Ok(CommandOutput {
        code: outcome.code,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out: outcome.timed_out,
        cancelled: outcome.cancelled,
    })
}

/// How a waited-on child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Exit code; `None` when the child was killed by a signal.
    pub code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl WaitOutcome {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            timed_out: false,
            cancelled: false,
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.code == Some(0)
    }

    fn from_status(status: ExitStatus, timed_out: bool, cancelled: bool) -> Self {
        Self {
            code: status.code(),
            timed_out,
            cancelled,
        }
    }
}

/// Wait for `child`, killing it on timeout or cancellation.
pub fn wait_until(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<WaitOutcome> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            warn!("command cancelled, killing");
            kill_quietly(child);
            let status = child.wait().context("wait command after kill")?;
            return Ok(WaitOutcome::from_status(status, false, true));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_quietly(child);
            let status = child.wait().context("wait command after kill")?;
            return Ok(WaitOutcome::from_status(status, true, false));
        }
        if let Some(status) = child
            .wait_timeout(remaining.min(POLL_INTERVAL))
            .context("wait for command")?
        {
            return Ok(WaitOutcome::from_status(status, false, false));
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns true if cancelled.
pub fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        thread::sleep(remaining.min(POLL_INTERVAL));
    }
}

fn kill_quietly(child: &mut Child) {
    if let Err(e) = child.kill() {
        // Already exited between the poll and the kill.
        debug!(err = %e, "kill failed");
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line (including its newline, if any) of live process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputChunk {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// A running child whose stdout/stderr lines arrive on a channel.
///
/// Nothing is buffered beyond the channel itself; once the receiver is
/// dropped, reader threads keep draining the pipes and discard the lines.
pub struct StreamingChild {
    child: Child,
    output: Receiver<OutputChunk>,
    readers: Vec<thread::JoinHandle<()>>,
}

impl StreamingChild {
    pub fn output(&self) -> &Receiver<OutputChunk> {
        &self.output
    }

    /// Exit status if the child has already exited.
    ///
    /// The output channel may still be open: a background process started by
    /// the child can hold the pipes after the child itself is gone.
    pub fn try_wait(&mut self) -> Result<Option<WaitOutcome>> {
        let status = self.child.try_wait().context("poll command")?;
        Ok(status.map(|status| {
            self.release_readers();
            WaitOutcome::from_status(status, false, false)
        }))
    }

    pub fn wait(&mut self, timeout: Duration, cancel: &CancellationToken) -> Result<WaitOutcome> {
        let outcome = wait_until(&mut self.child, timeout, cancel)?;
        self.release_readers();
        Ok(outcome)
    }

    pub fn kill(&mut self) -> Result<()> {
        kill_quietly(&mut self.child);
        Ok(())
    }

    /// Join readers that are done; detach the ones still blocked on a pipe
    /// some grandchild keeps open.
    fn release_readers(&mut self) {
        for handle in self.readers.drain(..) {
            if !handle.is_finished() {
                debug!("output pipe still open after exit, detaching reader");
                continue;
            }
            if handle.join().is_err() {
                warn!("output reader thread panicked");
            }
        }
    }
}

/// Spawn `cmd` with piped stdout/stderr streamed line-by-line.
#[instrument(skip_all)]
pub fn spawn_streaming(mut cmd: Command) -> std::io::Result<StreamingChild> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        readers.push(thread::spawn(move || {
            forward_lines(stdout, OutputStream::Stdout, tx);
        }));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(thread::spawn(move || {
            forward_lines(stderr, OutputStream::Stderr, tx);
        }));
    }
    debug!(pid = child.id(), "spawned streaming child");
    Ok(StreamingChild {
        child,
        output: rx,
        readers,
    })
}

fn forward_lines<R: Read>(reader: R, stream: OutputStream, tx: Sender<OutputChunk>) {
    let mut reader = BufReader::new(reader);
    let mut receiver_alive = true;
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if receiver_alive {
                    let chunk = OutputChunk {
                        stream,
                        text: String::from_utf8_lossy(&line).into_owned(),
                    };
                    receiver_alive = tx.send(chunk).is_ok();
                }
            }
            Err(e) => {
                warn!(err = %e, "failed to read child output");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn run_command_captures_stdout_and_stdin() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("cat; echo done");
        let output = run_command(
            cmd,
            Some(b"hello\n"),
            Duration::from_secs(10),
            1000,
            &CancellationToken::new(),
        )
        .expect("run");
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "hello\ndone\n");
    }

    #[test]
    fn run_command_truncates_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 0123456789");
        let output = run_command(cmd, None, Duration::from_secs(10), 4, &CancellationToken::new())
            .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn run_command_times_out() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let output = run_command(
            cmd,
            None,
            Duration::from_millis(100),
            100,
            &CancellationToken::new(),
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn cancelled_token_kills_child() {
        let token = CancellationToken::new();
        token.cancel();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let output = run_command(cmd, None, Duration::from_secs(10), 100, &token).expect("run");
        assert!(output.cancelled);
    }

    #[test]
    fn sleep_or_cancel_returns_early_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(sleep_or_cancel(Duration::from_secs(30), &token));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!sleep_or_cancel(
            Duration::from_millis(1),
            &CancellationToken::new()
        ));
    }

    #[test]
    fn streaming_child_delivers_lines_in_order() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo one; echo two; exit 3");
        let mut child = spawn_streaming(cmd).expect("spawn");
        let lines: Vec<String> = child
            .output()
            .iter()
            .filter(|chunk| chunk.stream == OutputStream::Stdout)
            .map(|chunk| chunk.text)
            .collect();
        assert_eq!(lines, vec!["one\n", "two\n"]);
        let outcome = child
            .wait(Duration::from_secs(10), &CancellationToken::new())
            .expect("wait");
        assert_eq!(outcome.code, Some(3));
        assert!(!outcome.success());
    }

    #[test]
    fn streaming_child_reports_exit_while_a_background_process_holds_the_pipe() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5 & echo started");
        let mut child = spawn_streaming(cmd).expect("spawn");
        let start = Instant::now();

        let outcome = loop {
            if let Some(outcome) = child.try_wait().expect("try_wait") {
                break outcome;
            }
            assert!(start.elapsed() < Duration::from_secs(3), "child never exited");
            thread::sleep(POLL_INTERVAL);
        };

        assert!(outcome.success());
        let waited = child
            .wait(Duration::from_secs(1), &CancellationToken::new())
            .expect("wait");
        assert_eq!(waited.code, Some(0));
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
