//! Step process execution
//!
//! Runs one step as an external process and waits for it to exit, time out
//! or be cancelled:
//!
//! - `${VAR}` references are expanded from the stage [`Scope`]
//! - the child gets its own process group so the whole tree can be stopped
//! - stopping sends `TERM` to the group, then `KILL` after a grace period
//! - stdout and stderr are captured separately into bounded buffers
//! - captured text is redacted before it leaves this module
//!
//! ## Variable Expansion
//!
//! ```rust
//! use plinth::executor::expand_variables;
//!
//! let expanded = expand_variables("echo ${JOB_NAME}", |key| {
//!     (key == "JOB_NAME").then_some("webapp")
//! });
//! assert_eq!(expanded, "echo webapp");
//! ```
//!
//! ## Built-in Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `WORKSPACE` | Directory steps run in |
//! | `BUILD_ID` | Run ID (UUID) |
//! | `JOB_NAME` | Pipeline name |
//! | `STAGE_NAME` | Name of the current stage |

use super::cancel::CancellationToken;
use super::scope::Scope;
use crate::pipeline::{PipelineError, StepType};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 8 * 1024;
const MIN_READER_WAIT: Duration = Duration::from_millis(200);

/// Shell execution configuration
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Working directory
    pub cwd: PathBuf,

    /// Shell used for `shell` steps (default: sh)
    pub shell: String,

    /// Time between TERM and KILL
    pub kill_grace: Duration,

    /// Bytes kept per stream
    pub output_limit: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            shell: "sh".to_string(),
            kill_grace: Duration::from_secs(5),
            output_limit: 1024 * 1024,
        }
    }
}

/// How a step process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Process exited on its own; signals map to `128 + signo`
    Exited(i32),
    /// Process outlived its timeout and was stopped
    TimedOut,
    /// Process was stopped by a cancel request
    Cancelled,
}

/// Result of running one step
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// How the process ended
    pub exit: ExitKind,

    /// Redacted standard output
    pub stdout: String,

    /// Redacted standard error
    pub stderr: String,

    /// Duration of execution
    pub duration: Duration,

    /// Either stream hit the output limit
    pub truncated: bool,
}

impl StepOutput {
    /// Exit code, if the process exited on its own
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.exit {
            ExitKind::Exited(code) => Some(code),
            ExitKind::TimedOut | ExitKind::Cancelled => None,
        }
    }
}

/// Builder for step commands
#[derive(Debug, Clone)]
pub struct ShellCommand<'a> {
    config: &'a ShellConfig,
    timeout: Option<Duration>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> ShellCommand<'a> {
    /// Creates a new command builder
    #[must_use]
    pub fn new(config: &'a ShellConfig) -> Self {
        Self {
            config,
            timeout: None,
            cancel: None,
        }
    }

    /// Stops the process after `timeout`
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stops the process when `token` is cancelled
    #[must_use]
    pub fn cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Runs a step command inside `scope`
    ///
    /// A non-zero exit is not an error here; callers compare the code with
    /// the step's success set.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EngineFault`] if the process cannot be
    /// spawned or waited on.
    pub fn execute(&self, command: &StepType, scope: &Scope) -> Result<StepOutput, PipelineError> {
        let redactor = scope.redactor();
        let start = Instant::now();

        let mut cmd = match command {
            StepType::Echo { message } => {
                let text = redactor.redact(&scope.expand(message));
                tracing::info!(message = %text, "echo");
                return Ok(StepOutput {
                    exit: ExitKind::Exited(0),
                    stdout: format!("{text}\n"),
                    stderr: String::new(),
                    duration: start.elapsed(),
                    truncated: false,
                });
            }
            StepType::Shell { command } => {
                let script = scope.expand(command);
                tracing::debug!(command = %redactor.redact(&script), "Executing shell command");
                let mut cmd = Command::new(&self.config.shell);
                cmd.arg("-c").arg(script);
                cmd
            }
            StepType::Exec { argv } => {
                let argv: Vec<String> = argv.iter().map(|arg| scope.expand(arg)).collect();
                let Some((program, args)) = argv.split_first() else {
                    return Err(PipelineError::EngineFault("empty argv".to_string()));
                };
                tracing::debug!(
                    command = %redactor.redact(&shell_words::join(&argv)),
                    "Executing command"
                );
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        };

        cmd.current_dir(&self.config.cwd)
            .envs(scope.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| {
            PipelineError::EngineFault(format!(
                "failed to spawn {}: {e}",
                redactor.redact(&cmd.get_program().to_string_lossy())
            ))
        })?;

        let pid = child.id();
        let limit = self.config.output_limit;
        let stdout = SharedCapture::default();
        let stderr = SharedCapture::default();
        let (tx, rx) = mpsc::channel();
        let mut open = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            open.push(Stream::Stdout);
            spawn_reader(Stream::Stdout, out, Arc::clone(&stdout), limit, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            open.push(Stream::Stderr);
            spawn_reader(Stream::Stderr, err, Arc::clone(&stderr), limit, tx.clone());
        }
        drop(tx);

        let exit = self.wait(&mut child)?;

        // readers finish once every holder of the pipes is gone
        await_readers(&rx, &mut open, self.config.kill_grace.max(MIN_READER_WAIT));
        if !open.is_empty() {
            tracing::warn!(pid, "Output pipes held open after exit; stopping leftover processes");
            signal_group(pid, "KILL");
            await_readers(&rx, &mut open, MIN_READER_WAIT);
        }
        if !open.is_empty() {
            tracing::warn!(pid, streams = ?open, "Output pipes still open; keeping partial output");
        }

        let stdout = std::mem::take(&mut *stdout.lock());
        let stderr = std::mem::take(&mut *stderr.lock());
        let truncated = stdout.dropped > 0 || stderr.dropped > 0;
        let output = StepOutput {
            exit,
            stdout: stdout.render(scope, open.contains(&Stream::Stdout)),
            stderr: stderr.render(scope, open.contains(&Stream::Stderr)),
            duration: start.elapsed(),
            truncated,
        };

        tracing::debug!(
            exit = ?output.exit,
            duration_ms = output.duration.as_millis(),
            truncated,
            "Process finished"
        );
        Ok(output)
    }

    fn wait(&self, child: &mut Child) -> Result<ExitKind, PipelineError> {
        let start = Instant::now();
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| PipelineError::EngineFault(format!("wait failed: {e}")))?
            {
                return Ok(ExitKind::Exited(exit_code(status)));
            }
            if self.cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::warn!(pid = child.id(), "Stopping process on cancel");
                terminate(child, self.config.kill_grace);
                return Ok(ExitKind::Cancelled);
            }
            if self.timeout.is_some_and(|t| start.elapsed() >= t) {
                tracing::warn!(
                    pid = child.id(),
                    timeout = ?self.timeout,
                    "Stopping process on timeout"
                );
                terminate(child, self.config.kill_grace);
                return Ok(ExitKind::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

type SharedCapture = Arc<Mutex<Captured>>;

impl Captured {
    fn render(&self, scope: &Scope, incomplete: bool) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        if self.dropped == 0 && !incomplete {
            return scope.redactor().redact(&text);
        }
        let mut out = scope.redactor().redact_truncated(&text);
        if self.dropped > 0 {
            out.push_str(&format!("\n[... {} bytes truncated]", self.dropped));
        }
        if incomplete {
            out.push_str("\n[... output incomplete: pipe held open]");
        }
        out
    }
}

fn spawn_reader(
    stream: Stream,
    reader: impl Read + Send + 'static,
    into: SharedCapture,
    limit: usize,
    done: mpsc::Sender<Stream>,
) {
    std::thread::spawn(move || {
        capture(reader, &into, limit);
        let _ = done.send(stream);
    });
}

/// Reads a stream to EOF, keeping the first `limit` bytes
fn capture(mut reader: impl Read, into: &Mutex<Captured>, limit: usize) {
    let mut buf = [0_u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let mut captured = into.lock();
                let room = limit.saturating_sub(captured.bytes.len());
                let keep = n.min(room);
                captured.bytes.extend_from_slice(&buf[..keep]);
                captured.dropped = captured.dropped.saturating_add(n - keep);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
}

/// Waits up to `within` for the readers in `open` to reach EOF
fn await_readers(rx: &mpsc::Receiver<Stream>, open: &mut Vec<Stream>, within: Duration) {
    let start = Instant::now();
    while !open.is_empty() {
        let remaining = within.saturating_sub(start.elapsed());
        match rx.recv_timeout(remaining) {
            Ok(stream) => open.retain(|s| *s != stream),
            Err(_) => break,
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// Sends TERM to the process group, then KILL once `grace` has elapsed
fn terminate(child: &mut Child, grace: Duration) {
    let pid = child.id();
    signal_group(pid, "TERM");

    let start = Instant::now();
    while start.elapsed() < grace {
        if let Ok(Some(_)) = child.try_wait() {
            // leader is gone; clear out anything left in its group
            signal_group(pid, "KILL");
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    signal_group(pid, "KILL");
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: &str) {
    let _ = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _signal: &str) {}

/// Expands environment variables in a command string
///
/// Variables are expanded using the `${VAR_NAME}` syntax. If `lookup` has no
/// value for a variable, the reference is left unchanged for the shell.
pub fn expand_variables<'a, F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    static VAR_PATTERN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

    VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            caps.get(1)
                .and_then(|name| lookup(name.as_str()))
                .unwrap_or(whole)
                .to_string()
        })
        .into_owned()
}
