//! Process-based plugin execution with a wall-clock deadline.
//!
//! [`ProcessExecutor`] implements the [`PluginExecutor`] trait by spawning
//! the plugin's entry point in its own process group, writing the request
//! to stdin as a single JSON line, draining stdout and stderr on helper
//! threads, and polling the child until it exits or its time limit expires.
//!
//! On expiry the whole process group is killed with `SIGKILL` and reaped.
//! After a normal exit any remaining group members are killed as well, so no
//! descendant of a plugin outlives the call that started it. Output
//! collection shares the same deadline: a descendant that escaped the group
//! and still holds the pipes open turns the call into a timeout.

use std::io::{self, Read, Write};
use std::path::{Component, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::protocol::{PluginReply, PluginRequest, ReplyStatus};
use crate::registry::PluginEntry;
use crate::runner::{ExecutionResult, PluginExecutor};

/// Tracing target for plugin process operations.
const PROCESS_TARGET: &str = "evolver_plugins::process";

/// Default interval between exit-status polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result channel of a detached I/O thread.
type Worker<T> = Receiver<io::Result<T>>;

/// Executes plugins as child processes.
///
/// When the manifest declares a `runtime` the process is
/// `runtime <entry point>`; otherwise the entry point is executed directly.
/// The working directory is the plugin's own directory.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use std::time::Duration;
///
/// use evolver_plugins::process::ProcessExecutor;
/// use evolver_plugins::runner::PluginExecutor;
/// use evolver_plugins::{PluginEntry, PluginManifest, PluginRequest};
///
/// let manifest = PluginManifest::new("nine", "1.0.0").with_runtime("python3");
/// let entry = PluginEntry::new("nine", manifest, "plugins/nine".into());
/// let request = PluginRequest::new(Default::default(), Path::new("out"), entry.manifest());
/// let result = ProcessExecutor::new().execute(&entry, &request, Duration::from_secs(15));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ProcessExecutor {
    poll_interval: Duration,
}

impl ProcessExecutor {
    /// Creates an executor with the default poll interval.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides how often the child's exit status is polled.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginExecutor for ProcessExecutor {
    fn execute(
        &self,
        entry: &PluginEntry,
        request: &PluginRequest,
        time_limit: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        let name = entry.name();
        let mut command = build_command(entry)?;
        let payload = encode_request(name, request)?;

        debug!(
            target: PROCESS_TARGET,
            plugin = name,
            program = ?command.get_program(),
            limit_s = time_limit.as_secs_f64(),
            "spawning plugin process"
        );

        let started = Instant::now();
        let deadline = started.checked_add(time_limit);
        let mut child = command
            .spawn()
            .map_err(|err| ExecutionError::SpawnFailed {
                name: name.to_owned(),
                message: err.to_string(),
                source: Some(Arc::new(err)),
            })?;

        let writer = child
            .stdin
            .take()
            .map(|stdin| spawn_worker(move || feed_stdin(stdin, &payload)));
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = match wait_with_deadline(&mut child, deadline, self.poll_interval) {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(
                    target: PROCESS_TARGET,
                    plugin = name,
                    limit_s = time_limit.as_secs_f64(),
                    "plugin timed out, killing process group"
                );
                terminate_group(name, &mut child);
                drop(child.wait());
                // Workers are detached: an escaped descendant may still hold
                // the pipes open.
                return Err(ExecutionError::Timeout {
                    name: name.to_owned(),
                    limit: time_limit,
                });
            }
            Err(err) => {
                terminate_group(name, &mut child);
                drop(child.wait());
                return Err(ExecutionError::io(name, err));
            }
        };
        let elapsed = started.elapsed();
        terminate_group(name, &mut child);

        // A descendant that left the process group can keep the pipes open;
        // output collection shares the execution deadline.
        let collect = Collect {
            name,
            deadline,
            limit: time_limit,
        };
        collect.finish(writer)?;
        let stdout_bytes = collect.finish(stdout)?;
        let stderr_text = String::from_utf8_lossy(&collect.finish(stderr)?).into_owned();

        debug!(
            target: PROCESS_TARGET,
            plugin = name,
            ?status,
            stdout_bytes = stdout_bytes.len(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "plugin process exited"
        );
        if !stderr_text.trim().is_empty() {
            debug!(
                target: PROCESS_TARGET,
                plugin = name,
                stderr = %stderr_text.trim(),
                "plugin stderr output"
            );
        }

        interpret(name, status, stdout_bytes, stderr_text, elapsed)
    }
}

/// Builds the command line for a plugin, rooted in its directory.
fn build_command(entry: &PluginEntry) -> Result<Command, ExecutionError> {
    let entry_point = resolve_entry_point(entry)?;
    let mut command = entry.manifest().runtime().map_or_else(
        || Command::new(&entry_point),
        |runtime| {
            let mut interpreted = Command::new(runtime);
            interpreted.arg(&entry_point);
            interpreted
        },
    );
    command
        .current_dir(entry_point_dir(entry)?)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    Ok(command)
}

fn entry_point_dir(entry: &PluginEntry) -> Result<PathBuf, ExecutionError> {
    std::path::absolute(entry.location()).map_err(|err| ExecutionError::SpawnFailed {
        name: entry.name().to_owned(),
        message: format!(
            "cannot resolve plugin directory {}: {err}",
            entry.location().display()
        ),
        source: Some(Arc::new(err)),
    })
}

/// Resolves the manifest entry point to an absolute path inside the plugin
/// directory.
fn resolve_entry_point(entry: &PluginEntry) -> Result<PathBuf, ExecutionError> {
    let relative = entry.manifest().entry_point();
    let confined = !relative.as_os_str().is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !confined {
        return Err(spawn_failed(
            entry.name(),
            format!(
                "entry point '{}' must be a relative path inside the plugin directory",
                relative.display()
            ),
        ));
    }

    let path = entry_point_dir(entry)?.join(relative);
    if !path.is_file() {
        return Err(spawn_failed(
            entry.name(),
            format!("entry point {} does not exist", path.display()),
        ));
    }
    Ok(path)
}

fn spawn_failed(name: &str, message: String) -> ExecutionError {
    ExecutionError::SpawnFailed {
        name: name.to_owned(),
        message,
        source: None,
    }
}

fn encode_request(name: &str, request: &PluginRequest) -> Result<Vec<u8>, ExecutionError> {
    let mut line = serde_json::to_vec(request).map_err(|err| {
        spawn_failed(name, format!("request could not be serialised: {err}"))
    })?;
    line.push(b'\n');
    Ok(line)
}

/// Writes the request and closes stdin. A plugin that exits without reading
/// its input is not an error.
fn feed_stdin(mut stdin: ChildStdin, payload: &[u8]) -> io::Result<()> {
    match stdin.write_all(payload).and_then(|()| stdin.flush()) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

/// Runs `work` on a detached thread and hands its result back over a channel.
fn spawn_worker<T, F>(work: F) -> Worker<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || drop(sender.send(work())));
    receiver
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<Worker<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut source| {
        spawn_worker(move || {
            let mut buffer = Vec::new();
            source.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
    })
}

/// Gathers worker results against the execution deadline.
struct Collect<'a> {
    name: &'a str,
    deadline: Option<Instant>,
    limit: Duration,
}

impl Collect<'_> {
    fn finish<T: Default>(&self, worker: Option<Worker<T>>) -> Result<T, ExecutionError> {
        let Some(receiver) = worker else {
            return Ok(T::default());
        };
        let received = self.deadline.map_or_else(
            || receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            |at| receiver.recv_timeout(at.saturating_duration_since(Instant::now())),
        );
        match received {
            Ok(result) => result.map_err(|err| ExecutionError::io(self.name, err)),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    target: PROCESS_TARGET,
                    plugin = self.name,
                    limit_s = self.limit.as_secs_f64(),
                    "plugin output still open at deadline"
                );
                Err(ExecutionError::Timeout {
                    name: self.name.to_owned(),
                    limit: self.limit,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(ExecutionError::io(
                self.name,
                io::Error::other("plugin I/O worker panicked"),
            )),
        }
    }
}

/// Polls the child until it exits or `deadline` passes. `Ok(None)` means the
/// deadline passed with the child still running.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Instant>,
    poll_interval: Duration,
) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let remaining = deadline.map(|at| at.saturating_duration_since(Instant::now()));
        if remaining == Some(Duration::ZERO) {
            return Ok(None);
        }
        thread::sleep(remaining.map_or(poll_interval, |left| left.min(poll_interval)));
    }
}

/// Kills every process in the child's group.
#[cfg(unix)]
fn terminate_group(name: &str, child: &mut Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        drop(child.kill());
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            debug!(
                target: PROCESS_TARGET,
                plugin = name,
                error = %err,
                "process group kill failed, killing child only"
            );
            drop(child.kill());
        }
    }
}

#[cfg(not(unix))]
fn terminate_group(_name: &str, child: &mut Child) {
    drop(child.kill());
}

/// Turns a finished process into a result or a classified failure.
fn interpret(
    name: &str,
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: String,
    elapsed: Duration,
) -> Result<ExecutionResult, ExecutionError> {
    if !status.success() {
        return Err(ExecutionError::NonZeroExit {
            name: name.to_owned(),
            status: status.code().unwrap_or(-1),
            stderr,
        });
    }

    let text = String::from_utf8(stdout).map_err(|err| ExecutionError::MalformedReply {
        name: name.to_owned(),
        message: format!("stdout is not valid UTF-8: {err}"),
    })?;

    let reply = PluginReply::parse(&text, &stderr);
    if let PluginReply::Structured(structured) = &reply
        && structured.status() == ReplyStatus::Error
    {
        return Err(ExecutionError::Reported {
            name: name.to_owned(),
            detail: structured.error_detail().cloned().unwrap_or_default(),
        });
    }

    Ok(ExecutionResult::new(name, reply, elapsed))
}
