//! Running snippets in the target interpreter.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::runtime::error::{GraphError, GraphResult};

/// How long to wait for the output readers once the interpreter is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Result of one snippet execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub succeeded: bool,
    pub output: String,
    pub error_message: Option<String>,
    pub stacktrace: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
            error_message: None,
            stacktrace: None,
        }
    }

    pub fn failure(message: impl Into<String>, stacktrace: Option<String>) -> Self {
        Self {
            succeeded: false,
            output: String::new(),
            error_message: Some(message.into()),
            stacktrace,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

/// Executes code and reports success or failure.
///
/// Ordinary runtime errors, timeouts and crashes are failed outcomes. `Err`
/// is reserved for infrastructure problems such as a missing interpreter.
pub trait ExecutionSandbox: Send + Sync {
    fn execute(&self, code: &str, timeout: Duration) -> GraphResult<ExecutionOutcome>;
}

/// Runs snippets with a local `julia` binary, one process per snippet.
#[derive(Clone, Debug)]
pub struct JuliaSandbox {
    binary: PathBuf,
    args: Vec<String>,
    output_limit_bytes: usize,
}

impl Default for JuliaSandbox {
    fn default() -> Self {
        Self::new("julia")
    }
}

impl JuliaSandbox {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: vec!["--startup-file=no".to_string(), "--color=no".to_string()],
            output_limit_bytes: 256 * 1024,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }
}

impl ExecutionSandbox for JuliaSandbox {
    #[instrument(skip_all, fields(binary = %self.binary.display(), timeout_secs = timeout.as_secs()))]
    fn execute(&self, code: &str, timeout: Duration) -> GraphResult<ExecutionOutcome> {
        let mut script = tempfile::Builder::new()
            .prefix("snippet-")
            .suffix(".jl")
            .tempfile()
            .map_err(|err| GraphError::io("creating snippet file", err))?;
        script
            .write_all(code.as_bytes())
            .and_then(|()| script.flush())
            .map_err(|err| GraphError::io("writing snippet file", err))?;

        let mut command = Command::new(&self.binary);
        command
            .args(&self.args)
            .arg(script.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // The snippet and everything it spawns share one process group, so
        // a timeout can take down grandchildren holding the output pipes.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!("spawning interpreter");
        let mut child = command.spawn().map_err(|err| {
            GraphError::io(format!("starting {}", self.binary.display()), err)
        })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(GraphError::ExecutionError {
                node: "sandbox".to_string(),
                message: "interpreter pipes were not captured".to_string(),
            });
        };
        let limit = self.output_limit_bytes;
        let stdout_rx = spawn_reader(stdout, limit);
        let stderr_rx = spawn_reader(stderr, limit);

        let status = child
            .wait_timeout(timeout)
            .map_err(|err| GraphError::io("waiting for interpreter", err))?;
        let timed_out = status.is_none();
        let status = match status {
            Some(status) => {
                // Background processes left behind by the snippet.
                kill_process_group(&mut child)
                    .map_err(|err| GraphError::io("stopping leftover processes", err))?;
                status
            }
            None => {
                warn!("snippet timed out, killing interpreter");
                kill_process_group(&mut child)
                    .and_then(|()| child.wait())
                    .map_err(|err| GraphError::io("stopping interpreter", err))?
            }
        };

        let stdout = collect_output(&stdout_rx);
        let stderr = collect_output(&stderr_rx);
        debug!(exit_code = ?status.code(), timed_out, "interpreter finished");

        if timed_out {
            return Ok(ExecutionOutcome::failure(
                format!("execution timed out after {}s", timeout.as_secs()),
                None,
            )
            .with_output(stdout));
        }
        if status.success() {
            return Ok(ExecutionOutcome::success(stdout));
        }

        let (message, stacktrace) = split_julia_error(&stderr);
        let message = if message.is_empty() {
            match status.code() {
                Some(code) => format!("interpreter exited with status {code}"),
                None => "interpreter terminated by a signal".to_string(),
            }
        } else {
            message
        };
        Ok(ExecutionOutcome::failure(message, stacktrace).with_output(stdout))
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
    }
    Ok(buf)
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
) -> Receiver<std::io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_limited(reader, limit));
    });
    rx
}

/// Output read so far. A process that escaped the group can keep a pipe
/// open forever, so the reader gets [`READER_GRACE`] and is then abandoned.
fn collect_output(rx: &Receiver<std::io::Result<Vec<u8>>>) -> String {
    match rx.recv_timeout(READER_GRACE) {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(err)) => {
            warn!(error = %err, "failed reading interpreter output");
            String::new()
        }
        Err(_) => {
            warn!("interpreter output still open, giving up on it");
            String::new()
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    // The group is already empty.
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    match child.kill() {
        Err(err) if err.kind() != std::io::ErrorKind::InvalidInput => Err(err),
        _ => Ok(()),
    }
}

/// Split interpreter stderr into the error message and the raw stack trace.
pub fn split_julia_error(stderr: &str) -> (String, Option<String>) {
    let mut message = Vec::new();
    let mut trace = Vec::new();
    let mut in_trace = false;
    for line in stderr.lines() {
        if !in_trace && line.trim() == "Stacktrace:" {
            in_trace = true;
            continue;
        }
        if in_trace {
            trace.push(line);
        } else {
            message.push(line);
        }
    }

    let mut message = message.join("\n").trim().to_string();
    for marker in ["ERROR: ", "LoadError: "] {
        if let Some(rest) = message.strip_prefix(marker) {
            message = rest.to_string();
        }
    }
    let trace = trace.join("\n");
    let trace = (!trace.trim().is_empty()).then(|| trace.trim_end().to_string());
    (message, trace)
}
