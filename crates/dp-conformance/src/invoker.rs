use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use dp_types::{DetectorMode, EngineVerdict, VerdictPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_micros(200);
const MAX_STDERR_EXCERPT_BYTES: usize = 512;
/// Minimum wait for a pipe to reach EOF once the engine has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(20);

/// Both engines' verdicts for one input plus the wall-clock cost of the
/// round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub pair: VerdictPair,
    pub elapsed: Duration,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvocationFailure {
    #[error("engine invocation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("failed to spawn engine command: {0}")]
    Spawn(String),
    #[error("engine command exited with status {status}: {stderr}")]
    ExitStatus { status: i32, stderr: String },
    #[error("engine output is not a parseable verdict: {0}")]
    Parse(String),
    #[error("engine output contained no verdict records")]
    EmptyResponse,
}

/// The single black-box round trip to both engines under test.
pub trait EngineInvoker: Send + Sync {
    fn invoke(&self, mode: DetectorMode, input: &[u8]) -> Result<Invocation, InvocationFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: PathBuf,
    /// Arguments placed before `<mode> --json -i <input>`.
    pub prefix_args: Vec<String>,
    pub timeout_ms: u64,
}

impl EngineConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("target/release/compare"),
            prefix_args: Vec::new(),
            timeout_ms: 5_000,
        }
    }
}

/// Drives the comparison tool as a child process, one process per input:
/// `<program> [prefix_args..] <mode> --json -i <input>`.
#[derive(Debug, Clone)]
pub struct SubprocessInvoker {
    config: EngineConfig,
}

impl SubprocessInvoker {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl EngineInvoker for SubprocessInvoker {
    fn invoke(&self, mode: DetectorMode, input: &[u8]) -> Result<Invocation, InvocationFailure> {
        let timeout = self.config.timeout();
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let mut child = Command::new(&self.config.program)
            .args(&self.config.prefix_args)
            .arg(mode.as_str())
            .arg("--json")
            .arg("-i")
            .arg(input_arg(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| InvocationFailure::Spawn(err.to_string()))?;

        // On an early return the receivers drop and the reader threads are
        // left to finish whenever the last writer closes the pipe.
        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());
        let status = wait_with_timeout(&mut child, timeout)?;
        let elapsed = started.elapsed();

        // A descendant of the engine can keep the pipes open after the
        // engine itself exits; the deadline still applies.
        let stdout =
            collect_pipe(stdout_reader, deadline).ok_or_else(|| timeout_failure(timeout))?;
        let stderr = collect_pipe(stderr_reader, deadline).unwrap_or_default();

        if !status.success() {
            return Err(InvocationFailure::ExitStatus {
                status: status.code().unwrap_or(-1),
                stderr: stderr_excerpt(&stderr),
            });
        }

        let pair = parse_engine_output(&stdout)?;
        Ok(Invocation { pair, elapsed })
    }
}

#[cfg(unix)]
fn input_arg(input: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::OsStr::from_bytes(input).to_os_string()
}

#[cfg(not(unix))]
fn input_arg(input: &[u8]) -> OsString {
    OsString::from(String::from_utf8_lossy(input).into_owned())
}

fn spawn_pipe_reader<R>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = pipe.read_to_end(&mut bytes);
            let _ = tx.send(bytes);
        });
        rx
    })
}

/// `None` when the pipe is still open at `deadline`.
fn collect_pipe(reader: Option<Receiver<Vec<u8>>>, deadline: Option<Instant>) -> Option<Vec<u8>> {
    let Some(reader) = reader else {
        return Some(Vec::new());
    };
    let received = match deadline {
        Some(deadline) => reader.recv_timeout(
            deadline
                .saturating_duration_since(Instant::now())
                .max(PIPE_DRAIN_GRACE),
        ),
        None => reader.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
        Ok(bytes) => Some(bytes),
        Err(RecvTimeoutError::Disconnected) => Some(Vec::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

fn timeout_failure(timeout: Duration) -> InvocationFailure {
    InvocationFailure::Timeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus, InvocationFailure> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(err) => {
                terminate_and_reap_child(child);
                return Err(InvocationFailure::Spawn(format!(
                    "engine process wait failed: {err}"
                )));
            }
        }

        if started.elapsed() >= timeout {
            terminate_and_reap_child(child);
            return Err(timeout_failure(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn terminate_and_reap_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let end = stderr.len().min(MAX_STDERR_EXCERPT_BYTES);
    String::from_utf8_lossy(&stderr[..end]).trim().to_owned()
}

#[derive(Debug, Deserialize)]
struct ComparisonRecord {
    rust_result: WireVerdict,
    c_result: WireVerdict,
}

/// sqli records carry `{is_injection, fingerprint}`; xss records a bare bool.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireVerdict {
    Flag(bool),
    Detailed {
        is_injection: bool,
        #[serde(default)]
        fingerprint: Option<String>,
    },
}

impl From<WireVerdict> for EngineVerdict {
    fn from(wire: WireVerdict) -> Self {
        match wire {
            WireVerdict::Flag(is_positive) => Self {
                is_positive,
                fingerprint: None,
            },
            WireVerdict::Detailed {
                is_injection,
                fingerprint,
            } => Self {
                is_positive: is_injection,
                fingerprint,
            },
        }
    }
}

/// Parses the comparison tool's `--json` stdout. The C engine is the
/// reference, the Rust engine the candidate. Only the first record is used.
pub fn parse_engine_output(stdout: &[u8]) -> Result<VerdictPair, InvocationFailure> {
    let records: Vec<ComparisonRecord> = serde_json::from_slice(stdout)
        .map_err(|err| InvocationFailure::Parse(err.to_string()))?;
    let record = records
        .into_iter()
        .next()
        .ok_or(InvocationFailure::EmptyResponse)?;
    Ok(VerdictPair::new(
        record.c_result.into(),
        record.rust_result.into(),
    ))
}
