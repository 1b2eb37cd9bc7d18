//! Isolated worker processes.
//!
//! Every run of a test is a fresh OS process. The supervising thread polls
//! it, draining stdout and stderr on helper threads so a chatty child never
//! blocks on a full pipe, and kills it on timeout or cancellation.
//!
//! On Unix the worker leads its own process group and the whole group is
//! killed, so processes it forked die with it. Output draining is bounded
//! in any case: a descendant that still holds the pipes only costs
//! [`DRAIN_GRACE`] once the worker itself has ended.

use crate::cancel::CancellationToken;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long output readers may lag behind the worker's exit
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How the worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ExitInfo {
    /// Normal exit with a status code
    Code(i32),
    /// Terminated by a signal the harness did not send
    Signal(i32),
    /// Killed by the harness (timeout or cancellation)
    Killed,
}

impl ExitInfo {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitInfo::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitInfo::Signal(signal);
            }
        }
        ExitInfo::Signal(-1)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitInfo::Code(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitInfo::Code(code) => write!(f, "exit code {}", code),
            ExitInfo::Signal(signal) => write!(f, "signal {}", signal),
            ExitInfo::Killed => f.write_str("killed by harness"),
        }
    }
}

/// Everything observed about one worker process
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutcome {
    pub exit: ExitInfo,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Spawn `command` and wait for it, at most `timeout`.
pub fn run_isolated(
    mut command: Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::io::Result<RawOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    debug!(command = ?command, timeout_ms = timeout.as_millis() as u64, "spawning worker");

    let start = Instant::now();
    let mut child = command.spawn()?;
    let (done_tx, done_rx) = channel::unbounded();
    let stdout = child
        .stdout
        .take()
        .map(|stdout| OutputBuffer::drain(stdout, done_tx.clone()));
    let stderr = child
        .stderr
        .take()
        .map(|stderr| OutputBuffer::drain(stderr, done_tx.clone()));
    drop(done_tx);

    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if start.elapsed() >= timeout {
            timed_out = true;
        } else if cancel.is_cancelled() {
            cancelled = true;
        }
        if timed_out || cancelled {
            kill_worker(&mut child);
            break child.wait().ok();
        }
        thread::sleep(POLL_INTERVAL);
    };
    let elapsed = start.elapsed();

    let grace_end = Instant::now() + DRAIN_GRACE;
    let drain_deadline = if timed_out || cancelled {
        grace_end
    } else {
        (start + timeout).max(grace_end)
    };
    if !wait_for_readers(&done_rx, drain_deadline) {
        warn!(
            pid = child.id(),
            "worker descendants still hold its output pipes; output may be truncated"
        );
        kill_worker(&mut child);
    }

    let exit = match status {
        _ if timed_out || cancelled => ExitInfo::Killed,
        Some(status) => ExitInfo::from_status(status),
        None => ExitInfo::Killed,
    };
    Ok(RawOutcome {
        exit,
        stdout: stdout.map(|b| b.contents()).unwrap_or_default(),
        stderr: stderr.map(|b| b.contents()).unwrap_or_default(),
        elapsed,
        timed_out,
        cancelled,
    })
}

/// Kill the worker and, on Unix, every process left in its group.
fn kill_worker(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed_group = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if killed_group {
            return;
        }
        debug!(pid = child.id(), "process group kill failed; killing worker only");
    }
    let _ = child.kill();
}

/// Wait until every reader has hit end of file, or `deadline` passes.
fn wait_for_readers(done: &Receiver<()>, deadline: Instant) -> bool {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(()) => continue,
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }
}

/// Bytes read so far from one of the worker's pipes
struct OutputBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Read `reader` to end on a helper thread. `done` is dropped at end of
    /// file, so the receiver disconnects once every reader has finished.
    fn drain<R: Read + Send + 'static>(mut reader: R, done: channel::Sender<()>) -> Self {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&bytes);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                }
            }
            drop(done);
        });
        Self { bytes }
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}
