//! Time-bounded subprocess execution.
//!
//! Every backend process is started in its own process group. On timeout
//! (or if the awaiting future is dropped) the whole group is killed, so
//! helpers forked by the backend (office suites fork a worker) die with it,
//! and the direct child is reaped before the error is returned.

use crate::error::ConvertError;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// How long to keep draining stdout/stderr after the child has exited.
const PIPE_GRACE: Duration = Duration::from_secs(2);

/// Longest diagnostic text kept from a failed process.
const MAX_DIAGNOSTIC: usize = 2_000;

/// Captured result of a process that exited on its own.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Trimmed stderr, or stdout when stderr is empty, truncated from the front.
    pub fn diagnostic(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        tail(text, MAX_DIAGNOSTIC)
    }
}

/// Run `cmd` to completion or until `timeout` elapses.
///
/// `backend` only labels errors. A spawn failure of kind `NotFound` or
/// `PermissionDenied` maps to [`ConvertError::BackendUnavailable`] so callers
/// can try an alternate executable; any other spawn failure is internal.
pub async fn run(
    mut cmd: Command,
    backend: &str,
    timeout: Duration,
) -> Result<ProcessOutput, ConvertError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    debug!(backend, command = ?cmd.as_std(), timeout_ms = timeout.as_millis() as u64, "Spawning backend");

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        if super::is_unavailable(&e) {
            ConvertError::BackendUnavailable {
                backend: backend.to_string(),
                detail: format!("cannot start '{program}': {e}"),
            }
        } else {
            ConvertError::Internal(format!("spawning '{program}' failed: {e}"))
        }
    })?;

    let mut group = GroupGuard::new(child.id());
    let stdout = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr = tokio::spawn(read_pipe(child.stderr.take()));

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            group.kill();
            let _ = child.kill().await;
            stdout.abort();
            stderr.abort();
            return Err(ConvertError::Internal(format!(
                "waiting on '{program}' failed: {e}"
            )));
        }
        Err(_) => {
            warn!(backend, program = %program, timeout_ms = timeout.as_millis() as u64, "Backend timed out; killing process group");
            group.kill();
            // Reaps the child; the error is only returned once it is gone.
            if let Err(e) = child.kill().await {
                debug!(backend, error = %e, "kill after timeout");
            }
            stdout.abort();
            stderr.abort();
            return Err(ConvertError::ConversionTimeout {
                backend: backend.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
    };
    group.disarm();
    let duration = start.elapsed();

    let stdout = drain(stdout).await;
    let stderr = drain(stderr).await;
    debug!(
        backend,
        code = ?status.code(),
        duration_ms = duration.as_millis() as u64,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        "Backend exited"
    );

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        duration,
    })
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Collect a pipe reader, giving up if a surviving grandchild holds it open.
async fn drain(handle: tokio::task::JoinHandle<String>) -> String {
    let abort = handle.abort_handle();
    match tokio::time::timeout(PIPE_GRACE, handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &text[start..])
}

/// Kills the child's process group unless disarmed.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions; ESRCH is ignored.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}
