//! Job process supervision.
//!
//! Every spawned child is owned by a single supervision task. However the
//! child ends (normal exit, signal, wait failure), the task reports exactly
//! one [`ProcessExit`] through the caller's callback. Kill requests reach
//! the child through its [`ProcessHandle`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use transcode_core::task::TaskOutcome;
use transcode_core::types::{RunId, TaskId};

use crate::error::SpawnError;

/// Command used for diagnostic payloads.
const DIAGNOSTIC_PROGRAM: &str = "sleep";

/// What to run for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Complete environment for the child. `None` inherits the worker's.
    pub env: Option<HashMap<String, String>>,
    /// Working directory. `None` uses the worker's.
    pub cwd: Option<PathBuf>,
}

impl JobSpec {
    /// A `sleep` of the given duration in the worker's own environment.
    pub fn diagnostic(duration: Duration) -> Self {
        Self {
            program: PathBuf::from(DIAGNOSTIC_PROGRAM),
            args: vec![duration.as_secs_f64().to_string()],
            env: None,
            cwd: None,
        }
    }
}

/// Reported once per spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub task_id: TaskId,
    pub run_id: RunId,
    pub outcome: TaskOutcome,
}

/// Owning handle to a supervised process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, kill_tx: oneshot::Sender<()>) -> Self {
        Self {
            pid,
            kill_tx: Some(kill_tx),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the supervisor to send SIGTERM to the process.
    ///
    /// Does not wait for the process to exit. Returns `false` if a kill was
    /// already requested or the supervisor has finished.
    pub fn kill(&mut self) -> bool {
        match self.kill_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Spawn `spec` and supervise it on a background task.
///
/// The child's stdout and stderr are inherited, so its output goes straight
/// to the worker's own streams. `on_exit` is invoked exactly once, after
/// the child has been reaped.
pub fn spawn_supervised<F>(
    spec: &JobSpec,
    task_id: &str,
    run_id: RunId,
    on_exit: F,
) -> Result<ProcessHandle, SpawnError>
where
    F: FnOnce(ProcessExit) + Send + 'static,
{
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    if let Some(env) = &spec.env {
        cmd.env_clear().envs(env);
    }
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let child = cmd.spawn().map_err(|source| SpawnError {
        program: spec.program.display().to_string(),
        source,
    })?;
    let pid = child.id();

    tracing::debug!(task_id, run_id, pid, program = %spec.program.display(), "Process spawned");

    let (kill_tx, kill_rx) = oneshot::channel();
    let task_id = task_id.to_string();

    tokio::spawn(async move {
        let outcome = supervise(child, kill_rx, &task_id).await;
        on_exit(ProcessExit {
            task_id,
            run_id,
            outcome,
        });
    });

    Ok(ProcessHandle::new(pid, kill_tx))
}

async fn supervise(mut child: Child, kill_rx: oneshot::Receiver<()>, task_id: &str) -> TaskOutcome {
    let status = tokio::select! {
        status = child.wait() => status,
        requested = kill_rx => {
            // A dropped handle is not a kill request; keep waiting.
            if requested.is_ok() {
                if let Err(e) = terminate(&mut child) {
                    tracing::warn!(task_id, error = %e, "Failed to signal process");
                }
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => TaskOutcome::Exited {
            code: status.code(),
        },
        Err(e) => TaskOutcome::Error {
            message: e.to_string(),
        },
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // Safety: the child has not been reaped yet, so `pid` still names it.
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
