//! Container execution
//!
//! Runs a submission's test suite inside a container: either a single
//! image built from the challenge's Dockerfile, or a compose project for
//! multi-service challenges. Each run is linear: build, then run under a
//! wall-clock deadline, then tear down. The runner guarantees teardown
//! regardless of how the run ended.
//!
//! The runner does NOT:
//! - Interpret the captured output or compute verdicts
//! - Touch the score store
//! - Know which challenge a workspace belongs to beyond the spec it is
//!   handed

pub mod compose;
pub mod docker;

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::GradeError;

/// Container definition found in a challenge directory.
#[derive(Debug, Clone)]
pub enum ContainerSpec {
    /// Single image built from a Dockerfile; the tag is derived from the
    /// challenge name and shared across submissions.
    Image { tag: String, context: PathBuf },
    /// Multi-service compose file; each run gets a fresh project id.
    Compose { file: PathBuf },
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Wall-clock deadline for the run stage. The build stage is never
    /// cancelled by this deadline.
    pub deadline: Duration,
    /// Mount the workspace read-only inside the container.
    pub mount_read_only: bool,
}

/// Outcome of one container run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Stdout and stderr interleaved in arrival order. On timeout this is
    /// whatever was captured before the kill.
    pub output: String,
    /// The deadline expired and the run was forcibly terminated. Not an
    /// error: the captured output still goes to the parser.
    pub timed_out: bool,
}

#[async_trait]
pub trait ContainerRunner: Send + Sync {
    async fn run(
        &self,
        spec: &ContainerSpec,
        workspace: &Path,
        options: &RunOptions,
    ) -> Result<RunOutcome, GradeError>;
}

/// Runner backed by the local `docker` CLI.
pub struct DockerRunner;

#[async_trait]
impl ContainerRunner for DockerRunner {
    async fn run(
        &self,
        spec: &ContainerSpec,
        workspace: &Path,
        options: &RunOptions,
    ) -> Result<RunOutcome, GradeError> {
        match spec {
            ContainerSpec::Image { tag, context } => {
                docker::build_and_run(tag, context, workspace, options).await
            }
            ContainerSpec::Compose { file } => {
                compose::build_and_run(file, workspace, options).await
            }
        }
    }
}

/// Result of driving one child process to completion or deadline.
#[derive(Debug)]
pub(crate) struct Captured {
    pub output: String,
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Spawn the command, interleave stdout and stderr into one buffer in
/// arrival order, and wait for exit. With a deadline, expiry kills the
/// process and returns the output captured so far. A spawn failure is
/// [`GradeError::RunnerUnavailable`].
pub(crate) async fn run_with_deadline(
    cmd: &mut Command,
    deadline: Option<Duration>,
) -> Result<Captured, GradeError> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(GradeError::RunnerUnavailable)?;

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = drain(child.stdout.take(), Arc::clone(&buffer));
    let stderr_task = drain(child.stderr.take(), Arc::clone(&buffer));

    let waited = match deadline {
        Some(deadline) => tokio::time::timeout(deadline, child.wait()).await,
        None => Ok(child.wait().await),
    };

    let (status, timed_out) = match waited {
        Ok(Ok(status)) => (Some(status), false),
        Ok(Err(e)) => {
            return Err(GradeError::Internal(
                anyhow::Error::new(e).context("failed to wait for container process"),
            ))
        }
        Err(_elapsed) => {
            debug!("run deadline expired, killing container process");
            kill(&mut child).await;
            (None, true)
        }
    };

    // The pipes reach EOF once every holder lets go of them. A killed
    // process can leave children holding the write end, so after a
    // timeout the drain gets a short grace period instead of a full wait.
    let mut stdout_task = stdout_task;
    let mut stderr_task = stderr_task;
    if timed_out {
        let grace = Duration::from_secs(2);
        let _ = tokio::time::timeout(grace, &mut stdout_task).await;
        let _ = tokio::time::timeout(grace, &mut stderr_task).await;
        stdout_task.abort();
        stderr_task.abort();
    } else {
        let _ = stdout_task.await;
        let _ = stderr_task.await;
    }

    let output = {
        let buffer = buffer.lock().expect("capture buffer lock");
        String::from_utf8_lossy(&buffer).into_owned()
    };

    Ok(Captured {
        output,
        status,
        timed_out,
    })
}

fn drain(
    reader: Option<impl AsyncReadExt + Unpin + Send + 'static>,
    buffer: Arc<Mutex<Vec<u8>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut reader) = reader else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut buffer = buffer.lock().expect("capture buffer lock");
                    buffer.extend_from_slice(&chunk[..n]);
                }
            }
        }
    })
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("failed to kill container process: {}", e);
    }
    let _ = child.wait().await;
}

/// Fresh identifier for one compose run, so concurrent submissions never
/// share a project.
pub(crate) fn fresh_project_id() -> String {
    format!("grade-{}", uuid::Uuid::new_v4().simple())
}

/// A failed build surfaces the full captured build output.
pub(crate) fn build_failed(captured: &Captured) -> GradeError {
    GradeError::BuildFailed {
        detail: captured.output.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_ids_are_unique_per_run() {
        let a = fresh_project_id();
        let b = fresh_project_id();
        assert_ne!(a, b);
        assert!(a.starts_with("grade-"));
    }

    #[tokio::test]
    async fn missing_binary_is_runner_unavailable() {
        let mut cmd = Command::new("definitely-not-a-real-binary-4f9a");
        let err = run_with_deadline(&mut cmd, None).await.unwrap_err();
        assert!(matches!(err, GradeError::RunnerUnavailable(_)));
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr_together() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; echo done"]);
        let captured = run_with_deadline(&mut cmd, None).await.unwrap();
        assert!(captured.success());
        assert!(!captured.timed_out);
        assert!(captured.output.contains("out"));
        assert!(captured.output.contains("err"));
        assert!(captured.output.contains("done"));
    }

    #[tokio::test]
    async fn deadline_expiry_returns_partial_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo started; sleep 30; echo never"]);
        let captured = run_with_deadline(&mut cmd, Some(Duration::from_millis(300)))
            .await
            .unwrap();
        assert!(captured.timed_out);
        assert!(captured.status.is_none());
        assert!(captured.output.contains("started"));
        assert!(!captured.output.contains("never"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo failing tests; exit 3"]);
        let captured = run_with_deadline(&mut cmd, None).await.unwrap();
        assert!(!captured.success());
        assert!(!captured.timed_out);
        assert!(captured.output.contains("failing tests"));
    }
}
