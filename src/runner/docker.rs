//! Single-image runner
//!
//! Builds the challenge's Dockerfile into an image tagged after the
//! challenge and runs it with the submission workspace bind-mounted. The
//! tag is shared by every submission to the same challenge: a rebuild
//! only pays off when the Dockerfile changed, but concurrent submissions
//! can race on it (builds are not serialized per challenge).

use std::path::Path;

use tokio::process::Command;
use tracing::{info, warn};

use super::{build_failed, run_with_deadline, RunOptions, RunOutcome};
use crate::error::GradeError;

/// Mount point of the submission workspace inside the container.
pub const WORKSPACE_MOUNT: &str = "/app";

pub(crate) async fn build_and_run(
    tag: &str,
    context: &Path,
    workspace: &Path,
    options: &RunOptions,
) -> Result<RunOutcome, GradeError> {
    info!("building image {}", tag);
    let mut build = Command::new("docker");
    build.args(build_args(tag)).current_dir(context);
    let built = run_with_deadline(&mut build, None).await?;
    if !built.success() {
        warn!("image build failed for {}", tag);
        return Err(build_failed(&built));
    }

    info!("running image {}", tag);
    let mut run = Command::new("docker");
    run.args(run_args(tag, workspace, options.mount_read_only));
    let captured = run_with_deadline(&mut run, Some(options.deadline)).await?;
    if captured.timed_out {
        warn!("run of {} hit the {}ms deadline", tag, options.deadline.as_millis());
    }

    // A non-zero exit is the test suite failing, not the runner failing;
    // the container itself is removed by --rm.
    Ok(RunOutcome {
        output: captured.output,
        timed_out: captured.timed_out,
    })
}

fn build_args(tag: &str) -> Vec<String> {
    vec!["build".into(), "-t".into(), tag.into(), ".".into()]
}

fn run_args(tag: &str, workspace: &Path, read_only: bool) -> Vec<String> {
    let mode = if read_only { ":ro" } else { "" };
    vec![
        "run".into(),
        "--rm".into(),
        "-v".into(),
        format!("{}:{}{}", workspace.display(), WORKSPACE_MOUNT, mode),
        tag.into(),
    ]
}
