//! Compose runner
//!
//! Multi-service challenges carry a compose file instead of a single
//! Dockerfile. Every run gets a fresh project identifier so concurrent
//! submissions never collide on container or network names, the
//! submission workspace is handed to the services through the
//! `SUBMISSION_DIR` environment variable, and the whole project is torn
//! down (containers, networks, locally built images, volumes) after
//! completion or timeout so nothing accumulates across submissions.

use std::path::Path;

use tokio::process::Command;
use tracing::{info, warn};

use super::{build_failed, fresh_project_id, run_with_deadline, RunOptions, RunOutcome};
use crate::error::GradeError;

/// Environment variable a compose file uses to reach the workspace.
pub const SUBMISSION_DIR_VAR: &str = "SUBMISSION_DIR";

pub(crate) async fn build_and_run(
    file: &Path,
    workspace: &Path,
    options: &RunOptions,
) -> Result<RunOutcome, GradeError> {
    let project = fresh_project_id();

    info!("building compose project {}", project);
    let mut build = Command::new("docker");
    build
        .args(compose_args(file, &project, &["build"]))
        .env(SUBMISSION_DIR_VAR, workspace);
    let built = run_with_deadline(&mut build, None).await?;
    if !built.success() {
        warn!("compose build failed for project {}", project);
        teardown(file, &project, workspace).await;
        return Err(build_failed(&built));
    }

    info!("running compose project {}", project);
    let mut up = Command::new("docker");
    up.args(compose_args(
        file,
        &project,
        &["up", "--abort-on-container-exit"],
    ))
    .env(SUBMISSION_DIR_VAR, workspace);
    let result = run_with_deadline(&mut up, Some(options.deadline)).await;

    // Teardown runs no matter how the run ended.
    teardown(file, &project, workspace).await;

    let captured = result?;
    if captured.timed_out {
        warn!(
            "compose project {} hit the {}ms deadline",
            project,
            options.deadline.as_millis()
        );
    }

    Ok(RunOutcome {
        output: captured.output,
        timed_out: captured.timed_out,
    })
}

/// Stop and remove everything the run created. Failures are logged, not
/// propagated: the grading outcome is already decided by this point.
async fn teardown(file: &Path, project: &str, workspace: &Path) {
    let mut down = Command::new("docker");
    down.args(compose_args(
        file,
        project,
        &["down", "--rmi", "local", "--volumes", "--remove-orphans"],
    ))
    .env(SUBMISSION_DIR_VAR, workspace);

    match run_with_deadline(&mut down, None).await {
        Ok(captured) if !captured.success() => {
            warn!("compose teardown for {} exited non-zero", project);
        }
        Ok(_) => {}
        Err(e) => warn!("compose teardown for {} failed: {}", project, e),
    }
}

fn compose_args(file: &Path, project: &str, tail: &[&str]) -> Vec<String> {
    let mut args = vec![
        "compose".to_string(),
        "-f".to_string(),
        file.display().to_string(),
        "-p".to_string(),
        project.to_string(),
    ];
    args.extend(tail.iter().map(|s| s.to_string()));
    args
}
