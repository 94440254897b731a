//! Submission orchestration
//!
//! Sequences one grading run end to end: wrap the upload in the size
//! guard, extract into a fresh workspace, merge instructor overrides, run
//! the container under the challenge's deadline, parse the output, and
//! record the score. The workspace is created here and removed here, on
//! every exit path, exactly once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use futures_util::Stream;
use tracing::{info, warn};

use crate::archive;
use crate::challenge::Challenge;
use crate::error::GradeError;
use crate::meter::MeteredStream;
use crate::overwrite;
use crate::parser::{self, TestReport};
use crate::runner::{ContainerRunner, RunOptions};
use crate::session::UserIdentity;
use crate::store::ScoreStore;

/// What the caller gets back from a completed grading run.
#[derive(Debug)]
pub struct GradeOutcome {
    pub report: TestReport,
    /// `None` when the run produced no countable tests; no record was
    /// persisted in that case.
    pub score: Option<f64>,
    /// The container run was cut off at the deadline; the report covers
    /// the output captured up to that point.
    pub timed_out: bool,
}

pub struct SubmissionOrchestrator {
    store: Arc<ScoreStore>,
    runner: Arc<dyn ContainerRunner>,
    work_root: PathBuf,
}

impl SubmissionOrchestrator {
    pub fn new(
        store: Arc<ScoreStore>,
        runner: Arc<dyn ContainerRunner>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            runner,
            work_root: work_root.into(),
        }
    }

    /// Grade one upload against a challenge. Every failure mode comes
    /// back as a [`GradeError`]; the workspace is gone by the time this
    /// returns either way.
    pub async fn submit<S, B, E>(
        &self,
        challenge: &Challenge,
        user: &UserIdentity,
        upload: S,
    ) -> Result<GradeOutcome, GradeError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Into<anyhow::Error>,
    {
        let workspace = Workspace::create(&self.work_root, &challenge.name, &user.id)?;
        info!(
            "grading submission for {} on {} in {}",
            user.username,
            challenge.name,
            workspace.path().display()
        );

        let metered = MeteredStream::new(upload, challenge.config.max_upload_bytes);
        archive::extract_stream(metered, workspace.path()).await?;

        if let Some(override_dir) = challenge.overwrite_dir() {
            overwrite::merge_with_hooks(
                workspace.path(),
                &override_dir,
                challenge.hooks.as_deref(),
            )
            .await?;
        }

        let spec = challenge.container()?;
        let options = RunOptions {
            deadline: challenge.config.max_run_time,
            mount_read_only: challenge.config.mount_read_only,
        };
        let outcome = self.runner.run(&spec, workspace.path(), &options).await?;
        if outcome.timed_out {
            warn!(
                "submission for {} on {} was cut off at the deadline",
                user.username, challenge.name
            );
        }

        let report = parser::parse_output(&outcome.output, challenge.hooks.as_deref());
        let score = report.score();

        if let Some(score) = score {
            self.store
                .save(&user.id, &challenge.name, Utc::now(), score)
                .await
                .map_err(GradeError::Persistence)?;
            info!(
                "recorded {:.2} for {} on {}",
                score, user.username, challenge.name
            );
        } else {
            info!(
                "no countable tests for {} on {}; nothing recorded",
                user.username, challenge.name
            );
        }

        Ok(GradeOutcome {
            report,
            score,
            timed_out: outcome.timed_out,
        })
    }
}

/// Process-wide tiebreaker so two submissions landing on the same
/// millisecond still get distinct workspace names.
static WORKSPACE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One submission's isolated directory. Removal happens on drop, so it
/// runs on every exit path; an already-removed directory is not an error.
struct Workspace {
    path: PathBuf,
}

impl Workspace {
    fn create(root: &Path, challenge: &str, user_id: &str) -> Result<Self, GradeError> {
        let seq = WORKSPACE_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}-{}-{}-{}",
            challenge,
            user_id,
            Utc::now().timestamp_millis(),
            seq
        );
        let path = root.join(name);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create workspace {}", path.display()))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove workspace {}: {}", self.path.display(), e),
        }
    }
}
