//! Grading failure taxonomy
//!
//! Every stage of the submission pipeline reports failures through
//! `GradeError` so the orchestrator can map them to an HTTP-level outcome
//! in one place. Client-caused failures (oversized or undecodable uploads)
//! are distinguishable from environment failures; nothing is retried
//! automatically.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GradeError {
    /// The upload crossed the challenge's byte ceiling mid-stream.
    #[error("upload exceeded the maximum of {limit} bytes")]
    SizeExceeded { limit: u64 },

    /// The uploaded bytes could not be decoded as an archive.
    #[error("uploaded archive could not be decoded: {0}")]
    MalformedArchive(String),

    /// The container build for the challenge failed. Fatal to the
    /// submission, never retried.
    #[error("container build failed:\n{detail}")]
    BuildFailed { detail: String },

    /// The container runtime could not be started at all (e.g. the docker
    /// binary is missing).
    #[error("container runtime unavailable: {0}")]
    RunnerUnavailable(#[source] std::io::Error),

    /// A challenge-supplied hook returned an error. A challenge-authoring
    /// defect; must not take down the server for other submissions.
    #[error("challenge hook failed: {0}")]
    Hook(#[source] anyhow::Error),

    /// The grading result was computed but could not be recorded.
    #[error("failed to persist score: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GradeError {
    /// Whether the failure was caused by the client's upload, i.e. whether
    /// resubmitting the same bytes could possibly succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GradeError::SizeExceeded { .. } | GradeError::MalformedArchive(_)
        )
    }
}
