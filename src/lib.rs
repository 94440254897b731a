//! Self-hosted coding challenge server with containerized grading.
//!
//! An instructor publishes challenge directories; students download
//! starter archives, submit solutions, and get a graded score back. The
//! pipeline takes an untrusted upload stream, materializes it in an
//! isolated workspace, merges instructor override files over it, runs the
//! challenge's container under a wall-clock deadline, extracts a
//! pass/fail count from the captured output, and appends the score to the
//! user's history.

pub mod archive;
pub mod challenge;
pub mod config;
pub mod error;
pub mod hooks;
pub mod meter;
pub mod overwrite;
pub mod parser;
pub mod runner;
pub mod server;
pub mod session;
pub mod store;
pub mod submission;

pub use challenge::{Challenge, ChallengeRegistry};
pub use error::GradeError;
pub use hooks::{ChallengeHooks, MochaHooks};
pub use parser::TestReport;
pub use runner::{ContainerRunner, DockerRunner};
pub use session::{IdentityResolver, UserIdentity};
pub use store::{ScoreRecord, ScoreStore};
pub use submission::{GradeOutcome, SubmissionOrchestrator};
