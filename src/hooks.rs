//! Challenge extension points
//!
//! A challenge may supply code at three well-defined points: before and
//! after the instructor override merge, and when turning raw test output
//! into a pass/fail report. Hooks are one explicit async trait injected at
//! registry construction: never loaded dynamically, and with a single
//! calling convention.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::parser::TestReport;

#[async_trait]
pub trait ChallengeHooks: Send + Sync {
    /// Runs after extraction, before instructor files overwrite the
    /// submission. Errors abort the grading run.
    async fn before_overwrite(&self, _workspace: &Path, _overwrite_dir: &Path) -> Result<()> {
        Ok(())
    }

    /// Runs after instructor files have been merged into the workspace.
    async fn after_overwrite(&self, _workspace: &Path, _overwrite_dir: &Path) -> Result<()> {
        Ok(())
    }

    /// Turn stripped test-runner output into a normalized report. Counting
    /// zero passed and zero failed means the run produces no score.
    fn parse_test_results(&self, output: &str) -> TestReport;
}

/// The conventional hook: counts mocha-style `N passing` / `N failing`
/// summary lines. Optionally discards everything before a marker line
/// first, for runners that prefix the test output with build noise.
#[derive(Debug, Default, Clone)]
pub struct MochaHooks {
    pub begin_marker: Option<String>,
}

impl MochaHooks {
    pub fn with_begin_marker(marker: impl Into<String>) -> Self {
        Self {
            begin_marker: Some(marker.into()),
        }
    }
}

fn passing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(\d+) passing").expect("valid passing pattern"))
}

fn failing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(\d+) failing").expect("valid failing pattern"))
}

#[async_trait]
impl ChallengeHooks for MochaHooks {
    fn parse_test_results(&self, output: &str) -> TestReport {
        let body = match &self.begin_marker {
            Some(marker) => match output.split_once(marker.as_str()) {
                Some((_, rest)) => rest.to_string(),
                None => "Tests failed to run".to_string(),
            },
            None => output.to_string(),
        };

        let count = |re: &Regex| {
            re.captures(&body)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0)
        };

        let passed = count(passing_re());
        let failed = count(failing_re());

        TestReport {
            body,
            passed,
            failed,
        }
    }
}
