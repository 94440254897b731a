//! Test output parsing
//!
//! Turns the raw captured container output into a normalized pass/fail
//! report. ANSI escape sequences are stripped before any hook sees the
//! output: terminal-colored test runners are the expected case, so the
//! normalization is mandatory, not optional.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::hooks::ChallengeHooks;

/// Normalized result of one test run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestReport {
    /// Free-form body, typically the test runner's own summary text.
    pub body: String,
    pub passed: u32,
    pub failed: u32,
}

impl TestReport {
    /// Fractional score in [0, 1], or `None` when the run produced no
    /// countable tests. Guarding on `passed + failed > 0` keeps the
    /// division well-defined instead of coercing a marker-less run to 0.
    pub fn score(&self) -> Option<f64> {
        let total = self.passed + self.failed;
        if total == 0 {
            return None;
        }
        Some(f64::from(self.passed) / f64::from(total))
    }
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // CSI sequences (colors, cursor movement) and bare two-byte escapes.
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[@-Z\\-_]").expect("valid ANSI pattern")
    })
}

/// Remove ANSI escape sequences from captured output.
pub fn strip_ansi(output: &str) -> String {
    ansi_re().replace_all(output, "").into_owned()
}

/// Strip the raw output and run it through the challenge's hook. Without a
/// hook the stripped output becomes the body with `passed = failed = 0`,
/// and no score will be computed for the run.
pub fn parse_output(raw: &str, hooks: Option<&dyn ChallengeHooks>) -> TestReport {
    let stripped = strip_ansi(raw);
    match hooks {
        Some(hooks) => hooks.parse_test_results(&stripped),
        None => TestReport {
            body: stripped,
            passed: 0,
            failed: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::MochaHooks;

    #[test]
    fn strips_color_codes() {
        let colored = "\x1b[32m  3 passing\x1b[0m\n\x1b[31m  1 failing\x1b[0m\n";
        assert_eq!(strip_ansi(colored), "  3 passing\n  1 failing\n");
    }

    #[test]
    fn score_is_passed_over_total() {
        let report = TestReport {
            body: String::new(),
            passed: 3,
            failed: 1,
        };
        assert_eq!(report.score(), Some(0.75));
    }

    #[test]
    fn no_markers_means_no_score() {
        let report = TestReport {
            body: "tests never ran".into(),
            passed: 0,
            failed: 0,
        };
        assert_eq!(report.score(), None);
    }

    #[test]
    fn all_failing_scores_zero() {
        let report = TestReport {
            body: String::new(),
            passed: 0,
            failed: 4,
        };
        assert_eq!(report.score(), Some(0.0));
    }

    #[test]
    fn without_a_hook_the_stripped_output_is_the_body() {
        let report = parse_output("\x1b[1mhello\x1b[0m world", None);
        assert_eq!(report.body, "hello world");
        assert_eq!(report.passed, 0);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn hook_sees_stripped_output() {
        let hooks = MochaHooks::default();
        let raw = "\x1b[32m  5 passing\x1b[0m (12ms)\n\x1b[31m  2 failing\x1b[0m\n";
        let report = parse_output(raw, Some(&hooks));
        assert_eq!(report.passed, 5);
        assert_eq!(report.failed, 2);
    }
}
