//! Instructor override merge
//!
//! Copies every file from a challenge's override directory on top of the
//! extracted submission, creating destination subdirectories as needed and
//! replacing any student file at the same relative path. Submitted test
//! files are therefore never the ones that run. The copy is bracketed by
//! the challenge's optional `before_overwrite` / `after_overwrite` hooks.

use std::path::Path;

use anyhow::{Context as _, Result};
use tracing::debug;

use crate::archive::collect_files;
use crate::error::GradeError;
use crate::hooks::ChallengeHooks;

/// Recursively copy `override_dir` into `workspace`, overwriting on
/// collision.
pub fn overwrite(workspace: &Path, override_dir: &Path) -> Result<()> {
    let files = collect_files(override_dir, &[])?;

    for relative in files {
        let source = override_dir.join(&relative);
        let dest = workspace.join(&relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::copy(&source, &dest).with_context(|| {
            format!("failed to copy {} to {}", source.display(), dest.display())
        })?;
        debug!("overwrote {}", relative.display());
    }

    Ok(())
}

/// Run the full merge: before hook, copy, after hook. A hook error aborts
/// the grading run as [`GradeError::Hook`] and is not retried; the copy
/// itself failing is an internal error.
pub async fn merge_with_hooks(
    workspace: &Path,
    override_dir: &Path,
    hooks: Option<&dyn ChallengeHooks>,
) -> Result<(), GradeError> {
    if let Some(hooks) = hooks {
        hooks
            .before_overwrite(workspace, override_dir)
            .await
            .map_err(GradeError::Hook)?;
    }

    overwrite(workspace, override_dir)?;

    if let Some(hooks) = hooks {
        hooks
            .after_overwrite(workspace, override_dir)
            .await
            .map_err(GradeError::Hook)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TestReport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write_file(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn override_wins_on_colliding_paths() {
        let workspace = tempdir().unwrap();
        write_file(workspace.path(), "index.js", "student solution");
        write_file(workspace.path(), "lib/a.js", "student a");
        write_file(workspace.path(), "test/index.test.js", "student tests");

        let overrides = tempdir().unwrap();
        write_file(overrides.path(), "test/index.test.js", "instructor tests");

        overwrite(workspace.path(), overrides.path()).unwrap();

        // The three original files are present; the colliding path holds
        // the instructor's version.
        assert_eq!(
            std::fs::read_to_string(workspace.path().join("index.js")).unwrap(),
            "student solution"
        );
        assert_eq!(
            std::fs::read_to_string(workspace.path().join("lib/a.js")).unwrap(),
            "student a"
        );
        assert_eq!(
            std::fs::read_to_string(workspace.path().join("test/index.test.js")).unwrap(),
            "instructor tests"
        );
    }

    #[test]
    fn creates_missing_destination_directories() {
        let workspace = tempdir().unwrap();
        let overrides = tempdir().unwrap();
        write_file(overrides.path(), "deep/nested/runner.sh", "#!/bin/sh");

        overwrite(workspace.path(), overrides.path()).unwrap();
        assert!(workspace.path().join("deep/nested/runner.sh").is_file());
    }

    struct CountingHooks {
        before: Arc<AtomicU32>,
        after: Arc<AtomicU32>,
        fail_before: bool,
    }

    #[async_trait]
    impl ChallengeHooks for CountingHooks {
        async fn before_overwrite(&self, _w: &Path, _o: &Path) -> Result<()> {
            self.before.fetch_add(1, Ordering::SeqCst);
            if self.fail_before {
                anyhow::bail!("hook rejected the workspace");
            }
            Ok(())
        }

        async fn after_overwrite(&self, _w: &Path, _o: &Path) -> Result<()> {
            self.after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn parse_test_results(&self, output: &str) -> TestReport {
            TestReport {
                body: output.to_string(),
                passed: 0,
                failed: 0,
            }
        }
    }

    #[tokio::test]
    async fn hooks_bracket_the_copy() {
        let workspace = tempdir().unwrap();
        let overrides = tempdir().unwrap();
        write_file(overrides.path(), "a.txt", "x");

        let before = Arc::new(AtomicU32::new(0));
        let after = Arc::new(AtomicU32::new(0));
        let hooks = CountingHooks {
            before: Arc::clone(&before),
            after: Arc::clone(&after),
            fail_before: false,
        };

        merge_with_hooks(workspace.path(), overrides.path(), Some(&hooks))
            .await
            .unwrap();

        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert!(workspace.path().join("a.txt").is_file());
    }

    #[tokio::test]
    async fn failing_before_hook_aborts_the_merge() {
        let workspace = tempdir().unwrap();
        let overrides = tempdir().unwrap();
        write_file(overrides.path(), "a.txt", "x");

        let before = Arc::new(AtomicU32::new(0));
        let after = Arc::new(AtomicU32::new(0));
        let hooks = CountingHooks {
            before: Arc::clone(&before),
            after: Arc::clone(&after),
            fail_before: true,
        };

        let err = merge_with_hooks(workspace.path(), overrides.path(), Some(&hooks))
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::Hook(_)));
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert!(!workspace.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn absent_hooks_are_a_noop() {
        let workspace = tempdir().unwrap();
        let overrides = tempdir().unwrap();
        write_file(overrides.path(), "a.txt", "x");

        merge_with_hooks(workspace.path(), overrides.path(), None)
            .await
            .unwrap();
        assert!(workspace.path().join("a.txt").is_file());
    }
}
