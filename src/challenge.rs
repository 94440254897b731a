//! Challenge registry
//!
//! Challenges are instructor-authored directories under a single root:
//! the directory itself is the starter content, an optional `overwrite/`
//! subdirectory holds instructor files merged over every submission, a
//! `.challengeignore` file lists path substrings excluded from archives,
//! and `challenge.toml` tunes the limits. The directory is read-only to
//! the grading pipeline.
//!
//! The distributable starter archive is prepared lazily: built on first
//! download and cached alongside the challenge as `starter.zip`, with a
//! content digest that invalidates the cache when the instructor edits
//! the starter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::archive;
use crate::config::{ChallengeConfig, CONFIG_FILE};
use crate::hooks::ChallengeHooks;
use crate::runner::ContainerSpec;

pub const IGNORE_FILE: &str = ".challengeignore";
pub const STARTER_ARCHIVE: &str = "starter.zip";
pub const STARTER_DIGEST: &str = "starter.zip.digest";

/// Paths never shipped to students or accepted back from them.
const RESERVED: [&str; 4] = [CONFIG_FILE, IGNORE_FILE, STARTER_ARCHIVE, STARTER_DIGEST];

const OVERWRITE_DIR: &str = "overwrite";

pub struct Challenge {
    pub name: String,
    pub dir: PathBuf,
    pub config: ChallengeConfig,
    pub hooks: Option<Arc<dyn ChallengeHooks>>,
}

impl Challenge {
    /// The instructor override directory, if the challenge has one.
    pub fn overwrite_dir(&self) -> Option<PathBuf> {
        let dir = self.dir.join(OVERWRITE_DIR);
        dir.is_dir().then_some(dir)
    }

    /// Ignore patterns for archive packing: the reserved file names, the
    /// override directory, plus the challenge's own ignore file. Blank
    /// lines and `#` comments in the file are skipped.
    pub fn ignore_patterns(&self) -> Result<Vec<String>> {
        let mut patterns: Vec<String> = RESERVED.iter().map(|s| s.to_string()).collect();
        patterns.push(OVERWRITE_DIR.to_string());

        let path = self.dir.join(IGNORE_FILE);
        if path.is_file() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                patterns.push(line.to_string());
            }
        }

        Ok(patterns)
    }

    /// The container definition found in the challenge directory: a
    /// compose file wins over a plain Dockerfile.
    pub fn container(&self) -> Result<ContainerSpec> {
        for candidate in ["docker-compose.yml", "docker-compose.yaml", "compose.yml", "compose.yaml"] {
            let file = self.dir.join(candidate);
            if file.is_file() {
                return Ok(ContainerSpec::Compose { file });
            }
        }

        if self.dir.join("Dockerfile").is_file() {
            return Ok(ContainerSpec::Image {
                tag: image_tag(&self.name),
                context: self.dir.clone(),
            });
        }

        anyhow::bail!(
            "challenge '{}' has neither a compose file nor a Dockerfile",
            self.name
        )
    }

    /// Produce the starter archive, reusing the cached one while the
    /// starter content is unchanged.
    pub async fn prepare_starter(&self) -> Result<Vec<u8>> {
        let ignore = self.ignore_patterns()?;
        let digest = starter_digest(&self.dir, &ignore)?;

        let archive_path = self.dir.join(STARTER_ARCHIVE);
        let digest_path = self.dir.join(STARTER_DIGEST);

        if archive_path.is_file() {
            if let Ok(cached) = tokio::fs::read_to_string(&digest_path).await {
                if cached.trim() == digest {
                    debug!("serving cached starter archive for {}", self.name);
                    return tokio::fs::read(&archive_path)
                        .await
                        .with_context(|| format!("failed to read {}", archive_path.display()));
                }
            }
        }

        info!("packing starter archive for {}", self.name);
        let bytes = archive::pack_dir(&self.dir, &ignore)?;
        tokio::fs::write(&archive_path, &bytes)
            .await
            .with_context(|| format!("failed to cache {}", archive_path.display()))?;
        tokio::fs::write(&digest_path, &digest)
            .await
            .with_context(|| format!("failed to write {}", digest_path.display()))?;

        Ok(bytes)
    }
}

/// Image tag shared by every submission to the same challenge. Concurrent
/// submissions can race on a rebuild of this tag; builds are not
/// serialized here.
pub fn image_tag(challenge_name: &str) -> String {
    format!("challenge-{}", challenge_name.to_lowercase())
}

/// Digest of the packed name set and file contents, used to invalidate
/// the cached starter archive.
fn starter_digest(dir: &Path, ignore: &[String]) -> Result<String> {
    let files = archive::collect_files(dir, ignore)?;

    let mut hasher = Sha256::new();
    for relative in &files {
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let contents = std::fs::read(dir.join(relative))
            .with_context(|| format!("failed to read {}", dir.join(relative).display()))?;
        hasher.update(&contents);
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();

    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Looks challenges up on disk by name and attaches per-challenge hook
/// objects registered at construction. Hooks are explicit and injected,
/// not discovered.
pub struct ChallengeRegistry {
    root: PathBuf,
    hooks: HashMap<String, Arc<dyn ChallengeHooks>>,
    default_hooks: Option<Arc<dyn ChallengeHooks>>,
}

impl ChallengeRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hooks: HashMap::new(),
            default_hooks: None,
        }
    }

    /// Register a hooks object for one challenge.
    pub fn with_hooks(mut self, name: impl Into<String>, hooks: Arc<dyn ChallengeHooks>) -> Self {
        self.hooks.insert(name.into(), hooks);
        self
    }

    /// Hooks applied to every challenge without an explicit registration.
    pub fn with_default_hooks(mut self, hooks: Arc<dyn ChallengeHooks>) -> Self {
        self.default_hooks = Some(hooks);
        self
    }

    /// Look a challenge up by name. Unknown names and names that are not
    /// plain directory names both come back as `None`.
    pub fn get(&self, name: &str) -> Result<Option<Challenge>> {
        if !is_safe_name(name) {
            return Ok(None);
        }

        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Ok(None);
        }

        let config = ChallengeConfig::load(&dir)?;
        let hooks = self
            .hooks
            .get(name)
            .or(self.default_hooks.as_ref())
            .cloned();

        Ok(Some(Challenge {
            name: name.to_string(),
            dir,
            config,
            hooks,
        }))
    }

    /// Names of every challenge directory under the root, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.root.display()))
            }
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// A challenge name must be a single path component: no separators, no
/// parent references, nothing hidden.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::MochaHooks;
    use tempfile::tempdir;

    fn write_file(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn make_challenge(root: &Path, name: &str) {
        write_file(&root.join(name), "Dockerfile", "FROM node:20\nCMD npm test\n");
        write_file(&root.join(name), "index.js", "module.exports = {}");
    }

    #[test]
    fn unknown_and_unsafe_names_are_none() {
        let root = tempdir().unwrap();
        make_challenge(root.path(), "first");
        let registry = ChallengeRegistry::new(root.path());

        assert!(registry.get("missing").unwrap().is_none());
        assert!(registry.get("../first").unwrap().is_none());
        assert!(registry.get(".hidden").unwrap().is_none());
        assert!(registry.get("first").unwrap().is_some());
    }

    #[test]
    fn list_is_sorted_directory_names() {
        let root = tempdir().unwrap();
        make_challenge(root.path(), "second-challenge");
        make_challenge(root.path(), "first-challenge");
        write_file(root.path(), "stray-file.txt", "not a challenge");

        let registry = ChallengeRegistry::new(root.path());
        assert_eq!(
            registry.list().unwrap(),
            vec!["first-challenge".to_string(), "second-challenge".to_string()]
        );
    }

    #[test]
    fn compose_file_wins_over_dockerfile() {
        let root = tempdir().unwrap();
        make_challenge(root.path(), "c");
        write_file(&root.path().join("c"), "docker-compose.yml", "services: {}");

        let registry = ChallengeRegistry::new(root.path());
        let challenge = registry.get("c").unwrap().unwrap();
        assert!(matches!(
            challenge.container().unwrap(),
            ContainerSpec::Compose { .. }
        ));
    }

    #[test]
    fn dockerfile_maps_to_a_name_derived_tag() {
        let root = tempdir().unwrap();
        make_challenge(root.path(), "My-Challenge");

        let registry = ChallengeRegistry::new(root.path());
        let challenge = registry.get("My-Challenge").unwrap().unwrap();
        match challenge.container().unwrap() {
            ContainerSpec::Image { tag, .. } => assert_eq!(tag, "challenge-my-challenge"),
            other => panic!("expected an image spec, got {:?}", other),
        }
    }

    #[test]
    fn ignore_file_supports_comments() {
        let root = tempdir().unwrap();
        make_challenge(root.path(), "c");
        write_file(
            &root.path().join("c"),
            IGNORE_FILE,
            "# dependencies\nnode_modules\n\n.git\n",
        );

        let registry = ChallengeRegistry::new(root.path());
        let challenge = registry.get("c").unwrap().unwrap();
        let patterns = challenge.ignore_patterns().unwrap();
        assert!(patterns.contains(&"node_modules".to_string()));
        assert!(patterns.contains(&".git".to_string()));
        assert!(!patterns.iter().any(|p| p.starts_with('#')));
    }

    #[tokio::test]
    async fn starter_archive_is_cached_until_content_changes() {
        let root = tempdir().unwrap();
        make_challenge(root.path(), "c");
        let registry = ChallengeRegistry::new(root.path());
        let challenge = registry.get("c").unwrap().unwrap();

        let first = challenge.prepare_starter().await.unwrap();
        assert!(root.path().join("c").join(STARTER_ARCHIVE).is_file());

        // Unchanged content: served from cache, byte-identical.
        let second = challenge.prepare_starter().await.unwrap();
        assert_eq!(first, second);

        // Edited starter invalidates the cache.
        write_file(&root.path().join("c"), "index.js", "module.exports = { x: 1 }");
        let third = challenge.prepare_starter().await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn starter_archive_excludes_reserved_and_ignored_paths() {
        let root = tempdir().unwrap();
        make_challenge(root.path(), "c");
        let dir = root.path().join("c");
        write_file(&dir, "challenge.toml", "max_run_time_ms = 1000\n");
        write_file(&dir, "overwrite/test/index.test.js", "instructor tests");
        write_file(&dir, IGNORE_FILE, "secret\n");
        write_file(&dir, "secret-answers.txt", "42");

        let registry = ChallengeRegistry::new(root.path());
        let challenge = registry.get("c").unwrap().unwrap();
        let bytes = challenge.prepare_starter().await.unwrap();

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.contains(&"index.js".to_string()));
        assert!(!names.iter().any(|n| n.contains("overwrite")));
        assert!(!names.iter().any(|n| n.contains("challenge.toml")));
        assert!(!names.iter().any(|n| n.contains("secret")));
    }

    #[test]
    fn registered_hooks_attach_to_their_challenge() {
        let root = tempdir().unwrap();
        make_challenge(root.path(), "a");
        make_challenge(root.path(), "b");

        let registry = ChallengeRegistry::new(root.path())
            .with_hooks("a", Arc::new(MochaHooks::default()))
            .with_default_hooks(Arc::new(MochaHooks::with_begin_marker("== BEGIN ==")));

        assert!(registry.get("a").unwrap().unwrap().hooks.is_some());
        // The default applies to challenges without an explicit entry.
        assert!(registry.get("b").unwrap().unwrap().hooks.is_some());
    }
}
