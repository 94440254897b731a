//! Score persistence
//!
//! One JSON file per user under the store directory, holding that user's
//! full submission history keyed by challenge name. Records are appended,
//! never edited or deleted. Reads and writes for the same user are
//! serialized through a per-user async mutex; different users never
//! contend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// One immutable grading outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    /// ISO-8601 timestamp of the grading run.
    pub date: String,
    /// Fractional score in [0, 1].
    pub score: f64,
}

/// Full history for one user: challenge name to insertion-ordered records.
pub type UserHistory = HashMap<String, Vec<ScoreRecord>>;

pub struct ScoreStore {
    directory: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ScoreStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Append one record to the user's history, creating the store
    /// directory and the user's file as needed. The read-modify-write is
    /// held under the user's lock so concurrent saves never lose an
    /// append.
    pub async fn save(
        &self,
        user_id: &str,
        challenge: &str,
        date: DateTime<Utc>,
        score: f64,
    ) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        self.ensure_directory().await?;

        let path = self.user_file(user_id);
        let mut history = read_history(&path).await?;
        history.entry(challenge.to_string()).or_default().push(ScoreRecord {
            date: date.to_rfc3339_opts(SecondsFormat::Millis, true),
            score,
        });

        let data = serde_json::to_vec(&history).context("failed to encode score history")?;
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!("recorded score {} for {} on {}", score, user_id, challenge);

        Ok(())
    }

    /// Load the user's full history. A user with no file has an empty
    /// history rather than an error.
    pub async fn load(&self, user_id: &str) -> Result<UserHistory> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        read_history(&self.user_file(user_id)).await
    }

    /// Stream every (challenge, record) pair to a visitor. Order across
    /// challenges is unspecified; within a challenge, insertion order.
    pub async fn visit<F>(&self, user_id: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &ScoreRecord),
    {
        let history = self.load(user_id).await?;
        for (challenge, records) in &history {
            for record in records {
                f(challenge, record);
            }
        }
        Ok(())
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(user_id.to_string()).or_default())
    }

    /// Idempotent: a directory that already exists is not an error.
    async fn ensure_directory(&self) -> Result<()> {
        match tokio::fs::create_dir_all(&self.directory).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("could not create store at {}", self.directory.display())
            }),
        }
    }

    fn user_file(&self, user_id: &str) -> PathBuf {
        self.directory.join(format!("d_{}", user_id))
    }
}

async fn read_history(path: &Path) -> Result<UserHistory> {
    let content = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(UserHistory::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    serde_json::from_slice(&content)
        .with_context(|| format!("corrupt score history at {}", path.display()))
}
