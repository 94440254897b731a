//! Per-challenge configuration
//!
//! Each challenge directory may carry a `challenge.toml` tuning the upload
//! ceiling, the run deadline and the workspace mount mode. Unspecified
//! options fall back to the documented defaults. Size values accept either
//! a plain byte count or a suffixed string such as `"2M"`, `"500k"` or
//! `"1g"`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 2_000_000;
pub const DEFAULT_MAX_RUN_TIME_MS: u64 = 30_000;

/// File name looked up inside a challenge directory.
pub const CONFIG_FILE: &str = "challenge.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeConfig {
    pub max_upload_bytes: u64,
    pub max_run_time: Duration,
    /// Mount the workspace read-only inside the container.
    pub mount_read_only: bool,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_run_time: Duration::from_millis(DEFAULT_MAX_RUN_TIME_MS),
            mount_read_only: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChallengeConfig {
    max_upload_size: Option<SizeSpec>,
    max_run_time_ms: Option<u64>,
    mount_read_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SizeSpec {
    Bytes(u64),
    Text(String),
}

impl ChallengeConfig {
    /// Load the config file from a challenge directory. A missing file
    /// yields the defaults; a present-but-invalid file is an error rather
    /// than a silent fallback.
    pub fn load(challenge_dir: &Path) -> Result<Self> {
        let path = challenge_dir.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let raw: RawChallengeConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config at {}", path.display()))?;

        let max_upload_bytes = match raw.max_upload_size {
            Some(SizeSpec::Bytes(n)) => n,
            Some(SizeSpec::Text(s)) => parse_size(&s)
                .with_context(|| format!("invalid max_upload_size in {}", path.display()))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            max_upload_bytes,
            max_run_time: Duration::from_millis(
                raw.max_run_time_ms.unwrap_or(DEFAULT_MAX_RUN_TIME_MS),
            ),
            mount_read_only: raw.mount_read_only.unwrap_or(false),
        })
    }
}

/// Parse a byte count with an optional k/m/g suffix (case-insensitive,
/// powers of 1000).
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        anyhow::bail!("empty size value");
    }

    let (digits, multiplier) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_digit() => (trimmed, 1u64),
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1_000),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1_000_000),
        Some('g') | Some('G') => (&trimmed[..trimmed.len() - 1], 1_000_000_000),
        Some(c) => anyhow::bail!("unrecognized size suffix '{}'", c),
        None => unreachable!("non-empty string has a last char"),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid size value '{}'", input))?;

    Ok(value * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn suffixed_sizes_parse() {
        assert_eq!(parse_size("2M").unwrap(), 2_000_000);
        assert_eq!(parse_size("500k").unwrap(), 500_000);
        assert_eq!(parse_size("1g").unwrap(), 1_000_000_000);
        assert_eq!(parse_size("12345").unwrap(), 12_345);
    }

    #[test]
    fn bad_sizes_are_rejected() {
        assert!(parse_size("").is_err());
        assert!(parse_size("2X").is_err());
        assert!(parse_size("k").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ChallengeConfig::load(dir.path()).unwrap();
        assert_eq!(config, ChallengeConfig::default());
        assert_eq!(config.max_upload_bytes, 2_000_000);
        assert_eq!(config.max_run_time, Duration::from_millis(30_000));
    }

    #[test]
    fn accepts_suffixed_and_numeric_upload_sizes() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "max_upload_size = \"500k\"\nmax_run_time_ms = 5000\n",
        )
        .unwrap();
        let config = ChallengeConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_upload_bytes, 500_000);
        assert_eq!(config.max_run_time, Duration::from_millis(5_000));

        std::fs::write(dir.path().join(CONFIG_FILE), "max_upload_size = 1234\n").unwrap();
        let config = ChallengeConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_upload_bytes, 1_234);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "max_upload_size = [1]\n").unwrap();
        assert!(ChallengeConfig::load(dir.path()).is_err());
    }

    #[test]
    fn mount_mode_is_read() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "mount_read_only = true\n").unwrap();
        let config = ChallengeConfig::load(dir.path()).unwrap();
        assert!(config.mount_read_only);
    }
}
