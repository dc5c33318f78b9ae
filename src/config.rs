//! Optional config file
//!
//! Values here only fill in what the command line leaves unset.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use kubetail_logs::{DEFAULT_POLL_INTERVAL, RetryPolicy};
use kubetail_types::ExcludeTag;

/// Contents of `config.toml`
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub namespace: Option<String>,
    pub context: Option<String>,
    pub tail: Option<usize>,
    pub raw: bool,
    pub display_names: bool,
    pub excludes: Vec<ExcludeTag>,
    pub mdcs: Vec<String>,
    /// File follow poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,
    pub retry: RetryConfig,
}

/// Retry policy for pods whose logs are not available yet
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: RetryPolicy::DEFAULT_ATTEMPTS,
            backoff_ms: RetryPolicy::DEFAULT_BACKOFF.as_millis() as u64,
        }
    }
}

impl Config {
    /// `$HOME/.config/kubetail/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        Some(home.join(".config").join("kubetail").join("config.toml"))
    }

    /// Load `path`, or the default location when none is given.
    ///
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.attempts, Duration::from_millis(self.retry.backoff_ms))
    }
}
