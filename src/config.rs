//! Configuration file parser for `feedgen.toml`.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings since they are
//! usually typos. Command-line flags override file values.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::scrape::{default_workers, BatchOptions, RetryPolicy};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file.
    pub database_path: String,

    /// Root of the upstream catalog; page paths are joined onto it.
    pub base_url: String,

    /// Seconds between two polls of the releases page.
    pub poll_interval_secs: u64,

    /// Concurrent series fetches. 0 = available parallelism.
    pub workers: usize,

    /// Pause between two series submissions, in milliseconds.
    pub submit_delay_ms: u64,

    /// Total attempts per page, first one included.
    pub max_attempts: u32,

    /// Upper bound of the random delay unit between retries, in milliseconds.
    pub backoff_step_ms: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    pub user_agent: String,

    /// Public prefix feeds are served under; the fingerprint is appended.
    pub feed_link: String,

    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "feedgen.db".to_string(),
            base_url: "https://www.mangaupdates.com/".to_string(),
            poll_interval_secs: 6 * 60 * 60,
            workers: 0,
            submit_delay_ms: 250,
            max_attempts: 10,
            backoff_step_ms: 3000,
            request_timeout_secs: 30,
            user_agent: concat!("feedgen/", env!("CARGO_PKG_VERSION")).to_string(),
            feed_link: "http://localhost:8080/feeds".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 11] = [
        "database_path",
        "base_url",
        "poll_interval_secs",
        "workers",
        "submit_delay_ms",
        "max_attempts",
        "backoff_step_ms",
        "request_timeout_secs",
        "user_agent",
        "feed_link",
        "log_filter",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), base_url = %config.base_url, "Loaded configuration");
        Ok(config)
    }

    /// Rejects values the rest of the program cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// The catalog root. A trailing slash is added so relative page paths
    /// join below it rather than replacing its last segment.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| ConfigError::Invalid(format!("base_url '{}': {e}", self.base_url)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Invalid(format!(
                "base_url must be http or https, got '{other}'"
            ))),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_step: Duration::from_millis(self.backoff_step_ms),
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            workers: if self.workers == 0 {
                default_workers()
            } else {
                self.workers
            },
            submit_delay: Duration::from_millis(self.submit_delay_ms),
        }
    }
}

/// Parses an interval such as `90s`, `30m`, `6h`, `1d` or a bare number of
/// seconds.
pub fn parse_interval(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid interval '{raw}'"))?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => return Err(format!("unknown interval unit '{other}' (use s, m, h or d)")),
    };
    if value == 0 {
        return Err("interval must be greater than 0".to_string());
    }
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("interval '{raw}' is too large"))
}

// ============================================================================
// Tests
// ============================================================================
