//! Configuration file parser (TOML, default `feedpump.toml`).
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged as warnings, since they are usually typos.
use crate::resilience::{Backoff, CircuitConfig, RetryPolicy};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable that overrides `amqp_url`.
pub const AMQP_URL_ENV: &str = "FEEDPUMP_AMQP_URL";

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

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// One feed to poll. Each entry gets its own pipeline and circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    /// Fixed label written into every article's `source` field.
    pub source: String,
}

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `amqp_url` is masked in `Debug` output since it usually embeds credentials.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feeds: Vec<FeedConfig>,
    pub poll_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub publish_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: Backoff,
    pub retry_max_delay_ms: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_window_secs: u64,
    pub circuit_cooldown_secs: u64,
    /// Queue every article is published to.
    pub destination: String,
    pub amqp_url: String,
    /// Skip a tick while the previous cycle of the same feed is still running.
    pub prevent_overlap: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feeds: vec![FeedConfig {
                url: "https://medium.com/feed/tag/technology".to_string(),
                source: "Medium/Tech".to_string(),
            }],
            poll_interval_secs: 600,
            fetch_timeout_secs: 30,
            publish_timeout_secs: 10,
            retry_max_attempts: 3,
            retry_delay_ms: 1000,
            retry_backoff: Backoff::Exponential,
            retry_max_delay_ms: 30_000,
            circuit_failure_threshold: 5,
            circuit_window_secs: 3600,
            circuit_cooldown_secs: 60,
            destination: "blogs.raw".to_string(),
            amqp_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            prevent_overlap: false,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feeds", &self.feeds)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("publish_timeout_secs", &self.publish_timeout_secs)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("retry_backoff", &self.retry_backoff)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("circuit_failure_threshold", &self.circuit_failure_threshold)
            .field("circuit_window_secs", &self.circuit_window_secs)
            .field("circuit_cooldown_secs", &self.circuit_cooldown_secs)
            .field("destination", &self.destination)
            .field("amqp_url", &"[REDACTED]")
            .field("prevent_overlap", &self.prevent_overlap)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 14] = [
        "feeds",
        "poll_interval_secs",
        "fetch_timeout_secs",
        "publish_timeout_secs",
        "retry_max_attempts",
        "retry_delay_ms",
        "retry_backoff",
        "retry_max_delay_ms",
        "circuit_failure_threshold",
        "circuit_window_secs",
        "circuit_cooldown_secs",
        "destination",
        "amqp_url",
        "prevent_overlap",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// The result is not validated; call [`Config::validate`].
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
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            destination = %config.destination,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("at least one feed is required".into()));
        }
        for feed in &self.feeds {
            validate_feed_url(&feed.url)?;
            if feed.source.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "feed {} has an empty source label",
                    feed.url
                )));
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be > 0".into()));
        }
        if self.fetch_timeout_secs == 0 || self.publish_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be > 0".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid("retry_max_attempts must be >= 1".into()));
        }
        if self.circuit_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_failure_threshold must be >= 1".into(),
            ));
        }
        if self.destination.trim().is_empty() {
            return Err(ConfigError::Invalid("destination must not be empty".into()));
        }
        Ok(())
    }

    /// Broker URL, with the environment variable taking precedence over the file.
    pub fn broker_url(&self) -> SecretString {
        std::env::var(AMQP_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.amqp_url.clone())
            .into()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.retry_delay_ms);
        match self.retry_backoff {
            Backoff::Fixed => RetryPolicy::fixed(self.retry_max_attempts, delay),
            Backoff::Exponential => RetryPolicy::exponential(
                self.retry_max_attempts,
                delay,
                Duration::from_millis(self.retry_max_delay_ms),
            ),
        }
    }

    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            window: Duration::from_secs(self.circuit_window_secs),
            cooldown: Duration::from_secs(self.circuit_cooldown_secs),
        }
    }
}

fn validate_feed_url(url_str: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(url_str)
        .map_err(|e| ConfigError::Invalid(format!("feed url {url_str:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::Invalid(format!(
            "feed url {url_str:?}: unsupported scheme {scheme} (only http/https allowed)"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
