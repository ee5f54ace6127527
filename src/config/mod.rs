//! Configuration loading
//!
//! TOML file plus `LINEUP_INGEST__`-prefixed environment overrides via
//! figment. Duration-valued settings are humantime strings ("15s", "5m")
//! so the file reads the way operators expect.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlite://... or postgres://...
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Fetch and parse settings for the streaming ingestor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Sources advertising a content length at or below this are fetched
    /// in one buffered request instead of streaming
    #[serde(default = "default_buffered_threshold_bytes")]
    pub buffered_threshold_bytes: u64,
    /// Hard cap on the decompressed in-memory payload
    #[serde(default = "default_max_decompressed_bytes")]
    pub max_decompressed_bytes: u64,
    /// Fail the fetch if no bytes arrive within this window
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    /// Retrieval strategies attempted before declaring the source
    /// permanently corrupted
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,
}

/// Chunked job runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Rows written per reconciliation batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Stop starting new batches once remaining budget drops below this
    #[serde(default = "default_budget_safety_margin")]
    pub budget_safety_margin: String,
    /// Serialized artifacts larger than this spill to a temp file
    #[serde(default = "default_artifact_spill_bytes")]
    pub artifact_spill_bytes: usize,
    /// Non-terminal jobs idle this long are swept as abandoned
    #[serde(default = "default_stale_after")]
    pub stale_after: String,
    /// Terminal jobs older than this are deleted by the sweep
    #[serde(default = "default_retention")]
    pub retention: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub jobs: JobConfig,
}

fn default_database_url() -> String {
    "sqlite://./lineup-ingest.db".to_string()
}
fn default_max_connections() -> u32 {
    5
}
fn default_buffered_threshold_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_max_decompressed_bytes() -> u64 {
    // Largest payload we are willing to hold as one in-memory text
    1024 * 1024 * 1024
}
fn default_stall_timeout() -> String {
    "15s".to_string()
}
fn default_connect_timeout() -> String {
    "10s".to_string()
}
fn default_max_fetch_attempts() -> u32 {
    3
}
fn default_batch_size() -> usize {
    1000
}
fn default_budget_safety_margin() -> String {
    "1500ms".to_string()
}
fn default_artifact_spill_bytes() -> usize {
    256 * 1024
}
fn default_stale_after() -> String {
    "5m".to_string()
}
fn default_retention() -> String {
    "24h".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            buffered_threshold_bytes: default_buffered_threshold_bytes(),
            max_decompressed_bytes: default_max_decompressed_bytes(),
            stall_timeout: default_stall_timeout(),
            connect_timeout: default_connect_timeout(),
            max_fetch_attempts: default_max_fetch_attempts(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            budget_safety_margin: default_budget_safety_margin(),
            artifact_spill_bytes: default_artifact_spill_bytes(),
            stale_after: default_stale_after(),
            retention: default_retention(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            fetch: FetchConfig::default(),
            jobs: JobConfig::default(),
        }
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .with_context(|| format!("invalid duration for {field}: '{value}'"))
}

impl FetchConfig {
    pub fn stall_timeout(&self) -> Result<Duration> {
        parse_duration("fetch.stall_timeout", &self.stall_timeout)
    }

    pub fn connect_timeout(&self) -> Result<Duration> {
        parse_duration("fetch.connect_timeout", &self.connect_timeout)
    }
}

impl JobConfig {
    pub fn budget_safety_margin(&self) -> Result<Duration> {
        parse_duration("jobs.budget_safety_margin", &self.budget_safety_margin)
    }

    pub fn stale_after(&self) -> Result<Duration> {
        parse_duration("jobs.stale_after", &self.stale_after)
    }

    pub fn retention(&self) -> Result<Duration> {
        parse_duration("jobs.retention", &self.retention)
    }
}

impl Config {
    /// Load configuration from an optional TOML file merged with
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("LINEUP_INGEST__").split("__"))
            .extract()
            .context("failed to load configuration")?;

        // Surface bad duration strings at startup, not mid-job
        config.fetch.stall_timeout()?;
        config.fetch.connect_timeout()?;
        config.jobs.budget_safety_margin()?;
        config.jobs.stale_after()?;
        config.jobs.retention()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.fetch.buffered_threshold_bytes, 50 * 1024 * 1024);
        assert_eq!(config.fetch.max_fetch_attempts, 3);
        assert_eq!(
            config.fetch.stall_timeout().unwrap(),
            Duration::from_secs(15)
        );
        assert_eq!(
            config.jobs.budget_safety_margin().unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(config.jobs.batch_size, 1000);
    }

    #[test]
    fn bad_duration_is_rejected() {
        let config = FetchConfig {
            stall_timeout: "soon".to_string(),
            ..FetchConfig::default()
        };
        assert!(config.stall_timeout().is_err());
    }
}
