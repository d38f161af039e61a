//! Configuration management.
//!
//! Settings come from an optional TOML file, overridden by
//! `DIMENSIONS_RECORDS_*` environment variables (`__` separates the section
//! from the key, e.g. `DIMENSIONS_RECORDS_API__TOKEN`).
//!
//! # Configuration File Format
//!
//! ```toml
//! [api]
//! dsl_url = "https://app.dimensions.ai/api/dsl.json"
//! auth_url = "https://app.dimensions.ai/api/auth.json"
//! token = "..."
//! timeout_seconds = 30
//!
//! [query]
//! fetch_size = 100
//! max_retries = 3
//! retry_pause_ms = 2000
//!
//! [rate_limit]
//! max_calls = 30
//! period_seconds = 60
//!
//! [cache]
//! enabled = true
//! directory = "~/.cache/dimensions-records"
//! ttl_seconds = 1800
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DimensionsError, Result};

/// Name of the configuration file looked up by [`find_config_file`]
pub const CONFIG_FILE_NAME: &str = "dimensions-records.toml";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote service endpoints and credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Endpoint accepting search text
    #[serde(default = "default_dsl_url")]
    pub dsl_url: String,

    /// Endpoint exchanging credentials for a token
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Previously issued token; skips login when set
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            dsl_url: default_dsl_url(),
            auth_url: default_auth_url(),
            token: None,
            username: None,
            password: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_dsl_url() -> String {
    "https://app.dimensions.ai/api/dsl.json".to_string()
}

fn default_auth_url() -> String {
    "https://app.dimensions.ai/api/auth.json".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Paging and retry behaviour of searches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Records requested per page
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Retries after a "not ready yet" answer
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between those retries
    #[serde(default = "default_retry_pause")]
    pub retry_pause_ms: u64,
}

impl QueryConfig {
    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            fetch_size: default_fetch_size(),
            max_retries: default_max_retries(),
            retry_pause_ms: default_retry_pause(),
        }
    }
}

// 100 performs better than 50, 200 or 500 against the live service
fn default_fetch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_pause() -> u64 {
    2000
}

/// Client-side throttling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per period
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,

    #[serde(default = "default_period")]
    pub period_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            period_seconds: default_period(),
        }
    }
}

fn default_max_calls() -> u32 {
    30
}

fn default_period() -> u64 {
    60
}

/// On-disk response cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Defaults to [`default_cache_dir`]
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: None,
            ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    1800 // 30 minutes
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` for machine-readable output
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Check values that would only fail later, at request time
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("dsl_url", &self.api.dsl_url), ("auth_url", &self.api.auth_url)] {
            let parsed = url::Url::parse(value)
                .map_err(|e| DimensionsError::Config(format!("api.{} '{}': {}", name, value, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(DimensionsError::Config(format!(
                    "api.{} must be an http(s) URL, got '{}'",
                    name, value
                )));
            }
        }
        if self.query.fetch_size == 0 {
            return Err(DimensionsError::Config(
                "query.fetch_size must be positive".to_string(),
            ));
        }
        if self.rate_limit.max_calls == 0 || self.rate_limit.period_seconds == 0 {
            return Err(DimensionsError::Config(
                "rate_limit.max_calls and rate_limit.period_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DimensionsError::Config(format!("serialize: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| DimensionsError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Load configuration from a file, with environment overrides
pub fn load_config(path: &Path) -> Result<Config> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix("DIMENSIONS_RECORDS")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Configuration from the environment alone, for runs without a file
pub fn env_config() -> Result<Config> {
    let settings = config::Config::builder()
        .add_source(
            config::Environment::with_prefix("DIMENSIONS_RECORDS")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Look for a configuration file in the working directory, then in the
/// platform configuration directory
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("dimensions-records").join("config.toml"))
        .filter(|path| path.is_file())
}

/// Default location of the response cache
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dimensions-records")
}
