// src/config.rs

//! Manages crawler configuration: loading from TOML, resolving defaults, and
//! validating the result.

use crate::error::CrawlError;
use serde::{Deserialize, Serialize};
use std::fs;

/// Cache-related settings: where the two-file store lives on disk and how
/// fresh an entry must be before the fetcher will skip the network.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    /// Base directory of the content-addressed cache.
    #[serde(default = "default_cache_path")]
    pub path: String,
    /// Minimum age in seconds of a cached entry before it is eligible to be
    /// refetched; see the fetcher's `cache_min` gate.
    #[serde(default = "default_cache_min_secs")]
    pub cache_min_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            cache_min_secs: default_cache_min_secs(),
        }
    }
}

fn default_cache_path() -> String {
    "crawl_data/cache".to_string()
}
fn default_cache_min_secs() -> u64 {
    0
}

/// Identity and partitioning width of this process within the crawler and
/// cache fleets.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InstanceConfig {
    /// This instance's crawler bucket identity, in `[1, crawlercount]`.
    pub crawler: u32,
    /// This instance's cache bucket identity, in `[1, cachecount]`.
    pub cache: u32,
    /// Total number of crawler instances sharing the queue.
    pub crawlercount: u32,
    /// Total number of cache instances sharing the queue.
    pub cachecount: u32,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            crawler: 1,
            cache: 1,
            crawlercount: 1,
            cachecount: 1,
        }
    }
}

/// The persistent queue's connection and retry behaviour.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QueueConfig {
    /// SQLx connection string. Defaults to a local SQLite file so the crate
    /// is runnable without an external database.
    #[serde(default = "default_db_uri")]
    pub db_uri: String,
    /// Number of times a transaction is retried after a transient (deadlock)
    /// failure before the error is surfaced as fatal.
    #[serde(default = "default_deadlock_retries")]
    pub deadlock_retries: u32,
    /// Default per-root minimum interval between fetches, in milliseconds.
    #[serde(default = "default_root_rate_ms")]
    pub default_root_rate_ms: i64,
    /// Floored TTL in seconds applied to 2xx outcomes.
    #[serde(default = "default_ttl_2xx_secs")]
    pub ttl_2xx_secs: i64,
    /// Floored TTL in seconds applied to all other outcomes.
    #[serde(default = "default_ttl_other_secs")]
    pub ttl_other_secs: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_uri: default_db_uri(),
            deadlock_retries: default_deadlock_retries(),
            default_root_rate_ms: default_root_rate_ms(),
            ttl_2xx_secs: default_ttl_2xx_secs(),
            ttl_other_secs: default_ttl_other_secs(),
        }
    }
}

fn default_db_uri() -> String {
    "sqlite://crawl_data/queue.sqlite3?mode=rwc".to_string()
}
fn default_deadlock_retries() -> u32 {
    10
}
fn default_root_rate_ms() -> i64 {
    2000
}
fn default_ttl_2xx_secs() -> i64 {
    3600
}
fn default_ttl_other_secs() -> i64 {
    86_400
}

/// HTTP client behaviour for the fetcher.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_accept")]
    pub accept: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            accept: default_accept(),
            user_agent: default_user_agent(),
            verbose: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            total_timeout_ms: default_total_timeout_ms(),
        }
    }
}

fn default_accept() -> String {
    "*/*".to_string()
}
fn default_user_agent() -> String {
    "crawlcore/0.1".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_total_timeout_ms() -> u64 {
    60_000
}

/// URI-scheme and content-type admission lists.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub schemes_whitelist: Vec<String>,
    #[serde(default)]
    pub schemes_blacklist: Vec<String>,
    #[serde(default)]
    pub content_types_whitelist: Vec<String>,
    #[serde(default)]
    pub content_types_blacklist: Vec<String>,
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9898
}

/// A raw representation of the config file before validation.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    instance: InstanceConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    queue: QueueConfig,
    #[serde(default)]
    fetch: FetchConfig,
    #[serde(default)]
    policy: PolicyConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The final, validated crawler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    pub instance: InstanceConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub fetch: FetchConfig,
    pub policy: PolicyConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            instance: InstanceConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            fetch: FetchConfig::default(),
            policy: PolicyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Reads and parses a TOML config file, then validates the result.
    pub fn from_file(path: &str) -> Result<Self, CrawlError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| CrawlError::Config(format!("failed to read '{path}': {e}")))?;
        Self::from_str(&contents)
    }

    /// Parses a TOML document directly, used by `from_file` and by tests
    /// that want to avoid touching the filesystem.
    pub fn from_str(contents: &str) -> Result<Self, CrawlError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| CrawlError::Config(format!("invalid TOML: {e}")))?;

        let config = Config {
            log_level: raw.log_level,
            instance: raw.instance,
            cache: raw.cache,
            queue: raw.queue,
            fetch: raw.fetch,
            policy: raw.policy,
            metrics: raw.metrics,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration for logical consistency.
    fn validate(&self) -> Result<(), CrawlError> {
        if self.instance.crawlercount == 0 {
            return Err(CrawlError::Config("instance.crawlercount cannot be 0".into()));
        }
        if self.instance.cachecount == 0 {
            return Err(CrawlError::Config("instance.cachecount cannot be 0".into()));
        }
        if self.instance.crawler == 0 || self.instance.crawler > self.instance.crawlercount {
            return Err(CrawlError::Config(format!(
                "instance.crawler must be in [1, {}]",
                self.instance.crawlercount
            )));
        }
        if self.instance.cache == 0 || self.instance.cache > self.instance.cachecount {
            return Err(CrawlError::Config(format!(
                "instance.cache must be in [1, {}]",
                self.instance.cachecount
            )));
        }
        if self.queue.deadlock_retries == 0 {
            return Err(CrawlError::Config("queue.deadlock_retries cannot be 0".into()));
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(CrawlError::Config("metrics.port cannot be 0 when metrics are enabled".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            [instance]
            crawler = 2
            cache = 1
            crawlercount = 4
            cachecount = 2
        "#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.instance.crawler, 2);
        assert_eq!(config.cache.path, default_cache_path());
        assert_eq!(config.queue.deadlock_retries, 10);
    }

    #[test]
    fn rejects_crawler_id_out_of_range() {
        let toml = r#"
            [instance]
            crawler = 5
            cache = 1
            crawlercount = 4
            cachecount = 1
        "#;
        assert!(Config::from_str(toml).is_err());
    }
}
