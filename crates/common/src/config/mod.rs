//! Configuration management for citecrawl services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis configuration (dedup ledger backend)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Work queue configuration (SQS)
    #[serde(default)]
    pub queue: QueueConfig,

    /// Bibliographic API client configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Crawl traversal configuration
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply the bundled schema on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// SQS queue URL carrying work items (the crawl topic)
    pub topic_url: Option<String>,

    /// Maximum messages to receive per poll
    #[serde(default = "default_queue_batch_size")]
    pub batch_size: u32,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Publish attempts before a message is reported lost
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,

    /// Upper bound for a single publish backoff in seconds
    #[serde(default = "default_publish_max_backoff")]
    pub publish_max_backoff_secs: u64,

    /// Broker pings at startup before giving up
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Pause between startup pings in seconds
    #[serde(default = "default_connect_interval")]
    pub connect_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Crossref,
    OpenAlex,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Bibliographic API titles are resolved against
    #[serde(default = "default_source")]
    pub source: SourceKind,

    /// Crossref works search endpoint
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// OpenAlex works endpoint
    #[serde(default = "default_openalex_api_base")]
    pub openalex_api_base: String,

    /// Contact address for the polite pool
    #[serde(default = "default_mailto")]
    pub mailto: String,

    /// Request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    /// Base wait after a 429 without Retry-After, in seconds
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// Ceiling on any single rate-limit wait, in seconds
    #[serde(default = "default_rate_limit_max_wait")]
    pub rate_limit_max_wait_secs: u64,

    /// Client-side request budget
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop the claim so a later run can retry the title
    Release,
    /// Record the title as failed; it will not be claimed again
    MarkFailed,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupBackend {
    Postgres,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    /// Maximum traversal depth; -1 means unbounded
    #[serde(default = "default_max_depth")]
    pub max_depth: i32,

    /// Pause before each republished reference, in milliseconds
    #[serde(default = "default_politeness_ms")]
    pub politeness_ms: u64,

    /// Items held mid-flight by the pool
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Simultaneous outbound fetches
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Age after which an unrenewed pending claim is considered abandoned,
    /// in seconds. Claims are renewed while their item is in flight. Must be
    /// below `queue.visibility_timeout_secs` so redelivered items can take
    /// over the claim.
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: u64,

    /// What to do with a title whose fetch failed terminally
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,

    /// Where claims and done markings live
    #[serde(default = "default_dedup_backend")]
    pub dedup_backend: DedupBackend,

    /// Only persist and expand papers in the computing scope
    #[serde(default)]
    pub scope_filter: bool,

    /// Keywords kept per persisted paper
    #[serde(default = "default_keywords_per_paper")]
    pub keywords_per_paper: usize,

    /// Window for in-flight items to finish after a stop request, in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

/// Shortest lease that still leaves room for renewals
pub const MIN_CLAIM_LEASE_SECS: u64 = 30;

// Default value functions
fn default_true() -> bool { true }
fn default_database_url() -> String { "postgres://localhost/citecrawl".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "citecrawl".to_string() }
fn default_queue_batch_size() -> u32 { 10 }
fn default_queue_poll_timeout() -> u64 { 20 }
fn default_visibility_timeout() -> u64 { 900 }
fn default_publish_attempts() -> u32 { 5 }
fn default_publish_max_backoff() -> u64 { 60 }
fn default_connect_attempts() -> u32 { 10 }
fn default_connect_interval() -> u64 { 5 }
fn default_source() -> SourceKind { SourceKind::Crossref }
fn default_api_base() -> String { crate::DEFAULT_API_BASE.to_string() }
fn default_openalex_api_base() -> String { crate::DEFAULT_OPENALEX_BASE.to_string() }
fn default_mailto() -> String { "citecrawl@example.org".to_string() }
fn default_fetch_timeout() -> u64 { 30 }
fn default_fetch_retries() -> u32 { 5 }
fn default_rate_limit_window() -> u64 { 3600 }
fn default_rate_limit_max_wait() -> u64 { 6 * 3600 }
fn default_requests_per_second() -> u32 { 2 }
fn default_max_depth() -> i32 { 2 }
fn default_politeness_ms() -> u64 { 1500 }
fn default_max_in_flight() -> usize { 5 }
fn default_max_concurrent_fetches() -> usize { 5 }
fn default_claim_lease() -> u64 { 600 }
fn default_failure_policy() -> FailurePolicy { FailurePolicy::Release }
fn default_dedup_backend() -> DedupBackend { DedupBackend::Postgres }
fn default_keywords_per_paper() -> usize { 8 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "citecrawl".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__CRAWLER__MAX_DEPTH=3
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run can honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let crawler = &self.crawler;
        if crawler.max_depth < -1 {
            return Err(ConfigError::Message(format!(
                "crawler.max_depth must be -1 (unbounded) or >= 0, got {}",
                crawler.max_depth
            )));
        }
        if crawler.claim_lease_secs < MIN_CLAIM_LEASE_SECS {
            return Err(ConfigError::Message(format!(
                "crawler.claim_lease_secs must be at least {}, got {}",
                MIN_CLAIM_LEASE_SECS, crawler.claim_lease_secs
            )));
        }
        let visibility = self.queue.visibility_timeout_secs;
        if visibility <= crawler.claim_lease_secs || visibility > crate::queue::MAX_VISIBILITY_SECS {
            return Err(ConfigError::Message(format!(
                "queue.visibility_timeout_secs must be above crawler.claim_lease_secs ({}) and at most {}, got {}",
                crawler.claim_lease_secs,
                crate::queue::MAX_VISIBILITY_SECS,
                visibility
            )));
        }
        Ok(())
    }

    /// Maximum depth, `None` when unbounded
    pub fn max_depth(&self) -> Option<u32> {
        u32::try_from(self.crawler.max_depth).ok()
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.crawler.politeness_ms)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.crawler.claim_lease_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.shutdown_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: default_true(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic_url: None,
            batch_size: default_queue_batch_size(),
            poll_timeout_secs: default_queue_poll_timeout(),
            visibility_timeout_secs: default_visibility_timeout(),
            publish_attempts: default_publish_attempts(),
            publish_max_backoff_secs: default_publish_max_backoff(),
            connect_attempts: default_connect_attempts(),
            connect_interval_secs: default_connect_interval(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            api_base: default_api_base(),
            openalex_api_base: default_openalex_api_base(),
            mailto: default_mailto(),
            timeout_secs: default_fetch_timeout(),
            max_retries: default_fetch_retries(),
            rate_limit_window_secs: default_rate_limit_window(),
            rate_limit_max_wait_secs: default_rate_limit_max_wait(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            politeness_ms: default_politeness_ms(),
            max_in_flight: default_max_in_flight(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            claim_lease_secs: default_claim_lease(),
            failure_policy: default_failure_policy(),
            dedup_backend: default_dedup_backend(),
            scope_filter: false,
            keywords_per_paper: default_keywords_per_paper(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_true(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            queue: QueueConfig::default(),
            fetch: FetchConfig::default(),
            crawler: CrawlerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
