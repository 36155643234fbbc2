use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for a Trawl task
///
/// Every section has defaults, so partial task files are accepted and
/// embedding applications can start from `Config::default()`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub client: ClientConfig,
    pub store: StoreConfig,
    pub task: TaskConfig,
}

/// Pipeline sizing and scheduling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Workers turning queue tickets into requests
    #[serde(rename = "maker-workers")]
    pub maker_workers: usize,

    /// Workers performing HTTP fetches
    #[serde(rename = "fetcher-workers")]
    pub fetcher_workers: usize,

    /// Workers decoding responses and running the controller
    #[serde(rename = "handler-workers")]
    pub handler_workers: usize,

    /// Workers deduplicating discovered links
    #[serde(rename = "filter-workers")]
    pub filter_workers: usize,

    /// Workers feeding the wait queue
    #[serde(rename = "scheduler-workers")]
    pub scheduler_workers: usize,

    /// Capacity of each bounded inter-stage channel
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,

    /// Maximum number of tickets held by the wait queue
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Minimum delay between two visits of the same URL (milliseconds)
    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    /// Delay before an errored URL is retried (milliseconds)
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Error count at which a URL is retired
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Per-host spacing used when the controller reports no interval (milliseconds)
    #[serde(rename = "default-interval-ms")]
    pub default_interval_ms: u64,

    /// Token bucket burst size per host
    #[serde(rename = "default-burst")]
    pub default_burst: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            maker_workers: 2,
            fetcher_workers: 8,
            handler_workers: 4,
            filter_workers: 2,
            scheduler_workers: 2,
            channel_capacity: 64,
            queue_capacity: 64 << 10,
            min_delay_ms: 0,
            retry_delay_ms: 5000,
            max_retries: 3,
            default_interval_ms: 1000,
            default_burst: 1,
        }
    }
}

impl CrawlerConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Whole-request timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Maximum redirect hops followed per request
    #[serde(rename = "max-redirects")]
    pub max_redirects: usize,

    /// Largest body that will be read into memory
    #[serde(rename = "max-body-bytes")]
    pub max_body_bytes: usize,

    /// Charset assumed when neither headers nor content declare one
    #[serde(rename = "default-charset")]
    pub default_charset: String,

    /// Byte budget of the HTTP cache pool; 0 disables caching
    #[serde(rename = "cache-max-bytes")]
    pub cache_max_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("trawl/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_redirects: 10,
            max_body_bytes: 1 << 20,
            default_charset: "utf-8".to_string(),
            cache_max_bytes: 64 << 20,
        }
    }
}

/// Which URL store backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// URL store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Path to the SQLite database file
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: "./trawl.db".to_string(),
        }
    }
}

/// What to crawl
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// URLs the crawl starts from
    pub seeds: Vec<String>,

    /// URL patterns to follow; empty means every URL is accepted
    pub allow: Vec<String>,

    /// URL patterns never to follow
    pub disallow: Vec<String>,

    /// Maximum link depth from the nearest seed; 0 means unlimited
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Revisit period for fetched URLs (seconds); 0 visits each URL once
    #[serde(rename = "revisit-secs")]
    pub revisit_secs: u64,
}
