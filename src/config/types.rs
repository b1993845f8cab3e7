use serde::Deserialize;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub target: TargetConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    pub storage: StorageConfig,
}

/// Target site and pagination bounds
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Listing URL without the page query
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Query parameter carrying the page number
    #[serde(rename = "page-query", default = "default_page_query")]
    pub page_query: String,

    /// First listing page
    #[serde(rename = "first-page", default = "default_first_page")]
    pub first_page: u64,

    /// Last listing page; discovered from the listing when absent
    #[serde(rename = "last-page", default)]
    pub last_page: Option<u64>,

    /// Upper bound on the number of pages enumerated in one run
    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u64>,
}

/// Worker pool and circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Consecutive task failures that halt the run
    #[serde(rename = "failure-threshold", default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Number of most recent outcomes considered for the failure rate
    #[serde(rename = "failure-window", default = "default_failure_window")]
    pub failure_window: u32,

    /// Failure ratio within the window that halts the run
    #[serde(rename = "failure-rate", default = "default_failure_rate")]
    pub failure_rate: f64,

    /// Lower bound of the pause a worker takes after each task (milliseconds)
    #[serde(rename = "delay-min-ms", default = "default_delay_min_ms")]
    pub delay_min_ms: u64,

    /// Upper bound of the pause a worker takes after each task (milliseconds)
    #[serde(rename = "delay-max-ms", default = "default_delay_max_ms")]
    pub delay_max_ms: u64,

    /// Shift visited pages when the newest-first listing grew since the last run
    #[serde(rename = "track-listing-growth", default = "default_true")]
    pub track_listing_growth: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            failure_threshold: default_failure_threshold(),
            failure_window: default_failure_window(),
            failure_rate: default_failure_rate(),
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
            track_listing_growth: true,
        }
    }
}

/// HTTP fetch and retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Maximum attempts per page, including the first one
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay of the exponential backoff (milliseconds)
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Cap on a single backoff delay (milliseconds)
    #[serde(rename = "backoff-max-ms", default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Random spread applied to each delay (milliseconds, plus or minus)
    #[serde(rename = "jitter-ms", default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Whole-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connect timeout (seconds)
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "accept-language", default = "default_accept_language")]
    pub accept_language: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter_ms: default_jitter_ms(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    File,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// SQLite database holding reviews and visited pages
    #[serde(rename = "database-path", default)]
    pub database_path: Option<String>,

    /// JSON-lines file receiving reviews (file backend)
    #[serde(rename = "records-path", default)]
    pub records_path: Option<String>,

    /// Append-only visited page log (file backend)
    #[serde(rename = "tracker-path", default)]
    pub tracker_path: Option<String>,
}

fn default_page_query() -> String {
    "page".to_string()
}

fn default_first_page() -> u64 {
    1
}

fn default_workers() -> u32 {
    4
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_failure_window() -> u32 {
    20
}

fn default_failure_rate() -> f64 {
    0.5
}

fn default_delay_min_ms() -> u64 {
    2000
}

fn default_delay_max_ms() -> u64 {
    4000
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/58.0.3029.110 Safari/537.3"
        .to_string()
}

fn default_accept_language() -> String {
    "uk-UA,uk;q=0.9,en-US;q=0.8,en;q=0.7".to_string()
}
