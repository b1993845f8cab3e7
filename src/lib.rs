//! Review-Harvester: an incremental review listing harvester
//!
//! This crate walks the paginated review listing of a single site, fetching
//! pages with bounded retry, extracting review records, persisting them through
//! a pluggable repository, and tracking which pages are done so that re-runs
//! only pick up what is left.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;
pub mod tracker;

use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Parser setup failed: {0}")]
    Parse(#[from] crawler::ParseError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Target unreachable at {url}: {reason}")]
    TargetUnreachable { url: String, reason: String },

    #[error("Invalid task transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::TaskStage,
        to: state::TaskStage,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{run_harvest, HarvestOptions};
pub use output::{ExitStatus, RunSummary};
pub use state::{CrawlTask, PageId, TaskStage};
pub use storage::Review;
