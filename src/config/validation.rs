use crate::config::types::{
    Config, CrawlerConfig, FetchConfig, StorageBackend, StorageConfig, TargetConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_target_config(&config.target)?;
    validate_crawler_config(&config.crawler)?;
    validate_fetch_config(&config.fetch)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates the target site section
fn validate_target_config(config: &TargetConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.page_query.is_empty() {
        return Err(ConfigError::Validation(
            "page-query cannot be empty".to_string(),
        ));
    }

    if config.first_page < 1 {
        return Err(ConfigError::Validation(
            "first-page must be >= 1".to_string(),
        ));
    }

    if let Some(last_page) = config.last_page {
        if last_page < config.first_page {
            return Err(ConfigError::Validation(format!(
                "last-page ({}) must not be below first-page ({})",
                last_page, config.first_page
            )));
        }
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max-pages must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker pool and breaker settings
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure-threshold must be >= 1".to_string(),
        ));
    }

    if config.failure_window < 1 {
        return Err(ConfigError::Validation(
            "failure-window must be >= 1".to_string(),
        ));
    }

    if !(config.failure_rate > 0.0 && config.failure_rate <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "failure-rate must be in (0, 1], got {}",
            config.failure_rate
        )));
    }

    if config.delay_min_ms > config.delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "delay-min-ms ({}) must not exceed delay-max-ms ({})",
            config.delay_min_ms, config.delay_max_ms
        )));
    }

    Ok(())
}

/// Validates retry and HTTP client settings
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be between 1 and 20, got {}",
            config.max_attempts
        )));
    }

    if config.backoff_base_ms > config.backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-base-ms ({}) must not exceed backoff-max-ms ({})",
            config.backoff_base_ms, config.backoff_max_ms
        )));
    }

    if config.timeout_secs < 1 || config.connect_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeouts must be >= 1 second".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates that the selected backend has the paths it needs
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    fn require(path: &Option<String>, key: &str, backend: &str) -> Result<(), ConfigError> {
        match path {
            Some(p) if !p.is_empty() => Ok(()),
            _ => Err(ConfigError::Validation(format!(
                "{} is required for the {} backend",
                key, backend
            ))),
        }
    }

    match config.backend {
        StorageBackend::Sqlite => require(&config.database_path, "database-path", "sqlite"),
        StorageBackend::File => {
            require(&config.records_path, "records-path", "file")?;
            require(&config.tracker_path, "tracker-path", "file")
        }
    }
}
