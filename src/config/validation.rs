use crate::config::types::{
    ClientConfig, Config, CrawlerConfig, StoreBackend, StoreConfig, TaskConfig,
};
use crate::url::parse_pattern;
use crate::ConfigError;
use url::Url;

const MAX_WORKERS: usize = 256;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_client_config(&config.client)?;
    validate_store_config(&config.store)?;
    validate_task_config(&config.task)?;
    Ok(())
}

/// Validates pipeline sizing
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    for (name, count) in [
        ("maker_workers", config.maker_workers),
        ("fetcher_workers", config.fetcher_workers),
        ("handler_workers", config.handler_workers),
        ("filter_workers", config.filter_workers),
        ("scheduler_workers", config.scheduler_workers),
    ] {
        if count < 1 || count > MAX_WORKERS {
            return Err(ConfigError::Validation(format!(
                "{} must be between 1 and {}, got {}",
                name, MAX_WORKERS, count
            )));
        }
    }

    if config.channel_capacity < 1 {
        return Err(ConfigError::Validation(
            "channel_capacity must be >= 1".to_string(),
        ));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue_capacity must be >= 1".to_string(),
        ));
    }

    if config.default_burst < 1 {
        return Err(ConfigError::Validation(format!(
            "default_burst must be >= 1, got {}",
            config.default_burst
        )));
    }

    Ok(())
}

/// Validates HTTP client settings
fn validate_client_config(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_body_bytes == 0 {
        return Err(ConfigError::Validation(
            "max_body_bytes must be >= 1".to_string(),
        ));
    }

    if encoding_rs::Encoding::for_label(config.default_charset.as_bytes()).is_none() {
        return Err(ConfigError::Validation(format!(
            "default_charset '{}' is not a known encoding label",
            config.default_charset
        )));
    }

    Ok(())
}

/// Validates store settings
fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.backend == StoreBackend::Sqlite && config.path.is_empty() {
        return Err(ConfigError::Validation(
            "store path cannot be empty for the sqlite backend".to_string(),
        ));
    }
    Ok(())
}

/// Validates seeds and URL patterns
fn validate_task_config(config: &TaskConfig) -> Result<(), ConfigError> {
    for seed in &config.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }

    for pattern in config.allow.iter().chain(config.disallow.iter()) {
        parse_pattern(pattern)?;
    }

    Ok(())
}
