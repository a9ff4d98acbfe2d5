use axum::http::HeaderName;

use crate::config::Config;
use crate::error::ServiceError;
use crate::rate_limit_config::BucketRules;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL. Blank is accepted and selects in-memory counters.
    pub fn validate_redis_url(url: &str) -> Result<(), ServiceError> {
        if url.trim().is_empty() {
            return Ok(());
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ServiceError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates environment name
    pub fn validate_environment(env: &str) -> Result<(), ServiceError> {
        let valid_envs = ["development", "staging", "production", "test"];
        if !valid_envs.contains(&env.to_lowercase().as_str()) {
            return Err(ServiceError::Configuration(format!(
                "Invalid environment '{}'. Must be one of: {:?}",
                env, valid_envs
            )));
        }

        Ok(())
    }

    /// Validates a window rule
    pub fn validate_rate_limit(max: u64, window_ms: u64) -> Result<(), ServiceError> {
        if max == 0 {
            return Err(ServiceError::Configuration(
                "Rate limit max must be greater than 0".to_string(),
            ));
        }

        if window_ms == 0 {
            return Err(ServiceError::Configuration(
                "Rate limit window must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The fail-open quota must look like a partially used window.
    pub fn validate_fail_open(limit: u64, remaining: u64) -> Result<(), ServiceError> {
        if limit == 0 {
            return Err(ServiceError::Configuration(
                "Fail-open limit must be greater than 0".to_string(),
            ));
        }

        if remaining >= limit {
            return Err(ServiceError::Configuration(format!(
                "Fail-open remaining ({}) must be below the fail-open limit ({})",
                remaining, limit
            )));
        }

        Ok(())
    }

    pub fn validate_public_base_url(url: &str) -> Result<(), ServiceError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ServiceError::Configuration(
                "Public base URL must start with 'http://' or 'https://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the whole service configuration
    pub fn validate(config: &Config) -> Result<(), ServiceError> {
        Self::validate_redis_url(&config.redis_url)?;
        Self::validate_environment(&config.environment)?;
        Self::validate_rate_limit(config.default_rate_limit, config.default_rate_window_ms)?;
        Self::validate_fail_open(config.fail_open_limit, config.fail_open_remaining)?;
        Self::validate_public_base_url(&config.public_base_url)?;

        if config.attribution_window_days == 0 {
            return Err(ServiceError::Configuration(
                "Attribution window must be at least one day".to_string(),
            ));
        }

        Self::validate_request_id_header(&config.request_id_header)?;
        Self::validate_webhook_secret(config)?;

        if config.counter_sweep_interval_secs == 0 {
            return Err(ServiceError::Configuration(
                "Counter sweep interval must be greater than 0".to_string(),
            ));
        }

        BucketRules::from_config(config)?;

        Ok(())
    }

    /// The id is echoed on every response, so the name must be a legal header
    pub fn validate_request_id_header(name: &str) -> Result<(), ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "Request id header cannot be empty".to_string(),
            ));
        }

        HeaderName::try_from(name).map_err(|_| {
            ServiceError::Configuration(format!("Request id header '{}' is not a valid header name", name))
        })?;

        Ok(())
    }

    pub fn validate_webhook_secret(config: &Config) -> Result<(), ServiceError> {
        if config.is_production() && config.conversion_webhook_secret.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "CONVERSION_WEBHOOK_SECRET is required in production".to_string(),
            ));
        }

        Ok(())
    }
}
