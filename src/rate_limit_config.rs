use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::error::ServiceError;

/// Named limiter buckets used by the HTTP routes
pub const BUCKET_API: &str = "api";
pub const BUCKET_REFERRAL: &str = "referral";
pub const BUCKET_COUPON: &str = "coupon";

/// Per-bucket rate limiting rules
#[derive(Debug, Clone)]
pub struct BucketRules {
    pub rules: HashMap<String, RateLimitRule>,
    pub default_rule: RateLimitRule,
}

/// Individual rate limiting rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl RateLimitRule {
    pub fn new(max: u64, window: Duration) -> Self {
        Self {
            max,
            window,
            enabled: true,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    /// Validate rule parameters. Disabled rules are never applied.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.max == 0 {
            return Err("Max requests must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            return Err("Window must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl BucketRules {
    /// Default rule and built-in bucket rules, then any `BUCKET_RULES` overrides
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let default_rule = RateLimitRule::new(
            config.default_rate_limit,
            Duration::from_millis(config.default_rate_window_ms),
        );

        let mut rules = Self {
            rules: HashMap::new(),
            default_rule,
        };
        rules.set_rule(BUCKET_REFERRAL, RateLimitRule::new(20, Duration::from_secs(60)));
        rules.set_rule(BUCKET_COUPON, RateLimitRule::new(10, Duration::from_secs(60)));

        if !config.bucket_rules.trim().is_empty() {
            let overrides: HashMap<String, RateLimitRule> =
                serde_json::from_str(&config.bucket_rules).map_err(|e| {
                    ServiceError::Configuration(format!("Invalid BUCKET_RULES: {}", e))
                })?;

            for (bucket, rule) in overrides {
                rule.validate().map_err(|e| {
                    ServiceError::Configuration(format!("Invalid rule for bucket '{}': {}", bucket, e))
                })?;
                rules.set_rule(bucket, rule);
            }
        }

        Ok(rules)
    }

    /// Rule for a bucket, falling back to the default
    pub fn get_rule(&self, bucket: &str) -> &RateLimitRule {
        self.rules.get(bucket).unwrap_or(&self.default_rule)
    }

    pub fn set_rule(&mut self, bucket: impl Into<String>, rule: RateLimitRule) {
        self.rules.insert(bucket.into(), rule);
    }

    pub fn is_enabled(&self, bucket: &str) -> bool {
        self.get_rule(bucket).enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bucket_uses_default() {
        let rules = BucketRules::from_config(&Config::default()).unwrap();
        assert_eq!(rules.get_rule("unknown").max, 60);
        assert_eq!(rules.get_rule(BUCKET_REFERRAL).max, 20);
        assert_eq!(rules.get_rule(BUCKET_COUPON).max, 10);
    }

    #[test]
    fn test_overrides_replace_builtin_rules() {
        let config = Config {
            bucket_rules: r#"{"coupon": {"max": 5, "window": "30s"}, "api": {"max": 1, "window": "1s", "enabled": false}}"#
                .to_string(),
            ..Config::default()
        };
        let rules = BucketRules::from_config(&config).unwrap();

        let coupon = rules.get_rule(BUCKET_COUPON);
        assert_eq!(coupon.max, 5);
        assert_eq!(coupon.window_ms(), 30_000);
        assert!(rules.is_enabled(BUCKET_COUPON));
        assert!(!rules.is_enabled(BUCKET_API));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let config = Config {
            bucket_rules: r#"{"referral": {"max": 10, "window": "0s"}}"#.to_string(),
            ..Config::default()
        };
        assert!(matches!(
            BucketRules::from_config(&config),
            Err(ServiceError::Configuration(_))
        ));
    }
}
