//! Key generation utilities for rate limiting.

use axum::http::HeaderMap;
use std::fmt;

use crate::error::ServiceError;

/// Caller identity plus the named limiter bucket it is counted against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identity: String,
    pub bucket: String,
}

impl RateLimitKey {
    pub fn new(identity: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            bucket: bucket.into(),
        }
    }

    /// Counter store key
    pub fn storage_key(&self) -> String {
        format!(
            "ratelimit:{}:{}",
            KeyGenerator::sanitize_key(&self.bucket),
            KeyGenerator::sanitize_key(&self.identity)
        )
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.identity)
    }
}

/// Strategy for deriving the caller identity
#[derive(Debug, Clone, PartialEq)]
pub enum KeyStrategy {
    /// Use client IP address
    IpAddress,
    /// Use user ID from the `x-user-id` header
    UserId,
    /// User id when present, client IP otherwise
    UserOrIp,
    /// Composite key from multiple sources
    Composite(Vec<KeyStrategy>),
}

/// Generates rate limiting keys based on request context
pub struct KeyGenerator {
    default_strategy: KeyStrategy,
}

impl KeyGenerator {
    pub fn new(strategy: KeyStrategy) -> Self {
        Self {
            default_strategy: strategy,
        }
    }

    pub fn generate_key(
        &self,
        headers: &HeaderMap,
        client_ip: &str,
        bucket: &str,
    ) -> Result<RateLimitKey, ServiceError> {
        let identity = Self::identity(&self.default_strategy, headers, client_ip)?;
        Ok(RateLimitKey::new(identity, bucket))
    }

    fn identity(
        strategy: &KeyStrategy,
        headers: &HeaderMap,
        client_ip: &str,
    ) -> Result<String, ServiceError> {
        match strategy {
            KeyStrategy::IpAddress => Ok(format!("ip:{}", client_ip)),
            KeyStrategy::UserId => Self::user_id(headers)
                .map(|id| format!("user:{}", id))
                .ok_or(ServiceError::Unauthorized),
            KeyStrategy::UserOrIp => Ok(Self::user_id(headers)
                .map(|id| format!("user:{}", id))
                .unwrap_or_else(|| format!("ip:{}", client_ip))),
            KeyStrategy::Composite(strategies) => {
                let mut key_parts = Vec::new();
                for sub_strategy in strategies {
                    if matches!(sub_strategy, KeyStrategy::Composite(_)) {
                        return Err(ServiceError::Configuration(
                            "Nested composite keys not supported".to_string(),
                        ));
                    }
                    key_parts.push(Self::identity(sub_strategy, headers, client_ip)?);
                }
                Ok(key_parts.join(":"))
            }
        }
    }

    fn user_id(headers: &HeaderMap) -> Option<&str> {
        headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Extract client IP from proxy headers
    pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        header("x-forwarded-for")
            .and_then(|xff| xff.split(',').next().map(str::trim))
            .or_else(|| header("x-real-ip"))
            .or_else(|| header("cf-connecting-ip"))
            .map(str::to_string)
    }

    /// Sanitize key components to ensure valid Redis keys
    pub fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_alphanumeric() || c == ':' || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(KeyStrategy::UserOrIp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn create_test_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("user123"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1, 10.0.0.1"));
        headers
    }

    #[test]
    fn test_ip_address_strategy() {
        let generator = KeyGenerator::new(KeyStrategy::IpAddress);
        let key = generator
            .generate_key(&create_test_headers(), "192.168.1.1", "leaderboard")
            .unwrap();
        assert_eq!(key.storage_key(), "ratelimit:leaderboard:ip:192.168.1.1");
    }

    #[test]
    fn test_user_id_strategy() {
        let generator = KeyGenerator::new(KeyStrategy::UserId);
        let key = generator
            .generate_key(&create_test_headers(), "192.168.1.1", "referral")
            .unwrap();
        assert_eq!(key.storage_key(), "ratelimit:referral:user:user123");
    }

    #[test]
    fn test_user_id_strategy_requires_header() {
        let generator = KeyGenerator::new(KeyStrategy::UserId);
        let result = generator.generate_key(&HeaderMap::new(), "192.168.1.1", "referral");
        assert!(matches!(result, Err(ServiceError::Unauthorized)));
    }

    #[test]
    fn test_user_or_ip_falls_back_to_ip() {
        let generator = KeyGenerator::default();
        let key = generator
            .generate_key(&HeaderMap::new(), "10.1.1.1", "api")
            .unwrap();
        assert_eq!(key.identity, "ip:10.1.1.1");
    }

    #[test]
    fn test_composite_strategy() {
        let strategy = KeyStrategy::Composite(vec![KeyStrategy::UserId, KeyStrategy::IpAddress]);
        let generator = KeyGenerator::new(strategy);
        let key = generator
            .generate_key(&create_test_headers(), "192.168.1.1", "api")
            .unwrap();
        assert_eq!(key.identity, "user:user123:ip:192.168.1.1");
    }

    #[test]
    fn test_extract_client_ip() {
        let ip = KeyGenerator::extract_client_ip(&create_test_headers());
        assert_eq!(ip.as_deref(), Some("192.168.1.1"));
        assert_eq!(KeyGenerator::extract_client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_sanitize_key() {
        let sanitized = KeyGenerator::sanitize_key("test@key#with$special%chars");
        assert_eq!(sanitized, "test_key_with_special_chars");
    }
}
