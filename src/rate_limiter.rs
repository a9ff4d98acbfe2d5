use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::algorithms::RateLimitDecision;
use crate::counter_store::CounterStore;
use crate::error::ServiceError;
use crate::key_generator::RateLimitKey;

/// Quota reported when the counter store cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailOpenQuota {
    pub limit: u64,
    pub remaining: u64,
}

impl Default for FailOpenQuota {
    fn default() -> Self {
        Self {
            limit: 100,
            remaining: 99,
        }
    }
}

/// Window rate limiter over a shared [`CounterStore`].
///
/// Store failures never block traffic: the check fails open with the
/// configured [`FailOpenQuota`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    fail_open: FailOpenQuota,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, fail_open: FailOpenQuota) -> Self {
        Self { store, fail_open }
    }

    pub fn fail_open_quota(&self) -> FailOpenQuota {
        self.fail_open
    }

    pub async fn check_rate_limit(
        &self,
        key: &RateLimitKey,
        max: u64,
        window_ms: u64,
    ) -> Result<RateLimitDecision, ServiceError> {
        self.check_raw(&key.storage_key(), max, window_ms, now_millis())
            .await
    }

    /// Check against a raw counter key at an explicit time
    pub async fn check_raw(
        &self,
        storage_key: &str,
        max: u64,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<RateLimitDecision, ServiceError> {
        if max == 0 || window_ms == 0 {
            return Err(ServiceError::InvalidInput(
                "max and windowMs must be greater than 0".to_string(),
            ));
        }

        match self.store.hit(storage_key, max, window_ms, now_ms).await {
            Ok(hit) => {
                let decision = RateLimitDecision::from_hit(hit, max, window_ms);
                if !decision.allowed {
                    tracing::debug!(key = %storage_key, count = hit.count, "Rate limit reached");
                }
                Ok(decision)
            }
            Err(err) => {
                tracing::warn!(
                    key = %storage_key,
                    backend = self.store.backend_name(),
                    error = %err,
                    "Counter store unavailable, failing open"
                );
                Ok(self.fail_open_decision(window_ms, now_ms))
            }
        }
    }

    fn fail_open_decision(&self, window_ms: u64, now_ms: u64) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            limit: self.fail_open.limit,
            remaining: self.fail_open.remaining,
            reset_at_ms: now_ms.saturating_add(window_ms),
            degraded: true,
        }
    }

    pub async fn is_store_available(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::WindowHit;
    use crate::counter_store::{CounterError, MemoryCounterStore};
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn hit(&self, _: &str, _: u64, _: u64, _: u64) -> Result<WindowHit, CounterError> {
            Err(CounterError::Unreachable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<(), CounterError> {
            Err(CounterError::Unreachable("connection refused".to_string()))
        }

        fn backend_name(&self) -> &'static str {
            "down"
        }
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryCounterStore::new()), FailOpenQuota::default())
    }

    #[tokio::test]
    async fn test_rejects_after_max_within_window() {
        let limiter = limiter();
        for i in 1..=5 {
            let decision = limiter.check_raw("k", 5, 1_000, 100).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 5 - i);
        }

        let decision = limiter.check_raw("k", 5, 1_000, 200).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at_ms, 1_100);
        assert_eq!(decision.retry_after_secs(200), 1);
    }

    #[tokio::test]
    async fn test_allows_again_after_window_elapses() {
        let limiter = limiter();
        limiter.check_raw("k", 1, 1_000, 0).await.unwrap();
        assert!(!limiter.check_raw("k", 1, 1_000, 500).await.unwrap().allowed);

        let decision = limiter.check_raw("k", 1, 1_000, 1_000).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at_ms, 2_000);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_unreachable() {
        let quota = FailOpenQuota {
            limit: 50,
            remaining: 49,
        };
        let limiter = RateLimiter::new(Arc::new(DownStore), quota);

        let decision = limiter.check_raw("k", 5, 1_000, 0).await.unwrap();
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.limit, 50);
        assert_eq!(decision.remaining, 49);
        assert!(!limiter.is_store_available().await);
    }

    #[tokio::test]
    async fn test_rejects_zero_parameters() {
        let limiter = limiter();
        assert!(limiter.check_raw("k", 0, 1_000, 0).await.is_err());
        assert!(limiter.check_raw("k", 1, 0, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_checks_respect_max() {
        let limiter = limiter();
        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check_raw("hot", 7, 60_000, 10).await.unwrap().allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 7);
    }
}
