use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::rate_limiter::RateLimiter;
use crate::store::AttributionStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub counter_store: ServiceStatus,
    pub store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

pub struct HealthChecker {
    rate_limiter: RateLimiter,
    store: Arc<dyn AttributionStore>,
}

impl HealthChecker {
    pub fn new(rate_limiter: RateLimiter, store: Arc<dyn AttributionStore>) -> Self {
        // Touch the start time so uptime counts from construction
        let _ = *START_TIME;
        Self {
            rate_limiter,
            store,
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let counter_store = self.check_counter_store().await;
        let store = self.check_store().await;

        let overall_status = if store.status != "healthy" {
            "unhealthy"
        } else if counter_store.status != "healthy" {
            // Rate limiting fails open, so this only degrades the service
            "degraded"
        } else {
            "healthy"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            dependencies: DependencyStatus {
                counter_store,
                store,
            },
        }
    }

    async fn check_counter_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let available = self.rate_limiter.is_store_available().await;

        ServiceStatus {
            backend: self.rate_limiter.backend_name().to_string(),
            status: if available { "healthy" } else { "unavailable" }.to_string(),
            response_time_ms: start.elapsed().as_millis() as u64,
            error: (!available).then(|| "Counter store not reachable".to_string()),
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.store.health_check().await;

        ServiceStatus {
            backend: self.store.backend_name().to_string(),
            status: if result.is_ok() { "healthy" } else { "unavailable" }.to_string(),
            response_time_ms: start.elapsed().as_millis() as u64,
            error: result.err().map(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::WindowHit;
    use crate::counter_store::{CounterError, CounterStore, MemoryCounterStore};
    use crate::rate_limiter::FailOpenQuota;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_memory_backends_are_healthy() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), FailOpenQuota::default());
        let checker = HealthChecker::new(limiter, Arc::new(InMemoryStore::new()));

        let status = checker.check_health().await;
        assert_eq!(status.status, "healthy");
        assert_eq!(status.dependencies.counter_store.backend, "memory");
        assert!(status.dependencies.store.error.is_none());
    }

    struct UnreachableCounters;

    #[async_trait::async_trait]
    impl CounterStore for UnreachableCounters {
        async fn hit(&self, _: &str, _: u64, _: u64, _: u64) -> Result<WindowHit, CounterError> {
            Err(CounterError::Unreachable("timeout".to_string()))
        }

        async fn ping(&self) -> Result<(), CounterError> {
            Err(CounterError::Unreachable("timeout".to_string()))
        }

        fn backend_name(&self) -> &'static str {
            "redis"
        }
    }

    #[tokio::test]
    async fn test_counter_store_outage_only_degrades() {
        let limiter = RateLimiter::new(Arc::new(UnreachableCounters), FailOpenQuota::default());
        let checker = HealthChecker::new(limiter, Arc::new(InMemoryStore::new()));

        let status = checker.check_health().await;
        assert_eq!(status.status, "degraded");
        assert_eq!(status.dependencies.counter_store.status, "unavailable");
        assert_eq!(status.dependencies.store.status, "healthy");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["dependencies"]["counter_store"]["backend"], "redis");
    }
}
