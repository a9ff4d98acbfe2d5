use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::attribution::AttributionService;
use crate::config::Config;
use crate::config_validator::ConfigValidator;
use crate::counter_store::{CounterStore, MemoryCounterStore};
use crate::coupon::CouponService;
use crate::error::ServiceError;
use crate::handlers::{
    affiliate_stats, apply_referral_code, check_rate_limit, convert_referral, create_coupon,
    enroll_affiliate, health_check, not_found, readiness_check, record_referral_click,
    AppState, SharedState,
};
use crate::health::HealthChecker;
use crate::key_generator::KeyGenerator;
use crate::middleware::{
    logging_middleware, rate_limit_middleware, request_context_middleware,
    webhook_auth_middleware, BucketGuard,
};
use crate::rate_limit_config::{BucketRules, BUCKET_API, BUCKET_COUPON, BUCKET_REFERRAL};
use crate::rate_limiter::{now_millis, FailOpenQuota, RateLimiter};
use crate::redis::RedisCounterStore;
use crate::store::{AttributionStore, InMemoryStore};

impl AppState {
    /// Wires services around explicitly constructed store clients
    pub fn new(
        config: Config,
        counter_store: Arc<dyn CounterStore>,
        store: Arc<dyn AttributionStore>,
    ) -> Result<SharedState, ServiceError> {
        let rate_limiter = RateLimiter::new(
            counter_store,
            FailOpenQuota {
                limit: config.fail_open_limit,
                remaining: config.fail_open_remaining,
            },
        );

        Ok(Arc::new(AppState {
            bucket_rules: BucketRules::from_config(&config)?,
            key_generator: KeyGenerator::default(),
            attribution: AttributionService::new(store.clone()),
            coupons: CouponService::new(store.clone(), config.public_base_url.clone()),
            health: HealthChecker::new(rate_limiter.clone(), store),
            rate_limiter,
            config: Arc::new(config),
        }))
    }
}

/// Redis when configured and reachable, process memory otherwise
pub async fn connect_counter_store(config: &Config) -> Arc<dyn CounterStore> {
    if !config.redis_enabled() {
        tracing::info!("REDIS_URL not set, using in-memory rate limit counters");
        return Arc::new(MemoryCounterStore::new());
    }

    match RedisCounterStore::connect(&config.redis_url).await {
        Ok(store) => {
            tracing::info!("Connected to Redis counter store");
            Arc::new(store)
        }
        Err(err) => {
            tracing::warn!(error = %err, "Redis unavailable, running with local-only counters");
            Arc::new(MemoryCounterStore::new())
        }
    }
}

/// Periodically drops expired counters so idle callers do not accumulate
pub fn spawn_counter_sweeper(store: Arc<dyn CounterStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = store.sweep_expired(now_millis()).await;
            if removed > 0 {
                tracing::debug!(removed, backend = store.backend_name(), "Swept expired counters");
            }
        }
    })
}

pub fn create_app(state: SharedState) -> Router {
    let guard = |bucket: &'static str| {
        middleware::from_fn_with_state(BucketGuard::new(state.clone(), bucket), rate_limit_middleware)
    };

    let webhook_routes = Router::new()
        .route("/api/referral/convert", post(convert_referral))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            webhook_auth_middleware,
        ));

    let referral_routes = Router::new()
        .route("/api/referral/click", post(record_referral_click))
        .route("/api/referral/apply", post(apply_referral_code))
        .route_layer(guard(BUCKET_REFERRAL));

    let coupon_routes = Router::new()
        .route("/api/coupons", post(create_coupon))
        .route_layer(guard(BUCKET_COUPON));

    let affiliate_routes = Router::new()
        .route("/api/affiliates", post(enroll_affiliate))
        .route("/api/affiliates/me", get(affiliate_stats))
        .route_layer(guard(BUCKET_API));

    Router::new()
        // Internal endpoints
        .route("/api/rate-limit", post(check_rate_limit))
        .merge(webhook_routes)
        .merge(referral_routes)
        .merge(coupon_routes)
        .merge(affiliate_routes)
        // Health and readiness endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .fallback(not_found)
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(state, request_context_middleware))
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, ServiceError> {
        ConfigValidator::validate(&config)?;

        let bind_addr = config.bind_addr;
        if config.conversion_webhook_secret.trim().is_empty() {
            tracing::warn!("CONVERSION_WEBHOOK_SECRET not set, conversion webhooks will be rejected");
        }

        let counter_store = connect_counter_store(&config).await;
        spawn_counter_sweeper(
            counter_store.clone(),
            Duration::from_secs(config.counter_sweep_interval_secs),
        );

        let store: Arc<dyn AttributionStore> = Arc::new(InMemoryStore::new());
        let state = AppState::new(config, counter_store, store)?;

        Ok(Self {
            app: create_app(state),
            bind_addr,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Attribution server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweeper_frees_expired_memory_counters() {
        let counters = MemoryCounterStore::new();
        let now = now_millis();
        for i in 0..50 {
            counters.hit(&format!("ratelimit:ip:{}", i), 5, 1, now).await.unwrap();
        }

        let sweeper = spawn_counter_sweeper(Arc::new(counters.clone()), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(60)).await;
        sweeper.abort();

        assert_eq!(counters.len().await, 0);
    }

    #[tokio::test]
    async fn test_app_state_rejects_bad_bucket_rules() {
        let config = Config {
            bucket_rules: "[]".to_string(),
            ..Config::default()
        };
        let result = AppState::new(
            config,
            Arc::new(MemoryCounterStore::new()),
            Arc::new(InMemoryStore::new()),
        );
        assert!(matches!(result, Err(ServiceError::Configuration(_))));
    }
}
