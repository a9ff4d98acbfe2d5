use envconfig::Envconfig;
use std::net::SocketAddr;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL for the shared rate limit counters.
    /// Empty means counters are kept in process memory.
    #[envconfig(from = "REDIS_URL", default = "")]
    pub redis_url: String,

    /// Deployment environment (development, staging, production, test)
    #[envconfig(from = "APP_ENV", default = "development")]
    pub environment: String,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Requests allowed per window for buckets without an explicit rule
    #[envconfig(from = "DEFAULT_RATE_LIMIT", default = "60")]
    pub default_rate_limit: u64,

    #[envconfig(from = "DEFAULT_RATE_WINDOW_MS", default = "60000")]
    pub default_rate_window_ms: u64,

    /// Quota reported when the counter store cannot be reached
    #[envconfig(from = "FAIL_OPEN_LIMIT", default = "100")]
    pub fail_open_limit: u64,

    #[envconfig(from = "FAIL_OPEN_REMAINING", default = "99")]
    pub fail_open_remaining: u64,

    /// Base URL used to build coupon tracking links
    #[envconfig(from = "PUBLIC_BASE_URL", default = "http://localhost:3000")]
    pub public_base_url: String,

    /// Lifetime of the referral attribution cookie
    #[envconfig(from = "ATTRIBUTION_WINDOW_DAYS", default = "30")]
    pub attribution_window_days: u32,

    /// Seconds between sweeps of expired in-memory rate limit counters
    #[envconfig(from = "COUNTER_SWEEP_INTERVAL", default = "300")]
    pub counter_sweep_interval_secs: u64,

    /// JSON map of per-bucket rule overrides, e.g.
    /// `{"coupon": {"max": 5, "window": "1m", "enabled": true}}`
    #[envconfig(from = "BUCKET_RULES", default = "")]
    pub bucket_rules: String,

    /// Shared secret the billing webhook presents when reporting conversions.
    /// Empty rejects every conversion request.
    #[envconfig(from = "CONVERSION_WEBHOOK_SECRET", default = "")]
    pub conversion_webhook_secret: String,

    /// Header carrying the correlation id on requests and responses
    #[envconfig(from = "REQUEST_ID_HEADER", default = "x-request-id")]
    pub request_id_header: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn attribution_window_secs(&self) -> u64 {
        u64::from(self.attribution_window_days) * 24 * 60 * 60
    }

    pub fn redis_enabled(&self) -> bool {
        !self.redis_url.trim().is_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: String::new(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            default_rate_limit: 60,
            default_rate_window_ms: 60_000,
            fail_open_limit: 100,
            fail_open_remaining: 99,
            public_base_url: "http://localhost:3000".to_string(),
            attribution_window_days: 30,
            counter_sweep_interval_secs: 300,
            bucket_rules: String::new(),
            conversion_webhook_secret: String::new(),
            request_id_header: "x-request-id".to_string(),
        }
    }
}
