pub mod algorithms;
pub mod attribution;
pub mod config;
pub mod config_validator;
pub mod counter_store;
pub mod coupon;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod middleware;
pub mod model;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod redis;
pub mod referral_code;
pub mod request_context;
pub mod response;
pub mod server;
pub mod store;
pub mod validation;

pub use config::Config;
pub use error::{Result, ServiceError};
pub use handlers::{AppState, SharedState};
pub use server::create_app;
