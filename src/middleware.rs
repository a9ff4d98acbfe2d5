use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::info;

use crate::error::{ApiError, ServiceError};
use crate::handlers::{insert_rate_limit_headers, SharedState};
use crate::key_generator::KeyGenerator;
use crate::rate_limiter::now_millis;
use crate::request_context::{assign_request_id, attach_request_id, RequestContext};
use crate::validation::RequestValidator;

/// Assigns the correlation id and echoes it on every response
pub async fn request_context_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_name = state.config.request_id_header.as_str();
    let request_id = assign_request_id(request.headers(), header_name);
    let ctx = RequestContext::new(request_id.clone(), !state.config.is_production());
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    attach_request_id(&mut response, header_name, &request_id);
    response
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    info!(
        target: "attribution::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "attribution::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

/// Only the billing webhook may report conversions
pub async fn webhook_auth_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(err) = RequestValidator::require_webhook_secret(
        request.headers(),
        &state.config.conversion_webhook_secret,
    ) {
        let ctx = request
            .extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::new(String::new(), false));
        tracing::warn!(request_id = %ctx.request_id, "Rejected unauthenticated conversion webhook");
        return ApiError::new(&ctx, err).into_response();
    }

    next.run(request).await
}

/// Route-level limiter bound to one named bucket
#[derive(Clone)]
pub struct BucketGuard {
    pub state: SharedState,
    pub bucket: &'static str,
}

impl BucketGuard {
    pub fn new(state: SharedState, bucket: &'static str) -> Self {
        Self { state, bucket }
    }
}

pub async fn rate_limit_middleware(
    State(guard): State<BucketGuard>,
    request: Request,
    next: Next,
) -> Response {
    let rules = &guard.state.bucket_rules;
    if !rules.is_enabled(guard.bucket) {
        return next.run(request).await;
    }
    let rule = *rules.get_rule(guard.bucket);

    let ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(|| RequestContext::new(String::new(), false));

    let client_ip = get_client_ip(&request);
    let key = match guard
        .state
        .key_generator
        .generate_key(request.headers(), &client_ip, guard.bucket)
    {
        Ok(key) => key,
        Err(err) => return ApiError::new(&ctx, err).into_response(),
    };

    let decision = match guard
        .state
        .rate_limiter
        .check_rate_limit(&key, rule.max, rule.window_ms())
        .await
    {
        Ok(decision) => decision,
        Err(err) => return ApiError::new(&ctx, err).into_response(),
    };

    if !decision.allowed {
        tracing::info!(
            request_id = %ctx.request_id,
            key = %key,
            "Request rate limited"
        );
        let retry_after_secs = decision.retry_after_secs(now_millis());
        let mut response =
            ApiError::new(&ctx, ServiceError::RateLimited { retry_after_secs }).into_response();
        insert_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    insert_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn get_client_ip(request: &Request) -> String {
    if let Some(ip) = KeyGenerator::extract_client_ip(request.headers()) {
        return ip;
    }

    // Fallback to connection info
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}
