use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::attribution::{AttributionService, ConversionStatus};
use crate::config::Config;
use crate::coupon::{CouponService, CreateCouponRequest};
use crate::error::{ApiError, ServiceError, WithContext};
use crate::health::HealthChecker;
use crate::key_generator::KeyGenerator;
use crate::model::FollowerCounts;
use crate::rate_limit_config::BucketRules;
use crate::rate_limiter::RateLimiter;
use crate::request_context::RequestContext;
use crate::response::{
    ApplyReferralResponse, Envelope, RateLimitResponse, SuccessResponse,
};
use crate::validation::{
    AppJson, ApplyReferralRequest, ClickRequest, ConvertReferralRequest, RateLimitRequest,
    RequestValidator,
};

pub const REFERRAL_CODE_COOKIE: &str = "referral_code";
pub const REFERRAL_CLICK_COOKIE: &str = "referral_click";

/// Shared state
pub type SharedState = Arc<AppState>;

/// Clients and services constructed once per process and handed to every handler
pub struct AppState {
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
    pub bucket_rules: BucketRules,
    pub key_generator: KeyGenerator,
    pub attribution: AttributionService,
    pub coupons: CouponService,
    pub health: HealthChecker,
}

/// Internal rate limit check
pub async fn check_rate_limit(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    AppJson(payload): AppJson<RateLimitRequest>,
) -> Result<Response, ApiError> {
    RequestValidator::validate_payload(&payload).with_ctx(&ctx)?;
    RequestValidator::validate_key(&payload.key).with_ctx(&ctx)?;

    let storage_key = format!(
        "ratelimit:{}",
        KeyGenerator::sanitize_key(payload.key.trim())
    );
    let now = crate::rate_limiter::now_millis();

    let decision = match state
        .rate_limiter
        .check_raw(&storage_key, payload.max, payload.window_ms, now)
        .await
    {
        Ok(decision) => decision,
        Err(err) => {
            // Anything going wrong past validation still lets the caller through
            tracing::error!(request_id = %ctx.request_id, error = %err, "Rate limit check failed");
            let quota = state.rate_limiter.fail_open_quota();
            return Ok(Json(Envelope::new(
                &ctx,
                RateLimitResponse {
                    success: true,
                    limit: quota.limit,
                    remaining: quota.remaining,
                    reset: now.saturating_add(payload.window_ms),
                },
            ))
            .into_response());
        }
    };

    let mut response = Json(Envelope::new(&ctx, RateLimitResponse::from(decision))).into_response();
    insert_rate_limit_headers(response.headers_mut(), &decision);

    if !decision.allowed {
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        if let Ok(value) = HeaderValue::from_str(&decision.retry_after_secs(now).to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }

    Ok(response)
}

pub fn insert_rate_limit_headers(
    headers: &mut HeaderMap,
    decision: &crate::algorithms::RateLimitDecision,
) {
    let values = [
        ("x-ratelimit-limit", decision.limit),
        ("x-ratelimit-remaining", decision.remaining),
        ("x-ratelimit-reset", decision.reset_at_ms),
    ];
    for (name, value) in values {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(name, value);
        }
    }
}

fn attribution_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        name, value, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Value of one cookie from the `Cookie` request headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}

/// Track a referral link visit and set the attribution cookies
pub async fn record_referral_click(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    AppJson(payload): AppJson<ClickRequest>,
) -> Result<Response, ApiError> {
    RequestValidator::validate_payload(&payload).with_ctx(&ctx)?;

    let receipt = state
        .attribution
        .record_click(&payload.referral_code)
        .await
        .with_ctx(&ctx)?;

    let max_age = state.config.attribution_window_secs();
    let secure = state.config.is_production();
    let mut response = Json(Envelope::new(&ctx, SuccessResponse { success: true })).into_response();

    for cookie in [
        attribution_cookie(REFERRAL_CODE_COOKIE, &receipt.code, max_age, secure),
        attribution_cookie(REFERRAL_CLICK_COOKIE, &receipt.click_id.to_string(), max_age, secure),
    ] {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| ServiceError::Internal(format!("invalid cookie header: {}", e)))
            .with_ctx(&ctx)?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }

    Ok(response)
}

pub async fn apply_referral_code(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    AppJson(payload): AppJson<ApplyReferralRequest>,
) -> Result<impl IntoResponse, ApiError> {
    RequestValidator::validate_payload(&payload).with_ctx(&ctx)?;
    let user_id = RequestValidator::validate_user_id(&payload.user_id).with_ctx(&ctx)?;

    let click_id = read_cookie(&headers, REFERRAL_CLICK_COOKIE)
        .and_then(|value| Uuid::parse_str(&value).ok());

    let result = state
        .attribution
        .apply_referral_code(&payload.referral_code, &user_id, click_id)
        .await
        .with_ctx(&ctx)?;

    let message = if result.created {
        "Referral code applied successfully"
    } else {
        "Referral code already applied"
    };

    Ok(Json(Envelope::new(
        &ctx,
        ApplyReferralResponse {
            success: true,
            message: message.to_string(),
            referral_id: result.referral_id.to_string(),
        },
    )))
}

#[derive(Debug, serde::Serialize)]
struct ConvertResponse {
    success: bool,
    status: ConversionStatus,
}

/// Entry point for the billing webhook once a payment is confirmed
pub async fn convert_referral(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    AppJson(payload): AppJson<ConvertReferralRequest>,
) -> Result<impl IntoResponse, ApiError> {
    RequestValidator::validate_payload(&payload).with_ctx(&ctx)?;
    let user_id = RequestValidator::validate_user_id(&payload.user_id).with_ctx(&ctx)?;

    let status = state
        .attribution
        .convert_referral(&user_id, payload.commission)
        .await
        .with_ctx(&ctx)?;

    Ok(Json(Envelope::new(
        &ctx,
        ConvertResponse {
            success: true,
            status,
        },
    )))
}

pub async fn enroll_affiliate(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    AppJson(followers): AppJson<FollowerCounts>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = RequestValidator::require_user_id(&headers).with_ctx(&ctx)?;

    let affiliate = state
        .attribution
        .enroll_affiliate(&user_id, followers)
        .await
        .with_ctx(&ctx)?;

    Ok((StatusCode::CREATED, Json(Envelope::new(&ctx, affiliate))))
}

pub async fn affiliate_stats(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = RequestValidator::require_user_id(&headers).with_ctx(&ctx)?;

    let stats = state
        .attribution
        .affiliate_stats(&user_id)
        .await
        .with_ctx(&ctx)?;

    Ok(Json(Envelope::new(&ctx, stats)))
}

pub async fn create_coupon(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    AppJson(payload): AppJson<CreateCouponRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let creator_id = RequestValidator::require_user_id(&headers).with_ctx(&ctx)?;

    let created = state
        .coupons
        .create_coupon(&creator_id, payload)
        .await
        .with_ctx(&ctx)?;

    Ok((StatusCode::CREATED, Json(Envelope::new(&ctx, created))))
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> impl IntoResponse {
    let report = state.health.check_health().await;
    Json(Envelope::new(&ctx, report))
}

/// Readiness check endpoint. Counter store outages only degrade rate
/// limiting, so the service reports ready as long as its data store answers.
pub async fn readiness_check(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    let report = state.health.check_health().await;
    let status = if report.dependencies.store.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(Envelope::new(&ctx, report))).into_response()
}

pub async fn not_found(Extension(ctx): Extension<RequestContext>) -> ApiError {
    ApiError::new(&ctx, ServiceError::NotFound("Route not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; referral_click=abc ; referral_code=XYZ98765"),
        );
        assert_eq!(read_cookie(&headers, "referral_click").as_deref(), Some("abc"));
        assert_eq!(read_cookie(&headers, "referral_code").as_deref(), Some("XYZ98765"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_attribution_cookie_format() {
        let cookie = attribution_cookie("referral_code", "ABC12345", 2_592_000, true);
        assert_eq!(
            cookie,
            "referral_code=ABC12345; Max-Age=2592000; Path=/; HttpOnly; SameSite=Lax; Secure"
        );
    }
}
