use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use crate::error::{ApiError, ServiceError};
use crate::request_context::RequestContext;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}

/// `Json` extractor whose rejections render as the service error body
#[derive(Debug, Clone, Copy, Default)]
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = request
            .extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::new(String::new(), false));

        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(ApiError::new(
                &ctx,
                ServiceError::InvalidInput(rejection.body_text()),
            )),
        }
    }
}

/// Body of the internal rate limit check
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRequest {
    #[validate(length(min = 1, max = 256, message = "key must be 1-256 characters"))]
    pub key: String,
    #[validate(range(min = 1, message = "max must be greater than 0"))]
    pub max: u64,
    #[validate(range(min = 1, message = "windowMs must be greater than 0"))]
    pub window_ms: u64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClickRequest {
    #[validate(length(min = 1, max = 64, message = "referralCode is required"))]
    pub referral_code: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReferralRequest {
    #[validate(length(min = 1, max = 64, message = "referralCode is required"))]
    pub referral_code: String,
    #[validate(length(min = 1, max = 128, message = "userId is required"))]
    pub user_id: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConvertReferralRequest {
    #[validate(length(min = 1, max = 128, message = "userId is required"))]
    pub user_id: String,
    #[validate(range(min = 0.0, message = "commission must not be negative"))]
    pub commission: f64,
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    pub fn validate_payload<T: Validate>(payload: &T) -> Result<(), ServiceError> {
        payload
            .validate()
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))
    }

    /// Rate limit keys: alphanumerics plus `:-_.`
    pub fn validate_key(key: &str) -> Result<(), ServiceError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Rate limit key cannot be empty".to_string(),
            ));
        }

        if !key
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ':' | '-' | '_' | '.'))
        {
            return Err(ServiceError::InvalidInput(
                "Rate limit key can only contain alphanumeric characters and ':-_.'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_user_id(user_id: &str) -> Result<String, ServiceError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ServiceError::InvalidInput("User ID cannot be empty".to_string()));
        }

        if !user_id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '@' | '.'))
        {
            return Err(ServiceError::InvalidInput(
                "User ID contains invalid characters".to_string(),
            ));
        }

        Ok(user_id.to_string())
    }

    /// Checks the billing webhook secret header
    pub fn require_webhook_secret(headers: &HeaderMap, expected: &str) -> Result<(), ServiceError> {
        if expected.is_empty() {
            return Err(ServiceError::Unauthorized);
        }

        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ServiceError::Unauthorized)?;

        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            return Err(ServiceError::Unauthorized);
        }

        Ok(())
    }

    /// Caller identity from the `x-user-id` header set by the auth proxy
    pub fn require_user_id(headers: &HeaderMap) -> Result<String, ServiceError> {
        let raw = headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ServiceError::Unauthorized)?;
        Self::validate_user_id(raw)
    }
}
