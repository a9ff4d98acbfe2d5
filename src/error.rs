use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::request_context::RequestContext;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid referral code")]
    InvalidCode,

    #[error("Cannot use your own referral code")]
    SelfReferral,

    #[error("A referral code has already been applied to this account")]
    AlreadyApplied,

    #[error("Coupon code already exists")]
    DuplicateCode,

    #[error("User is already participating in the affiliate program")]
    AlreadyParticipating,

    #[error("Creator is not approved to issue coupons")]
    NotApprovedCreator,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Could not generate a unique referral code after {attempts} attempts")]
    GenerationExhausted { attempts: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_) | ServiceError::SelfReferral => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) | ServiceError::NotApprovedCreator => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) | ServiceError::InvalidCode => StatusCode::NOT_FOUND,
            ServiceError::AlreadyApplied
            | ServiceError::DuplicateCode
            | ServiceError::AlreadyParticipating
            | ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::GenerationExhausted { .. }
            | ServiceError::Configuration(_)
            | ServiceError::Store(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the error body
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::Unauthorized => "unauthorized",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidCode => "invalid_code",
            ServiceError::SelfReferral => "self_referral",
            ServiceError::AlreadyApplied => "already_applied",
            ServiceError::DuplicateCode => "duplicate_code",
            ServiceError::AlreadyParticipating => "already_participating",
            ServiceError::NotApprovedCreator => "not_approved_creator",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::RateLimited { .. } => "rate_limited",
            ServiceError::GenerationExhausted { .. } => "generation_exhausted",
            ServiceError::Configuration(_) => "configuration_error",
            ServiceError::Unavailable(_) => "service_unavailable",
            ServiceError::Store(_) => "store_error",
            ServiceError::Internal(_) => "internal_error",
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub request_id: String,
}

/// A `ServiceError` bound to the request it happened in.
#[derive(Debug)]
pub struct ApiError {
    pub request_id: String,
    pub expose_details: bool,
    pub source: ServiceError,
}

impl ApiError {
    pub fn new(ctx: &RequestContext, source: ServiceError) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            expose_details: ctx.expose_details,
            source,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.source.status();

        if self.source.is_server_error() {
            tracing::error!(
                request_id = %self.request_id,
                code = self.source.code(),
                error = %self.source,
                "Request failed"
            );
        } else {
            tracing::debug!(
                request_id = %self.request_id,
                code = self.source.code(),
                error = %self.source,
                "Request rejected"
            );
        }

        let message = if self.source.is_server_error() && !self.expose_details {
            "Internal server error".to_string()
        } else {
            self.source.to_string()
        };

        let body = ErrorResponse {
            error: message,
            code: self.source.code(),
            request_id: self.request_id,
        };

        let mut response = (status, Json(body)).into_response();
        if let ServiceError::RateLimited { retry_after_secs } = self.source {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Binds errors to the current request so handlers can keep using `?`.
pub trait WithContext<T> {
    fn with_ctx(self, ctx: &RequestContext) -> std::result::Result<T, ApiError>;
}

impl<T> WithContext<T> for Result<T> {
    fn with_ctx(self, ctx: &RequestContext) -> std::result::Result<T, ApiError> {
        self.map_err(|err| ApiError::new(ctx, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(expose_details: bool) -> RequestContext {
        RequestContext {
            request_id: "req-1".to_string(),
            expose_details,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceError::InvalidCode.status(), StatusCode::NOT_FOUND);
        assert_eq!(ServiceError::SelfReferral.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::AlreadyApplied.status(), StatusCode::CONFLICT);
        assert_eq!(ServiceError::DuplicateCode.status(), StatusCode::CONFLICT);
        assert_eq!(ServiceError::NotApprovedCreator.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ServiceError::GenerationExhausted { attempts: 10 }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::RateLimited { retry_after_secs: 1 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_message_suppressed_in_production() {
        let err = ApiError::new(&ctx(false), ServiceError::Internal("db password wrong".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["request_id"], "req-1");
    }

    #[tokio::test]
    async fn test_client_errors_keep_their_message() {
        let response = ApiError::new(&ctx(false), ServiceError::SelfReferral).into_response();
        let body = body_json(response).await;
        assert_eq!(body["error"], "Cannot use your own referral code");
        assert_eq!(body["code"], "self_referral");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let err = ApiError::new(&ctx(true), ServiceError::RateLimited { retry_after_secs: 42 });
        let response = err.into_response();
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
