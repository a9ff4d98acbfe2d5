//! Per-request correlation ids.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use uuid::Uuid;

/// Request scoped metadata, inserted as a request extension by
/// [`crate::middleware::request_context_middleware`].
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Whether 5xx error messages may be returned to the caller
    pub expose_details: bool,
}

impl RequestContext {
    pub fn new(request_id: String, expose_details: bool) -> Self {
        Self {
            request_id,
            expose_details,
        }
    }
}

/// Returns the caller supplied id when present and non-empty, otherwise a
/// fresh UUID.
pub fn assign_request_id(headers: &HeaderMap, header_name: &str) -> String {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id(response: &mut Response, header_name: &str, request_id: &str) {
    let Ok(name) = HeaderName::try_from(header_name) else {
        tracing::warn!(header = header_name, "Invalid request id header name");
        return;
    };

    match HeaderValue::from_str(request_id) {
        Ok(value) => {
            response.headers_mut().insert(name, value);
        }
        Err(_) => {
            tracing::warn!(request_id = %request_id, "Request id is not a valid header value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_propagates_inbound_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc-123"));
        assert_eq!(assign_request_id(&headers, "x-request-id"), "abc-123");
    }

    #[test]
    fn test_generates_id_when_missing_or_blank() {
        let mut headers = HeaderMap::new();
        let generated = assign_request_id(&headers, "x-request-id");
        assert!(Uuid::parse_str(&generated).is_ok());

        headers.insert("x-request-id", HeaderValue::from_static("   "));
        let generated = assign_request_id(&headers, "x-request-id");
        assert!(Uuid::parse_str(&generated).is_ok());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let headers = HeaderMap::new();
        let a = assign_request_id(&headers, "x-request-id");
        let b = assign_request_id(&headers, "x-request-id");
        assert_ne!(a, b);
    }

    #[test]
    fn test_attach_request_id() {
        let mut response = Response::new(Body::empty());
        attach_request_id(&mut response, "x-request-id", "abc-123");
        assert_eq!(response.headers().get("x-request-id").unwrap(), "abc-123");
    }
}
