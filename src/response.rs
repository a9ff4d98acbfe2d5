use serde::Serialize;

use crate::algorithms::RateLimitDecision;
use crate::request_context::RequestContext;

/// Success body carrying the request id next to the payload fields
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub request_id: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(ctx: &RequestContext, data: T) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    pub success: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the window resets
    pub reset: u64,
}

impl From<RateLimitDecision> for RateLimitResponse {
    fn from(decision: RateLimitDecision) -> Self {
        Self {
            success: decision.allowed,
            limit: decision.limit,
            remaining: decision.remaining,
            reset: decision.reset_at_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReferralResponse {
    pub success: bool,
    pub message: String,
    pub referral_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_flattens_payload() {
        let ctx = RequestContext::new("req-9".to_string(), true);
        let body = Envelope::new(&ctx, SuccessResponse { success: true });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["request_id"], "req-9");
        assert_eq!(json["success"], true);
    }
}
