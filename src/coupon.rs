//! Coupon issuance for approved creators.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use uuid::Uuid;
use validator::Validate;

use crate::error::ServiceError;
use crate::model::{Coupon, CreatorStatus};
use crate::store::{AttributionStore, StoreError};

static COUPON_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9_-]{3,32}$").expect("valid coupon code pattern"));

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 3, max = 32, message = "code must be 3-32 characters"))]
    pub code: String,
    #[validate(range(min = 0, max = 100, message = "discount_percent must be between 0 and 100"))]
    pub discount_percent: i64,
    #[validate(range(min = 1, message = "max_uses must be at least 1"))]
    pub max_uses: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedCoupon {
    #[serde(flatten)]
    pub coupon: Coupon,
    pub tracking_url: String,
}

#[derive(Clone)]
pub struct CouponService {
    store: Arc<dyn AttributionStore>,
    public_base_url: String,
}

impl CouponService {
    pub fn new(store: Arc<dyn AttributionStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn tracking_url(&self, code: &str) -> String {
        format!("{}/?coupon={}", self.public_base_url, code)
    }

    /// Checks the request on its own, before touching the store
    pub fn validate_request(
        request: &CreateCouponRequest,
        now: DateTime<Utc>,
    ) -> Result<(String, u8), ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;

        let code = request.code.trim().to_ascii_uppercase();
        if !COUPON_CODE_PATTERN.is_match(&code) {
            return Err(ServiceError::InvalidInput(
                "code may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }

        if let Some(expires_at) = request.expires_at {
            if expires_at <= now {
                return Err(ServiceError::InvalidInput(
                    "expires_at must be in the future".to_string(),
                ));
            }
        }

        let discount = u8::try_from(request.discount_percent).map_err(|_| {
            ServiceError::InvalidInput("discount_percent must be between 0 and 100".to_string())
        })?;

        Ok((code, discount))
    }

    pub async fn create_coupon(
        &self,
        creator_id: &str,
        request: CreateCouponRequest,
    ) -> Result<CreatedCoupon, ServiceError> {
        let now = Utc::now();
        let (code, discount_percent) = Self::validate_request(&request, now)?;

        let creator = self.store.find_creator(creator_id).await?;
        match creator {
            Some(creator) if creator.status == CreatorStatus::Approved => {}
            _ => return Err(ServiceError::NotApprovedCreator),
        }

        let coupon = Coupon {
            id: Uuid::new_v4(),
            creator_id: creator_id.to_string(),
            code,
            discount_percent,
            max_uses: request.max_uses,
            times_used: 0,
            expires_at: request.expires_at,
            created_at: now,
        };

        let coupon = self
            .store
            .insert_coupon(coupon)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => ServiceError::DuplicateCode,
                other => other.into(),
            })?;

        tracing::info!(creator_id = %creator_id, code = %coupon.code, "Coupon created");

        let tracking_url = self.tracking_url(&coupon.code);
        Ok(CreatedCoupon {
            coupon,
            tracking_url,
        })
    }
}
