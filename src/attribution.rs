//! Referral attribution state machine.
//!
//! `clicked -> applied -> converted`, plus `-> applied` for codes typed in
//! without a tracked click. Only [`AttributionService::convert_referral`]
//! sets `is_converted`, and it does so at most once per referred user.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::model::{Affiliate, AffiliateTier, FollowerCounts, Referral, ReferralState};
use crate::referral_code::{generate_referral_code, parse_code};
use crate::store::{AttributionStore, Conversion, ReferralUpsert, StoreError, Upserted};

/// Returned by a tracked click so the HTTP layer can set the attribution cookie
#[derive(Debug, Clone, PartialEq)]
pub struct ClickReceipt {
    pub code: String,
    pub click_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferralResult {
    pub referral_id: Uuid,
    pub affiliate_id: Uuid,
    pub state: ReferralState,
    /// False when the same code had already been applied by this user
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Converted,
    AlreadyConverted,
    NotReferred,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffiliateStats {
    pub code: String,
    pub tier: AffiliateTier,
    pub is_active: bool,
    pub commission_rate: f64,
    pub total_clicks: u64,
    pub total_conversions: u64,
    pub total_earnings: f64,
}

impl From<&Affiliate> for AffiliateStats {
    fn from(affiliate: &Affiliate) -> Self {
        Self {
            code: affiliate.code.clone(),
            tier: affiliate.tier,
            is_active: affiliate.is_active,
            commission_rate: affiliate.commission_rate,
            total_clicks: affiliate.total_clicks,
            total_conversions: affiliate.total_conversions,
            total_earnings: affiliate.total_earnings,
        }
    }
}

#[derive(Clone)]
pub struct AttributionService {
    store: Arc<dyn AttributionStore>,
}

impl AttributionService {
    pub fn new(store: Arc<dyn AttributionStore>) -> Self {
        Self { store }
    }

    /// Joins the affiliate program with a freshly generated code
    pub async fn enroll_affiliate(
        &self,
        user_id: &str,
        followers: FollowerCounts,
    ) -> Result<Affiliate, ServiceError> {
        if self.store.find_affiliate_by_user(user_id).await?.is_some() {
            return Err(ServiceError::AlreadyParticipating);
        }

        let code = generate_referral_code(self.store.as_ref()).await?;
        let tier = AffiliateTier::from_followers(followers.total());
        let affiliate = Affiliate::new(user_id.to_string(), code, tier, Utc::now());

        let affiliate = self
            .store
            .insert_affiliate(affiliate)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(msg) => ServiceError::Conflict(msg),
                other => other.into(),
            })?;

        tracing::info!(
            user_id = %user_id,
            code = %affiliate.code,
            tier = ?affiliate.tier,
            "Affiliate enrolled"
        );
        Ok(affiliate)
    }

    async fn active_affiliate(&self, code: &str) -> Result<Affiliate, ServiceError> {
        match self.store.find_affiliate_by_code(code).await? {
            Some(affiliate) if affiliate.is_active => Ok(affiliate),
            _ => Err(ServiceError::InvalidCode),
        }
    }

    pub async fn record_click(&self, raw_code: &str) -> Result<ClickReceipt, ServiceError> {
        let code = parse_code(raw_code)?;
        let affiliate = self.active_affiliate(&code).await?;

        let click = self
            .store
            .record_click(Referral::clicked(affiliate.id, Utc::now()))
            .await?;

        tracing::info!(code = %code, click_id = %click.id, "Referral click recorded");
        Ok(ClickReceipt {
            code,
            click_id: click.id,
        })
    }

    pub async fn apply_referral_code(
        &self,
        raw_code: &str,
        user_id: &str,
        click_id: Option<Uuid>,
    ) -> Result<ReferralResult, ServiceError> {
        let code = parse_code(raw_code)?;
        let affiliate = self.active_affiliate(&code).await?;

        if affiliate.user_id == user_id {
            return Err(ServiceError::SelfReferral);
        }

        if let Some(existing) = self.store.find_referral_by_user(user_id).await? {
            if existing.is_converted || existing.affiliate_id != affiliate.id {
                return Err(ServiceError::AlreadyApplied);
            }
        }

        let upserted = self
            .store
            .upsert_applied_referral(ReferralUpsert {
                affiliate_id: affiliate.id,
                referred_user_id: user_id.to_string(),
                click_id,
                at: Utc::now(),
            })
            .await
            .map_err(|err| match err {
                // Lost a race with a concurrent apply for the same user
                StoreError::Conflict(_) => ServiceError::AlreadyApplied,
                other => other.into(),
            })?;

        let created = !matches!(upserted, Upserted::Unchanged(_));
        let referral = upserted.referral();
        tracing::info!(
            code = %code,
            user_id = %user_id,
            referral_id = %referral.id,
            created,
            "Referral code applied"
        );

        Ok(ReferralResult {
            referral_id: referral.id,
            affiliate_id: affiliate.id,
            state: referral.state(),
            created,
        })
    }

    /// Called once billing confirms a payment. Safe to repeat.
    pub async fn convert_referral(
        &self,
        user_id: &str,
        commission: f64,
    ) -> Result<ConversionStatus, ServiceError> {
        if !commission.is_finite() || commission < 0.0 {
            return Err(ServiceError::InvalidInput(
                "Commission must be a non-negative amount".to_string(),
            ));
        }

        let status = match self
            .store
            .mark_converted(user_id, commission, Utc::now())
            .await?
        {
            Conversion::Converted(referral) => {
                tracing::info!(
                    user_id = %user_id,
                    referral_id = %referral.id,
                    commission,
                    "Referral converted"
                );
                ConversionStatus::Converted
            }
            Conversion::AlreadyConverted(referral) => {
                tracing::info!(
                    user_id = %user_id,
                    referral_id = %referral.id,
                    "Duplicate conversion ignored"
                );
                ConversionStatus::AlreadyConverted
            }
            Conversion::NotReferred => ConversionStatus::NotReferred,
        };

        Ok(status)
    }

    pub async fn affiliate_stats(&self, user_id: &str) -> Result<AffiliateStats, ServiceError> {
        self.store
            .find_affiliate_by_user(user_id)
            .await?
            .map(|affiliate| AffiliateStats::from(&affiliate))
            .ok_or_else(|| ServiceError::NotFound("Affiliate not found".to_string()))
    }
}
