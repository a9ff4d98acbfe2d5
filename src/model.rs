//! Records persisted through the [`crate::store::AttributionStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audience size classification captured at enrollment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffiliateTier {
    Nano,
    Micro,
    Macro,
}

impl AffiliateTier {
    pub const MICRO_THRESHOLD: u64 = 10_000;
    pub const MACRO_THRESHOLD: u64 = 100_000;

    pub fn from_followers(total_followers: u64) -> Self {
        if total_followers >= Self::MACRO_THRESHOLD {
            AffiliateTier::Macro
        } else if total_followers >= Self::MICRO_THRESHOLD {
            AffiliateTier::Micro
        } else {
            AffiliateTier::Nano
        }
    }

    pub fn commission_rate(&self) -> f64 {
        match self {
            AffiliateTier::Nano => 0.20,
            AffiliateTier::Micro => 0.25,
            AffiliateTier::Macro => 0.30,
        }
    }
}

/// Follower counts declared when joining the affiliate program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowerCounts {
    #[serde(default)]
    pub instagram_followers: u64,
    #[serde(default)]
    pub tiktok_followers: u64,
    #[serde(default)]
    pub youtube_followers: u64,
}

impl FollowerCounts {
    pub fn total(&self) -> u64 {
        self.instagram_followers
            .saturating_add(self.tiktok_followers)
            .saturating_add(self.youtube_followers)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affiliate {
    pub id: Uuid,
    pub user_id: String,
    pub code: String,
    pub is_active: bool,
    pub commission_rate: f64,
    pub tier: AffiliateTier,
    pub total_clicks: u64,
    pub total_conversions: u64,
    pub total_earnings: f64,
    pub created_at: DateTime<Utc>,
}

impl Affiliate {
    pub fn new(user_id: String, code: String, tier: AffiliateTier, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            code,
            is_active: true,
            commission_rate: tier.commission_rate(),
            tier,
            total_clicks: 0,
            total_conversions: 0,
            total_earnings: 0.0,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralState {
    Clicked,
    Applied,
    Converted,
}

/// One click or conversion record.
///
/// Moves `clicked -> applied -> converted` (or straight to `applied` when a
/// code is typed in without a tracked click). Never moves backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub referred_user_id: Option<String>,
    pub clicked_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
    pub is_converted: bool,
    pub commission_amount: Option<f64>,
}

impl Referral {
    pub fn clicked(affiliate_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            affiliate_id,
            referred_user_id: None,
            clicked_at: now,
            applied_at: None,
            converted_at: None,
            is_converted: false,
            commission_amount: None,
        }
    }

    pub fn applied(affiliate_id: Uuid, user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            referred_user_id: Some(user_id),
            applied_at: Some(now),
            ..Self::clicked(affiliate_id, now)
        }
    }

    pub fn state(&self) -> ReferralState {
        if self.is_converted {
            ReferralState::Converted
        } else if self.referred_user_id.is_some() {
            ReferralState::Applied
        } else {
            ReferralState::Clicked
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatorStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    pub status: CreatorStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub creator_id: String,
    pub code: String,
    pub discount_percent: u8,
    pub max_uses: Option<u32>,
    pub times_used: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(AffiliateTier::from_followers(0), AffiliateTier::Nano);
        assert_eq!(AffiliateTier::from_followers(9_999), AffiliateTier::Nano);
        assert_eq!(AffiliateTier::from_followers(10_000), AffiliateTier::Micro);
        assert_eq!(AffiliateTier::from_followers(99_999), AffiliateTier::Micro);
        assert_eq!(AffiliateTier::from_followers(100_000), AffiliateTier::Macro);
    }

    #[test]
    fn test_follower_total_saturates() {
        let counts = FollowerCounts {
            instagram_followers: u64::MAX,
            tiktok_followers: 5,
            youtube_followers: 0,
        };
        assert_eq!(counts.total(), u64::MAX);
    }

    #[test]
    fn test_referral_state_derivation() {
        let now = Utc::now();
        let mut referral = Referral::clicked(Uuid::new_v4(), now);
        assert_eq!(referral.state(), ReferralState::Clicked);

        referral.referred_user_id = Some("user-1".to_string());
        assert_eq!(referral.state(), ReferralState::Applied);

        referral.is_converted = true;
        assert_eq!(referral.state(), ReferralState::Converted);
    }

    #[test]
    fn test_tier_serializes_lowercase() {
        let json = serde_json::to_string(&AffiliateTier::Micro).unwrap();
        assert_eq!(json, "\"micro\"");
    }
}
