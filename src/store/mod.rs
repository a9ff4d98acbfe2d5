//! Persistence seam for affiliates, referrals, creators and coupons.
//!
//! The managed relational store enforces these unique constraints, and
//! every implementation must as well:
//! - affiliate `code`
//! - affiliate `user_id`
//! - referral `referred_user_id`
//! - coupon `(creator_id, code)`
//!
//! Writes that depend on existing rows are expressed as single conditional
//! operations (`upsert_applied_referral`, `mark_converted`) instead of a
//! read followed by a write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Affiliate, Coupon, Creator, Referral};

pub mod memory;

pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Idempotent write attaching a user to an affiliate
#[derive(Debug, Clone)]
pub struct ReferralUpsert {
    pub affiliate_id: Uuid,
    pub referred_user_id: String,
    /// Click recorded earlier for this visitor, if the attribution cookie survived
    pub click_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Upserted {
    /// No prior record; a new one was created in `applied` state
    Inserted(Referral),
    /// A tracked click moved to `applied`
    Attached(Referral),
    /// The user was already attributed to this affiliate
    Unchanged(Referral),
}

impl Upserted {
    pub fn referral(&self) -> &Referral {
        match self {
            Upserted::Inserted(r) | Upserted::Attached(r) | Upserted::Unchanged(r) => r,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Converted(Referral),
    /// Already converted earlier; nothing was written
    AlreadyConverted(Referral),
    /// The user has no referral record
    NotReferred,
}

#[async_trait]
pub trait AttributionStore: Send + Sync {
    async fn affiliate_code_exists(&self, code: &str) -> StoreResult<bool>;
    async fn find_affiliate_by_code(&self, code: &str) -> StoreResult<Option<Affiliate>>;
    async fn find_affiliate_by_user(&self, user_id: &str) -> StoreResult<Option<Affiliate>>;
    async fn insert_affiliate(&self, affiliate: Affiliate) -> StoreResult<Affiliate>;

    /// Inserts a `clicked` referral and bumps the affiliate click counter
    async fn record_click(&self, click: Referral) -> StoreResult<Referral>;
    async fn find_referral_by_user(&self, user_id: &str) -> StoreResult<Option<Referral>>;

    /// Insert-or-attach keyed by `referred_user_id`.
    ///
    /// Fails with `Conflict` when the user is already attributed to a
    /// different affiliate or their referral is converted.
    async fn upsert_applied_referral(&self, upsert: ReferralUpsert) -> StoreResult<Upserted>;

    /// Sets `is_converted` only if it is not already set, crediting the
    /// affiliate in the same step.
    async fn mark_converted(
        &self,
        user_id: &str,
        commission: f64,
        at: DateTime<Utc>,
    ) -> StoreResult<Conversion>;

    async fn find_creator(&self, creator_id: &str) -> StoreResult<Option<Creator>>;
    async fn upsert_creator(&self, creator: Creator) -> StoreResult<Creator>;
    async fn insert_coupon(&self, coupon: Coupon) -> StoreResult<Coupon>;

    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}
