//! In-memory implementation of the attribution store.
//!
//! All tables sit behind one `RwLock`, so each trait method is atomic with
//! respect to the others. State is lost on restart; this backend serves
//! tests, local development and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AttributionStore, Conversion, ReferralUpsert, StoreError, StoreResult, Upserted,
};
use crate::model::{Affiliate, Coupon, Creator, Referral};

#[derive(Debug, Default)]
struct Tables {
    affiliates: HashMap<Uuid, Affiliate>,
    referrals: HashMap<Uuid, Referral>,
    creators: HashMap<String, Creator>,
    /// Keyed by `(creator_id, code)`
    coupons: HashMap<(String, String), Coupon>,
}

impl Tables {
    fn affiliate_by_code(&self, code: &str) -> Option<&Affiliate> {
        self.affiliates.values().find(|a| a.code == code)
    }

    fn referral_id_for_user(&self, user_id: &str) -> Option<Uuid> {
        self.referrals
            .values()
            .find(|r| r.referred_user_id.as_deref() == Some(user_id))
            .map(|r| r.id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of referral rows, clicks included
    pub async fn referral_count(&self) -> usize {
        self.tables.read().await.referrals.len()
    }

    pub async fn find_referral(&self, id: Uuid) -> Option<Referral> {
        self.tables.read().await.referrals.get(&id).cloned()
    }

    pub async fn set_affiliate_active(&self, code: &str, active: bool) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let affiliate = tables
            .affiliates
            .values_mut()
            .find(|a| a.code == code)
            .ok_or_else(|| StoreError::NotFound(format!("affiliate {}", code)))?;
        affiliate.is_active = active;
        Ok(())
    }
}

#[async_trait]
impl AttributionStore for InMemoryStore {
    async fn affiliate_code_exists(&self, code: &str) -> StoreResult<bool> {
        Ok(self.tables.read().await.affiliate_by_code(code).is_some())
    }

    async fn find_affiliate_by_code(&self, code: &str) -> StoreResult<Option<Affiliate>> {
        Ok(self.tables.read().await.affiliate_by_code(code).cloned())
    }

    async fn find_affiliate_by_user(&self, user_id: &str) -> StoreResult<Option<Affiliate>> {
        let tables = self.tables.read().await;
        Ok(tables
            .affiliates
            .values()
            .find(|a| a.user_id == user_id)
            .cloned())
    }

    async fn insert_affiliate(&self, affiliate: Affiliate) -> StoreResult<Affiliate> {
        let mut tables = self.tables.write().await;
        if tables.affiliate_by_code(&affiliate.code).is_some() {
            return Err(StoreError::Conflict(format!(
                "affiliate code {} already exists",
                affiliate.code
            )));
        }
        if tables.affiliates.values().any(|a| a.user_id == affiliate.user_id) {
            return Err(StoreError::Conflict(format!(
                "user {} already has an affiliate record",
                affiliate.user_id
            )));
        }
        tables.affiliates.insert(affiliate.id, affiliate.clone());
        Ok(affiliate)
    }

    async fn record_click(&self, click: Referral) -> StoreResult<Referral> {
        let mut tables = self.tables.write().await;
        let affiliate = tables
            .affiliates
            .get_mut(&click.affiliate_id)
            .ok_or_else(|| StoreError::NotFound(format!("affiliate {}", click.affiliate_id)))?;
        affiliate.total_clicks += 1;
        tables.referrals.insert(click.id, click.clone());
        Ok(click)
    }

    async fn find_referral_by_user(&self, user_id: &str) -> StoreResult<Option<Referral>> {
        let tables = self.tables.read().await;
        Ok(tables
            .referral_id_for_user(user_id)
            .and_then(|id| tables.referrals.get(&id).cloned()))
    }

    async fn upsert_applied_referral(&self, upsert: ReferralUpsert) -> StoreResult<Upserted> {
        let mut tables = self.tables.write().await;

        if let Some(id) = tables.referral_id_for_user(&upsert.referred_user_id) {
            let existing = tables.referrals[&id].clone();
            if existing.is_converted {
                return Err(StoreError::Conflict(
                    "referral already converted".to_string(),
                ));
            }
            if existing.affiliate_id != upsert.affiliate_id {
                return Err(StoreError::Conflict(
                    "user already attributed to another affiliate".to_string(),
                ));
            }
            return Ok(Upserted::Unchanged(existing));
        }

        if let Some(click_id) = upsert.click_id {
            if let Some(click) = tables.referrals.get_mut(&click_id) {
                let attachable = click.affiliate_id == upsert.affiliate_id
                    && click.referred_user_id.is_none()
                    && !click.is_converted;
                if attachable {
                    click.referred_user_id = Some(upsert.referred_user_id);
                    click.applied_at = Some(upsert.at);
                    return Ok(Upserted::Attached(click.clone()));
                }
            }
        }

        let referral = Referral::applied(upsert.affiliate_id, upsert.referred_user_id, upsert.at);
        tables.referrals.insert(referral.id, referral.clone());
        Ok(Upserted::Inserted(referral))
    }

    async fn mark_converted(
        &self,
        user_id: &str,
        commission: f64,
        at: DateTime<Utc>,
    ) -> StoreResult<Conversion> {
        let mut tables = self.tables.write().await;
        let Some(id) = tables.referral_id_for_user(user_id) else {
            return Ok(Conversion::NotReferred);
        };

        let referral = tables
            .referrals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("referral {}", id)))?;
        if referral.is_converted {
            return Ok(Conversion::AlreadyConverted(referral.clone()));
        }

        referral.is_converted = true;
        referral.converted_at = Some(at);
        referral.commission_amount = Some(commission);
        let converted = referral.clone();

        if let Some(affiliate) = tables.affiliates.get_mut(&converted.affiliate_id) {
            affiliate.total_conversions += 1;
            affiliate.total_earnings += commission;
        }

        Ok(Conversion::Converted(converted))
    }

    async fn find_creator(&self, creator_id: &str) -> StoreResult<Option<Creator>> {
        Ok(self.tables.read().await.creators.get(creator_id).cloned())
    }

    async fn upsert_creator(&self, creator: Creator) -> StoreResult<Creator> {
        let mut tables = self.tables.write().await;
        tables.creators.insert(creator.id.clone(), creator.clone());
        Ok(creator)
    }

    async fn insert_coupon(&self, coupon: Coupon) -> StoreResult<Coupon> {
        let mut tables = self.tables.write().await;
        let key = (coupon.creator_id.clone(), coupon.code.clone());
        if tables.coupons.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "coupon code {} already exists",
                coupon.code
            )));
        }
        tables.coupons.insert(key, coupon.clone());
        Ok(coupon)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AffiliateTier;

    async fn store_with_affiliate(code: &str) -> (InMemoryStore, Affiliate) {
        let store = InMemoryStore::new();
        let affiliate = Affiliate::new(
            "owner-1".to_string(),
            code.to_string(),
            AffiliateTier::Nano,
            Utc::now(),
        );
        store.insert_affiliate(affiliate.clone()).await.unwrap();
        (store, affiliate)
    }

    #[tokio::test]
    async fn test_duplicate_affiliate_code_conflicts() {
        let (store, _) = store_with_affiliate("ABCD1234").await;
        let other = Affiliate::new(
            "owner-2".to_string(),
            "ABCD1234".to_string(),
            AffiliateTier::Nano,
            Utc::now(),
        );
        assert!(matches!(
            store.insert_affiliate(other).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_click_attaches_on_upsert() {
        let (store, affiliate) = store_with_affiliate("ABCD1234").await;
        let click = store
            .record_click(Referral::clicked(affiliate.id, Utc::now()))
            .await
            .unwrap();

        let upserted = store
            .upsert_applied_referral(ReferralUpsert {
                affiliate_id: affiliate.id,
                referred_user_id: "user-1".to_string(),
                click_id: Some(click.id),
                at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(matches!(upserted, Upserted::Attached(_)));
        assert_eq!(upserted.referral().id, click.id);
        assert_eq!(store.referral_count().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_is_unchanged_on_repeat() {
        let (store, affiliate) = store_with_affiliate("ABCD1234").await;
        let upsert = ReferralUpsert {
            affiliate_id: affiliate.id,
            referred_user_id: "user-1".to_string(),
            click_id: None,
            at: Utc::now(),
        };

        let first = store.upsert_applied_referral(upsert.clone()).await.unwrap();
        let second = store.upsert_applied_referral(upsert).await.unwrap();

        assert!(matches!(first, Upserted::Inserted(_)));
        assert!(matches!(second, Upserted::Unchanged(_)));
        assert_eq!(store.referral_count().await, 1);
    }

    #[tokio::test]
    async fn test_mark_converted_once() {
        let (store, affiliate) = store_with_affiliate("ABCD1234").await;
        store
            .upsert_applied_referral(ReferralUpsert {
                affiliate_id: affiliate.id,
                referred_user_id: "user-1".to_string(),
                click_id: None,
                at: Utc::now(),
            })
            .await
            .unwrap();

        let first = store.mark_converted("user-1", 25.0, Utc::now()).await.unwrap();
        let second = store.mark_converted("user-1", 25.0, Utc::now()).await.unwrap();
        assert!(matches!(first, Conversion::Converted(_)));
        assert!(matches!(second, Conversion::AlreadyConverted(_)));

        let affiliate = store.find_affiliate_by_user("owner-1").await.unwrap().unwrap();
        assert_eq!(affiliate.total_conversions, 1);
        assert_eq!(affiliate.total_earnings, 25.0);
    }

    #[tokio::test]
    async fn test_mark_converted_without_referral() {
        let store = InMemoryStore::new();
        let outcome = store.mark_converted("nobody", 10.0, Utc::now()).await.unwrap();
        assert_eq!(outcome, Conversion::NotReferred);
    }
}
