//! Referral code generation and normalisation.

use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::ServiceError;
use crate::store::AttributionStore;

pub const CODE_LENGTH: usize = 8;
pub const MAX_GENERATION_ATTEMPTS: usize = 10;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{8}$").expect("valid referral code pattern"));

pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Draws codes until one is unused, giving up after
/// [`MAX_GENERATION_ATTEMPTS`] collisions.
pub async fn generate_referral_code(store: &dyn AttributionStore) -> Result<String, ServiceError> {
    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        let code = random_code(&mut rand::rng());
        if !store.affiliate_code_exists(&code).await? {
            return Ok(code);
        }
        tracing::debug!(attempt, "Referral code collision");
    }

    tracing::error!(
        attempts = MAX_GENERATION_ATTEMPTS,
        "Exhausted referral code generation attempts"
    );
    Err(ServiceError::GenerationExhausted {
        attempts: MAX_GENERATION_ATTEMPTS,
    })
}

/// Trims and uppercases user input
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

pub fn is_valid_code(code: &str) -> bool {
    CODE_PATTERN.is_match(code)
}

/// Normalises a submitted referral code, rejecting malformed input
pub fn parse_code(raw: &str) -> Result<String, ServiceError> {
    let code = normalize_code(raw);
    if code.is_empty() {
        return Err(ServiceError::InvalidInput("Referral code is required".to_string()));
    }
    if !is_valid_code(&code) {
        return Err(ServiceError::InvalidCode);
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Affiliate, Coupon, Creator, Referral};
    use crate::store::{Conversion, ReferralUpsert, StoreResult, Upserted};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store where every code already exists
    #[derive(Default)]
    struct CollidingStore {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl AttributionStore for CollidingStore {
        async fn affiliate_code_exists(&self, _code: &str) -> StoreResult<bool> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        async fn find_affiliate_by_code(&self, _: &str) -> StoreResult<Option<Affiliate>> {
            unimplemented!()
        }
        async fn find_affiliate_by_user(&self, _: &str) -> StoreResult<Option<Affiliate>> {
            unimplemented!()
        }
        async fn insert_affiliate(&self, _: Affiliate) -> StoreResult<Affiliate> {
            unimplemented!()
        }
        async fn record_click(&self, _: Referral) -> StoreResult<Referral> {
            unimplemented!()
        }
        async fn find_referral_by_user(&self, _: &str) -> StoreResult<Option<Referral>> {
            unimplemented!()
        }
        async fn upsert_applied_referral(&self, _: ReferralUpsert) -> StoreResult<Upserted> {
            unimplemented!()
        }
        async fn mark_converted(&self, _: &str, _: f64, _: DateTime<Utc>) -> StoreResult<Conversion> {
            unimplemented!()
        }
        async fn find_creator(&self, _: &str) -> StoreResult<Option<Creator>> {
            unimplemented!()
        }
        async fn upsert_creator(&self, _: Creator) -> StoreResult<Creator> {
            unimplemented!()
        }
        async fn insert_coupon(&self, _: Coupon) -> StoreResult<Coupon> {
            unimplemented!()
        }
        async fn health_check(&self) -> StoreResult<()> {
            Ok(())
        }
        fn backend_name(&self) -> &'static str {
            "colliding"
        }
    }

    #[test]
    fn test_random_code_shape() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let code = random_code(&mut rng);
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(is_valid_code(&code), "bad code {}", code);
        }
    }

    #[tokio::test]
    async fn test_generation_exhausts_after_ten_collisions() {
        let store = CollidingStore::default();
        let result = generate_referral_code(&store).await;

        assert!(matches!(
            result,
            Err(ServiceError::GenerationExhausted { attempts: 10 })
        ));
        assert_eq!(store.lookups.load(Ordering::SeqCst), MAX_GENERATION_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_generation_returns_unused_code() {
        let store = crate::store::InMemoryStore::new();
        let code = generate_referral_code(&store).await.unwrap();
        assert!(is_valid_code(&code));
        assert!(!store.affiliate_code_exists(&code).await.unwrap());
    }

    #[test]
    fn test_parse_code_normalizes() {
        assert_eq!(parse_code("  abc12345 ").unwrap(), "ABC12345");
        assert!(matches!(parse_code(""), Err(ServiceError::InvalidInput(_))));
        assert!(matches!(parse_code("abc"), Err(ServiceError::InvalidCode)));
    }
}
