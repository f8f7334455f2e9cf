use super::store::{
    normalize_code, usage_cap_violation, CouponFilter, CouponPatch, CouponStore, NewCoupon,
};
use crate::{entities::coupon::Model as CouponModel, errors::ServiceError};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

/// Process-local coupon store.
///
/// Each coupon sits behind its own shard lock, so the compare-and-swap in
/// `increment_usage` is atomic per coupon. A second map reserves codes and
/// is never locked while a coupon entry is held.
#[derive(Debug, Default)]
pub struct InMemoryCouponStore {
    coupons: DashMap<Uuid, CouponModel>,
    codes: DashMap<String, Uuid>,
}

impl InMemoryCouponStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.coupons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coupons.is_empty()
    }

    fn not_found(id: Uuid) -> ServiceError {
        ServiceError::NotFound(format!("Coupon {} not found", id))
    }

    fn claim_code(&self, code: &str, owner: Uuid) -> Result<(), ServiceError> {
        match self.codes.entry(code.to_string()) {
            Entry::Occupied(entry) if *entry.get() != owner => {
                Err(ServiceError::DuplicateCode(code.to_string()))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(owner);
                Ok(())
            }
        }
    }

    fn release_code(&self, code: &str, owner: Uuid) {
        self.codes.remove_if(code, |_, id| *id == owner);
    }
}

#[async_trait]
impl CouponStore for InMemoryCouponStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<CouponModel>, ServiceError> {
        let id = match self.codes.get(&normalize_code(code)) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.coupons.get(&id).map(|coupon| coupon.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CouponModel>, ServiceError> {
        Ok(self.coupons.get(&id).map(|coupon| coupon.clone()))
    }

    async fn list(
        &self,
        filter: &CouponFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CouponModel>, u64), ServiceError> {
        let mut matching: Vec<CouponModel> = self
            .coupons
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let per_page = per_page.max(1) as usize;
        let skip = (page.saturating_sub(1) as usize).saturating_mul(per_page);
        let page_items = matching.into_iter().skip(skip).take(per_page).collect();

        Ok((page_items, total))
    }

    async fn increment_usage(
        &self,
        id: Uuid,
        expected_used_count: i32,
    ) -> Result<CouponModel, ServiceError> {
        let mut coupon = self.coupons.get_mut(&id).ok_or_else(|| Self::not_found(id))?;

        let cap_allows = coupon
            .max_uses
            .map_or(true, |max| max > expected_used_count);
        if coupon.used_count != expected_used_count || !cap_allows {
            return Err(ServiceError::ConcurrentModification(id));
        }

        coupon.used_count += 1;
        coupon.updated_at = Utc::now();
        Ok(coupon.clone())
    }

    async fn create(&self, new_coupon: NewCoupon) -> Result<CouponModel, ServiceError> {
        let model = new_coupon.into_model(Utc::now());
        self.claim_code(&model.code, model.id)?;
        self.coupons.insert(model.id, model.clone());
        Ok(model)
    }

    async fn update(&self, id: Uuid, patch: CouponPatch) -> Result<CouponModel, ServiceError> {
        let old_code = self
            .coupons
            .get(&id)
            .map(|coupon| coupon.code.clone())
            .ok_or_else(|| Self::not_found(id))?;

        let new_code = patch
            .code
            .as_deref()
            .map(normalize_code)
            .filter(|code| *code != old_code);
        if let Some(code) = &new_code {
            self.claim_code(code, id)?;
        }

        let outcome = match self.coupons.get_mut(&id) {
            None => Err(Self::not_found(id)),
            Some(mut coupon) => {
                let mut updated = coupon.clone();
                patch.apply_to(&mut updated, Utc::now());
                match updated.max_uses {
                    Some(max) if updated.used_count > max => Err(usage_cap_violation()),
                    _ => {
                        *coupon = updated.clone();
                        Ok(updated)
                    }
                }
            }
        };

        match (&outcome, &new_code) {
            (Ok(_), Some(_)) => self.release_code(&old_code, id),
            (Err(_), Some(code)) => self.release_code(code, id),
            _ => {}
        }

        outcome
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<CouponModel, ServiceError> {
        let mut coupon = self.coupons.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        coupon.is_active = active;
        coupon.updated_at = Utc::now();
        Ok(coupon.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let (_, coupon) = self.coupons.remove(&id).ok_or_else(|| Self::not_found(id))?;
        self.release_code(&coupon.code, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::coupon::{DiscountType, ReferenceSet};
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn new_coupon(code: &str, max_uses: Option<i32>) -> NewCoupon {
        NewCoupon {
            code: code.to_string(),
            discount: dec!(10),
            discount_type: DiscountType::Percentage,
            expiration_date: Utc::now() + Duration::days(7),
            max_uses,
            is_active: true,
            applicable_products: ReferenceSet::default(),
            applicable_categories: ReferenceSet::default(),
        }
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let store = InMemoryCouponStore::new();
        let created = store.create(new_coupon("save10", None)).await.unwrap();

        let found = store.find_by_code(" Save10 ").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.code, "SAVE10");
    }

    #[tokio::test]
    async fn duplicate_codes_are_rejected() {
        let store = InMemoryCouponStore::new();
        store.create(new_coupon("SAVE10", None)).await.unwrap();

        let err = store.create(new_coupon("save10", None)).await.unwrap_err();
        assert_matches!(err, ServiceError::DuplicateCode(code) if code == "SAVE10");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn stale_expectation_is_a_conflict() {
        let store = InMemoryCouponStore::new();
        let coupon = store.create(new_coupon("ONCE", Some(5))).await.unwrap();

        let bumped = store.increment_usage(coupon.id, 0).await.unwrap();
        assert_eq!(bumped.used_count, 1);

        let err = store.increment_usage(coupon.id, 0).await.unwrap_err();
        assert_matches!(err, ServiceError::ConcurrentModification(id) if id == coupon.id);

        let err = store.increment_usage(Uuid::new_v4(), 0).await.unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));
    }

    #[tokio::test]
    async fn increment_never_passes_the_cap() {
        let store = InMemoryCouponStore::new();
        let coupon = store.create(new_coupon("CAP", Some(1))).await.unwrap();

        store.increment_usage(coupon.id, 0).await.unwrap();
        // an expectation matching the stored value still cannot exceed max_uses
        let err = store.increment_usage(coupon.id, 1).await.unwrap_err();
        assert_matches!(err, ServiceError::ConcurrentModification(_));
        assert_eq!(
            store.find_by_id(coupon.id).await.unwrap().unwrap().used_count,
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_with_same_expectation_admit_one() {
        let store = Arc::new(InMemoryCouponStore::new());
        let coupon = store.create(new_coupon("RACE", None)).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment_usage(coupon.id, 0).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        let stored = store.find_by_id(coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.used_count, 1);
    }

    #[tokio::test]
    async fn rename_moves_the_code_reservation() {
        let store = InMemoryCouponStore::new();
        let first = store.create(new_coupon("FIRST", None)).await.unwrap();
        store.create(new_coupon("TAKEN", None)).await.unwrap();

        let err = store
            .update(
                first.id,
                CouponPatch {
                    code: Some("taken".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::DuplicateCode(_));

        let renamed = store
            .update(
                first.id,
                CouponPatch {
                    code: Some("second".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.code, "SECOND");
        assert!(store.find_by_code("FIRST").await.unwrap().is_none());
        assert!(store.find_by_code("SECOND").await.unwrap().is_some());

        // the freed code can be reused
        store.create(new_coupon("FIRST", None)).await.unwrap();
    }

    #[tokio::test]
    async fn update_rejects_cap_below_usage() {
        let store = InMemoryCouponStore::new();
        let coupon = store.create(new_coupon("USED", None)).await.unwrap();
        store.increment_usage(coupon.id, 0).await.unwrap();
        store.increment_usage(coupon.id, 1).await.unwrap();

        let err = store
            .update(
                coupon.id,
                CouponPatch {
                    max_uses: Some(Some(1)),
                    code: Some("RENAMED".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        // failed update left both the record and the code map untouched
        let stored = store.find_by_id(coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.max_uses, None);
        assert_eq!(stored.code, "USED");
        assert!(store.find_by_code("RENAMED").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_and_list() {
        let store = InMemoryCouponStore::new();
        let a = store.create(new_coupon("ALPHA", None)).await.unwrap();
        let b = store.create(new_coupon("BETA", None)).await.unwrap();
        store.set_active(b.id, false).await.unwrap();

        let (active, total) = store
            .list(
                &CouponFilter {
                    is_active: Some(true),
                    ..Default::default()
                },
                1,
                10,
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(active[0].id, a.id);

        store.delete(a.id).await.unwrap();
        assert_matches!(store.delete(a.id).await, Err(ServiceError::NotFound(_)));
        assert!(store.find_by_code("ALPHA").await.unwrap().is_none());

        let (all, total) = store.list(&CouponFilter::default(), 1, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(all[0].code, "BETA");
    }
}
