use crate::{
    entities::coupon::{self, DiscountType, Entity as Coupon, Model as CouponModel, ReferenceSet},
    errors::ServiceError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Trims and uppercases a coupon code so lookups are case-insensitive
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Everything needed to create a coupon; the store assigns id and timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct NewCoupon {
    pub code: String,
    pub discount: Decimal,
    pub discount_type: DiscountType,
    pub expiration_date: DateTime<Utc>,
    pub max_uses: Option<i32>,
    pub is_active: bool,
    pub applicable_products: ReferenceSet,
    pub applicable_categories: ReferenceSet,
}

impl NewCoupon {
    pub fn into_model(self, now: DateTime<Utc>) -> CouponModel {
        CouponModel {
            id: Uuid::new_v4(),
            code: normalize_code(&self.code),
            discount: self.discount,
            discount_type: self.discount_type,
            expiration_date: self.expiration_date,
            max_uses: self.max_uses,
            used_count: 0,
            is_active: self.is_active,
            applicable_products: self.applicable_products,
            applicable_categories: self.applicable_categories,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` leaves a field untouched; `max_uses: Some(None)`
/// lifts the cap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CouponPatch {
    pub code: Option<String>,
    pub discount: Option<Decimal>,
    pub discount_type: Option<DiscountType>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub max_uses: Option<Option<i32>>,
    pub used_count: Option<i32>,
    pub is_active: Option<bool>,
    pub applicable_products: Option<ReferenceSet>,
    pub applicable_categories: Option<ReferenceSet>,
}

impl CouponPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of the columns this patch writes, for audit details
    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            ("code", self.code.is_some()),
            ("discount", self.discount.is_some()),
            ("discount_type", self.discount_type.is_some()),
            ("expiration_date", self.expiration_date.is_some()),
            ("max_uses", self.max_uses.is_some()),
            ("used_count", self.used_count.is_some()),
            ("is_active", self.is_active.is_some()),
            ("applicable_products", self.applicable_products.is_some()),
            ("applicable_categories", self.applicable_categories.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }

    /// Applies the patch in place and stamps `updated_at`
    pub fn apply_to(&self, coupon: &mut CouponModel, now: DateTime<Utc>) {
        if let Some(code) = &self.code {
            coupon.code = normalize_code(code);
        }
        if let Some(discount) = self.discount {
            coupon.discount = discount;
        }
        if let Some(discount_type) = self.discount_type {
            coupon.discount_type = discount_type;
        }
        if let Some(expiration_date) = self.expiration_date {
            coupon.expiration_date = expiration_date;
        }
        if let Some(max_uses) = self.max_uses {
            coupon.max_uses = max_uses;
        }
        if let Some(used_count) = self.used_count {
            coupon.used_count = used_count;
        }
        if let Some(is_active) = self.is_active {
            coupon.is_active = is_active;
        }
        if let Some(products) = &self.applicable_products {
            coupon.applicable_products = products.clone();
        }
        if let Some(categories) = &self.applicable_categories {
            coupon.applicable_categories = categories.clone();
        }
        coupon.updated_at = now;
    }

    /// Active model with only the patched columns set
    fn to_active_model(&self, now: DateTime<Utc>) -> coupon::ActiveModel {
        let mut model = coupon::ActiveModel {
            updated_at: Set(now),
            ..Default::default()
        };
        if let Some(code) = &self.code {
            model.code = Set(normalize_code(code));
        }
        if let Some(discount) = self.discount {
            model.discount = Set(discount);
        }
        if let Some(discount_type) = self.discount_type {
            model.discount_type = Set(discount_type);
        }
        if let Some(expiration_date) = self.expiration_date {
            model.expiration_date = Set(expiration_date);
        }
        if let Some(max_uses) = self.max_uses {
            model.max_uses = Set(max_uses);
        }
        if let Some(used_count) = self.used_count {
            model.used_count = Set(used_count);
        }
        if let Some(is_active) = self.is_active {
            model.is_active = Set(is_active);
        }
        if let Some(products) = &self.applicable_products {
            model.applicable_products = Set(products.clone());
        }
        if let Some(categories) = &self.applicable_categories {
            model.applicable_categories = Set(categories.clone());
        }
        model
    }
}

/// List filter for the admin API
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CouponFilter {
    pub is_active: Option<bool>,
    /// Case-insensitive code substring
    pub search: Option<String>,
}

impl CouponFilter {
    pub fn matches(&self, coupon: &CouponModel) -> bool {
        if let Some(active) = self.is_active {
            if coupon.is_active != active {
                return false;
            }
        }
        match self.search.as_deref().map(normalize_code) {
            Some(needle) if !needle.is_empty() => coupon.code.contains(&needle),
            _ => true,
        }
    }
}

pub(crate) fn usage_cap_violation() -> ServiceError {
    ServiceError::ValidationError("used_count cannot exceed max_uses".to_string())
}

/// Persistence for coupon records.
///
/// `increment_usage` is the only path redemptions use to write: it bumps
/// `used_count` by one only while the stored value still equals
/// `expected_used_count` and the cap allows it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<CouponModel>, ServiceError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CouponModel>, ServiceError>;

    async fn list(
        &self,
        filter: &CouponFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CouponModel>, u64), ServiceError>;

    async fn increment_usage(
        &self,
        id: Uuid,
        expected_used_count: i32,
    ) -> Result<CouponModel, ServiceError>;

    async fn create(&self, new_coupon: NewCoupon) -> Result<CouponModel, ServiceError>;

    async fn update(&self, id: Uuid, patch: CouponPatch) -> Result<CouponModel, ServiceError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<CouponModel, ServiceError>;

    async fn delete(&self, id: Uuid) -> Result<(), ServiceError>;
}

/// Coupon store on top of sea-orm
#[derive(Clone)]
pub struct SeaOrmCouponStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCouponStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn fetch(&self, id: Uuid) -> Result<CouponModel, ServiceError> {
        Coupon::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }

    async fn ensure_code_free(&self, code: &str, owner: Option<Uuid>) -> Result<(), ServiceError> {
        match self.find_by_code(code).await? {
            Some(existing) if Some(existing.id) != owner => {
                Err(ServiceError::DuplicateCode(existing.code))
            }
            _ => Ok(()),
        }
    }
}

fn map_write_error(err: DbErr, code: Option<&str>) -> ServiceError {
    match (err.sql_err(), code) {
        (Some(SqlErr::UniqueConstraintViolation(_)), Some(code)) => {
            ServiceError::DuplicateCode(code.to_string())
        }
        _ => ServiceError::DatabaseError(err),
    }
}

#[async_trait]
impl CouponStore for SeaOrmCouponStore {
    #[instrument(skip(self))]
    async fn find_by_code(&self, code: &str) -> Result<Option<CouponModel>, ServiceError> {
        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(&*self.db)
            .await?;
        Ok(coupon)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<CouponModel>, ServiceError> {
        Ok(Coupon::find_by_id(id).one(&*self.db).await?)
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        filter: &CouponFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CouponModel>, u64), ServiceError> {
        let mut query = Coupon::find();
        if let Some(active) = filter.is_active {
            query = query.filter(coupon::Column::IsActive.eq(active));
        }
        if let Some(search) = filter.search.as_deref().map(normalize_code) {
            if !search.is_empty() {
                query = query.filter(coupon::Column::Code.contains(search));
            }
        }

        let paginator = query
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let coupons = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((coupons, total))
    }

    #[instrument(skip(self))]
    async fn increment_usage(
        &self,
        id: Uuid,
        expected_used_count: i32,
    ) -> Result<CouponModel, ServiceError> {
        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(id))
            .filter(coupon::Column::UsedCount.eq(expected_used_count))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUses.is_null())
                    .add(coupon::Column::MaxUses.gt(expected_used_count)),
            )
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // Either the row is gone or another redemption moved the counter
            self.fetch(id).await?;
            debug!(coupon_id = %id, expected_used_count, "Usage counter moved");
            return Err(ServiceError::ConcurrentModification(id));
        }

        self.fetch(id).await
    }

    #[instrument(skip(self, new_coupon), fields(code = %new_coupon.code))]
    async fn create(&self, new_coupon: NewCoupon) -> Result<CouponModel, ServiceError> {
        let model = new_coupon.into_model(Utc::now());
        self.ensure_code_free(&model.code, None).await?;

        let code = model.code.clone();
        let active: coupon::ActiveModel = model.into();
        active
            .insert(&*self.db)
            .await
            .map_err(|e| map_write_error(e, Some(code.as_str())))
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: Uuid, patch: CouponPatch) -> Result<CouponModel, ServiceError> {
        let existing = self.fetch(id).await?;
        let new_code = patch.code.as_deref().map(normalize_code);

        if let Some(code) = new_code.as_deref() {
            if code != existing.code {
                self.ensure_code_free(code, Some(id)).await?;
            }
        }

        let mut preview = existing.clone();
        patch.apply_to(&mut preview, Utc::now());
        if let Some(max) = preview.max_uses {
            if preview.used_count > max {
                return Err(usage_cap_violation());
            }
        }

        // Guard the cap against counters that move between the read and the write
        let mut condition = Condition::all().add(coupon::Column::Id.eq(id));
        match (patch.used_count, patch.max_uses) {
            (None, Some(Some(max))) => {
                condition = condition.add(coupon::Column::UsedCount.lte(max));
            }
            (Some(used), None) => {
                condition = condition.add(
                    Condition::any()
                        .add(coupon::Column::MaxUses.is_null())
                        .add(coupon::Column::MaxUses.gte(used)),
                );
            }
            _ => {}
        }

        let result = Coupon::update_many()
            .set(patch.to_active_model(Utc::now()))
            .filter(condition)
            .exec(&*self.db)
            .await
            .map_err(|e| map_write_error(e, new_code.as_deref()))?;

        if result.rows_affected == 0 {
            self.fetch(id).await?;
            return Err(usage_cap_violation());
        }

        self.fetch(id).await
    }

    #[instrument(skip(self))]
    async fn set_active(&self, id: Uuid, active: bool) -> Result<CouponModel, ServiceError> {
        let result = Coupon::update_many()
            .col_expr(coupon::Column::IsActive, Expr::value(active))
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }

        self.fetch(id).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = Coupon::delete_by_id(id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::coupons::evaluator::tests::sample_coupon;
    use rust_decimal_macros::dec;

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize_code("  save10 "), "SAVE10");
        assert_eq!(normalize_code("Black-Friday_1"), "BLACK-FRIDAY_1");
    }

    #[test]
    fn new_coupon_starts_unused() {
        let model = NewCoupon {
            code: "welcome".into(),
            discount: dec!(5),
            discount_type: DiscountType::Fixed,
            expiration_date: Utc::now() + chrono::Duration::days(1),
            max_uses: Some(10),
            is_active: true,
            applicable_products: ReferenceSet::default(),
            applicable_categories: ReferenceSet::default(),
        }
        .into_model(Utc::now());

        assert_eq!(model.code, "WELCOME");
        assert_eq!(model.used_count, 0);
        assert_eq!(model.created_at, model.updated_at);
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut coupon = sample_coupon(DiscountType::Percentage, dec!(10));
        coupon.max_uses = Some(5);
        let before = coupon.clone();

        let patch = CouponPatch {
            discount: Some(dec!(15)),
            max_uses: Some(None),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        assert_eq!(patch.changed_fields(), vec!["discount", "max_uses"]);
        patch.apply_to(&mut coupon, before.updated_at);

        assert_eq!(coupon.discount, dec!(15));
        assert_eq!(coupon.max_uses, None);
        assert_eq!(coupon.code, before.code);
        assert_eq!(coupon.used_count, before.used_count);
        assert!(CouponPatch::default().is_empty());
    }

    #[test]
    fn filter_matches_active_flag_and_code_substring() {
        let coupon = sample_coupon(DiscountType::Fixed, dec!(1));

        assert!(CouponFilter::default().matches(&coupon));
        assert!(CouponFilter {
            search: Some("ave".into()),
            ..Default::default()
        }
        .matches(&coupon));
        assert!(!CouponFilter {
            is_active: Some(false),
            ..Default::default()
        }
        .matches(&coupon));
        assert!(!CouponFilter {
            search: Some("WINTER".into()),
            ..Default::default()
        }
        .matches(&coupon));
    }
}
