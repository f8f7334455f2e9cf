use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Coupon entity. `code` is stored normalized (trimmed, uppercase).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount: Decimal,
    pub discount_type: DiscountType,
    pub expiration_date: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    #[sea_orm(column_type = "Json")]
    pub applicable_products: ReferenceSet,
    #[sea_orm(column_type = "Json")]
    pub applicable_categories: ReferenceSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date < now
    }

    /// Remaining redemptions, `None` when the coupon is unlimited.
    pub fn remaining_uses(&self) -> Option<i32> {
        self.max_uses
            .map(|max| (max - self.used_count).max(0))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.remaining_uses(), Some(0))
    }

    pub fn has_scope_restrictions(&self) -> bool {
        !self.applicable_products.is_empty() || !self.applicable_categories.is_empty()
    }
}

/// How `discount` is interpreted
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscountType {
    /// `discount` is a percentage of the order total
    #[sea_orm(string_value = "percentage")]
    Percentage,
    /// `discount` is an absolute amount in the order currency
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

/// Set of product or category ids a coupon is restricted to.
///
/// Kept sorted and de-duplicated so equality and JSON output are stable.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema,
)]
#[serde(from = "Vec<Uuid>", into = "Vec<Uuid>")]
pub struct ReferenceSet(Vec<Uuid>);

impl ReferenceSet {
    pub fn new(ids: impl IntoIterator<Item = Uuid>) -> Self {
        let mut ids: Vec<Uuid> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.0.binary_search(id).is_ok()
    }

    pub fn intersects(&self, ids: &[Uuid]) -> bool {
        ids.iter().any(|id| self.contains(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uuid> {
        self.0.iter()
    }
}

impl From<Vec<Uuid>> for ReferenceSet {
    fn from(ids: Vec<Uuid>) -> Self {
        Self::new(ids)
    }
}

impl From<ReferenceSet> for Vec<Uuid> {
    fn from(set: ReferenceSet) -> Self {
        set.0
    }
}

impl FromIterator<Uuid> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        Self::new(iter)
    }
}
