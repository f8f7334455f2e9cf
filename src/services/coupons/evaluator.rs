//! Pure redemption rules.
//!
//! Nothing in here touches storage or the clock: callers pass the coupon
//! they looked up and the instant to judge expiry against.

use crate::entities::coupon::{DiscountType, Model as CouponModel};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Decimal places a percentage discount is rounded to
const DISCOUNT_SCALE: u32 = 2;

/// Why a coupon was not applied. Serialized with the variant name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    thiserror::Error,
    strum::AsRefStr,
)]
pub enum RejectionReason {
    #[error("Order total must be a positive amount")]
    InvalidOrderTotal,
    #[error("Coupon not found")]
    CouponNotFound,
    #[error("Coupon is inactive")]
    CouponInactive,
    #[error("Coupon has expired")]
    CouponExpired,
    #[error("Coupon usage limit reached")]
    UsageLimitReached,
    #[error("Coupon does not apply to this order")]
    CouponNotApplicable,
    #[error("Coupon is being redeemed concurrently, please retry")]
    ConcurrencyConflict,
}

/// Products and categories present in the order being discounted
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderScope {
    pub product_ids: Vec<Uuid>,
    pub category_ids: Vec<Uuid>,
}

impl OrderScope {
    pub fn new(product_ids: Vec<Uuid>, category_ids: Vec<Uuid>) -> Self {
        Self {
            product_ids,
            category_ids,
        }
    }
}

/// Decides whether `coupon` can be redeemed against `order_total` at `now`
/// and returns the discount it grants.
///
/// Checks run in a fixed order and stop at the first failure: order total,
/// existence, active flag, expiry, usage cap.
pub fn evaluate(
    coupon: Option<&CouponModel>,
    order_total: Decimal,
    now: DateTime<Utc>,
) -> Result<Decimal, RejectionReason> {
    if order_total <= Decimal::ZERO {
        return Err(RejectionReason::InvalidOrderTotal);
    }

    let coupon = coupon.ok_or(RejectionReason::CouponNotFound)?;

    if !coupon.is_active {
        return Err(RejectionReason::CouponInactive);
    }

    if coupon.is_expired_at(now) {
        return Err(RejectionReason::CouponExpired);
    }

    if coupon.is_exhausted() {
        return Err(RejectionReason::UsageLimitReached);
    }

    Ok(discount_amount(coupon, order_total))
}

/// [`evaluate`] against the current wall clock
pub fn evaluate_now(
    coupon: Option<&CouponModel>,
    order_total: Decimal,
) -> Result<Decimal, RejectionReason> {
    evaluate(coupon, order_total, Utc::now())
}

/// Discount granted by `coupon` on `order_total`, clamped to `[0, order_total]`.
///
/// Amounts carry at least two decimal places; a fixed discount stored with
/// more precision keeps it.
pub fn discount_amount(coupon: &CouponModel, order_total: Decimal) -> Decimal {
    let raw = match coupon.discount_type {
        // An overflowing product is larger than any order total
        DiscountType::Percentage => (coupon.discount / Decimal::ONE_HUNDRED)
            .checked_mul(order_total)
            .map(|amount| {
                amount.round_dp_with_strategy(DISCOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
            })
            .unwrap_or(order_total),
        DiscountType::Fixed => coupon.discount,
    };

    let mut amount = raw.min(order_total).max(Decimal::ZERO);
    if amount.scale() < DISCOUNT_SCALE {
        amount.rescale(DISCOUNT_SCALE);
    }
    amount
}

/// Rejects a coupon restricted to products or categories that the order
/// does not contain. An unrestricted coupon always passes.
pub fn check_scope(coupon: &CouponModel, scope: &OrderScope) -> Result<(), RejectionReason> {
    if !coupon.has_scope_restrictions() {
        return Ok(());
    }

    let product_match = !coupon.applicable_products.is_empty()
        && coupon.applicable_products.intersects(&scope.product_ids);
    let category_match = !coupon.applicable_categories.is_empty()
        && coupon.applicable_categories.intersects(&scope.category_ids);

    if product_match || category_match {
        Ok(())
    } else {
        Err(RejectionReason::CouponNotApplicable)
    }
}

/// Converts a float total received at the edge, rejecting NaN, infinities
/// and non-positive values.
pub fn order_total_from_f64(total: f64) -> Result<Decimal, RejectionReason> {
    if !total.is_finite() || total <= 0.0 {
        return Err(RejectionReason::InvalidOrderTotal);
    }

    Decimal::from_f64(total)
        .filter(|value| *value > Decimal::ZERO)
        .ok_or(RejectionReason::InvalidOrderTotal)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entities::coupon::ReferenceSet;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_coupon(discount_type: DiscountType, discount: Decimal) -> CouponModel {
        let now = Utc::now();
        CouponModel {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            discount,
            discount_type,
            expiration_date: now + Duration::days(30),
            max_uses: None,
            used_count: 0,
            is_active: true,
            applicable_products: ReferenceSet::default(),
            applicable_categories: ReferenceSet::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn percentage_discount_on_order() {
        let coupon = sample_coupon(DiscountType::Percentage, dec!(10));
        assert_eq!(evaluate_now(Some(&coupon), dec!(200)), Ok(dec!(20)));
    }

    #[test]
    fn fixed_discount_below_total_is_exact() {
        let coupon = sample_coupon(DiscountType::Fixed, dec!(12.345));
        assert_eq!(evaluate_now(Some(&coupon), dec!(50)), Ok(dec!(12.345)));
    }

    #[test]
    fn fixed_discount_is_clamped_to_total() {
        let coupon = sample_coupon(DiscountType::Fixed, dec!(500));
        assert_eq!(evaluate_now(Some(&coupon), dec!(100)), Ok(dec!(100)));
    }

    #[test]
    fn percentage_above_hundred_is_clamped() {
        let coupon = sample_coupon(DiscountType::Percentage, dec!(150));
        assert_eq!(evaluate_now(Some(&coupon), dec!(80)), Ok(dec!(80)));
    }

    #[test]
    fn percentage_is_rounded_half_away_from_zero() {
        let coupon = sample_coupon(DiscountType::Percentage, dec!(15));
        // 15% of 33.33 = 4.9995
        assert_eq!(evaluate_now(Some(&coupon), dec!(33.33)), Ok(dec!(5.00)));
    }

    #[test]
    fn huge_percentage_on_huge_total_is_clamped() {
        let coupon = sample_coupon(DiscountType::Percentage, dec!(100000000000000000000));
        assert_eq!(
            evaluate_now(Some(&coupon), dec!(1000000000000000)),
            Ok(dec!(1000000000000000.00))
        );

        let coupon = sample_coupon(DiscountType::Percentage, dec!(10000000000000));
        assert_eq!(
            evaluate_now(Some(&coupon), dec!(10000000000000000)),
            Ok(dec!(10000000000000000))
        );
    }

    #[test]
    fn zero_discount_is_allowed() {
        let coupon = sample_coupon(DiscountType::Fixed, Decimal::ZERO);
        assert_eq!(evaluate_now(Some(&coupon), dec!(10)), Ok(Decimal::ZERO));
    }

    #[test]
    fn exhausted_coupon_is_rejected() {
        let mut coupon = sample_coupon(DiscountType::Percentage, dec!(10));
        coupon.max_uses = Some(2);
        coupon.used_count = 2;
        assert_eq!(
            evaluate_now(Some(&coupon), dec!(200)),
            Err(RejectionReason::UsageLimitReached)
        );

        coupon.used_count = 1;
        assert_eq!(evaluate_now(Some(&coupon), dec!(200)), Ok(dec!(20)));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let coupon = sample_coupon(DiscountType::Fixed, dec!(5));
        let at_expiry = coupon.expiration_date;

        assert_eq!(evaluate(Some(&coupon), dec!(10), at_expiry), Ok(dec!(5)));
        assert_eq!(
            evaluate(Some(&coupon), dec!(10), at_expiry + Duration::seconds(1)),
            Err(RejectionReason::CouponExpired)
        );
    }

    #[test]
    fn expired_wins_over_usage_limit() {
        let mut coupon = sample_coupon(DiscountType::Fixed, dec!(5));
        coupon.expiration_date = Utc::now() - Duration::days(1);
        coupon.max_uses = Some(1);
        coupon.used_count = 1;

        assert_eq!(
            evaluate_now(Some(&coupon), dec!(10)),
            Err(RejectionReason::CouponExpired)
        );
    }

    #[rstest]
    #[case::non_positive_total(true, true, false, false, dec!(0), RejectionReason::InvalidOrderTotal)]
    #[case::negative_total(false, false, true, true, dec!(-5), RejectionReason::InvalidOrderTotal)]
    #[case::missing(false, true, false, false, dec!(10), RejectionReason::CouponNotFound)]
    #[case::inactive_and_expired(true, false, true, true, dec!(10), RejectionReason::CouponInactive)]
    #[case::expired_regardless_of_active(true, true, true, true, dec!(10), RejectionReason::CouponExpired)]
    #[case::exhausted(true, true, false, true, dec!(10), RejectionReason::UsageLimitReached)]
    fn checks_short_circuit_in_order(
        #[case] present: bool,
        #[case] active: bool,
        #[case] expired: bool,
        #[case] exhausted: bool,
        #[case] total: Decimal,
        #[case] expected: RejectionReason,
    ) {
        let mut coupon = sample_coupon(DiscountType::Fixed, dec!(5));
        coupon.is_active = active;
        if expired {
            coupon.expiration_date = Utc::now() - Duration::hours(1);
        }
        if exhausted {
            coupon.max_uses = Some(3);
            coupon.used_count = 3;
        }

        let result = evaluate_now(present.then_some(&coupon), total);
        assert_eq!(result, Err(expected));
    }

    #[test]
    fn unrestricted_coupon_applies_to_any_scope() {
        let coupon = sample_coupon(DiscountType::Fixed, dec!(5));
        assert!(check_scope(&coupon, &OrderScope::default()).is_ok());
    }

    #[test]
    fn restricted_coupon_needs_a_shared_reference() {
        let product = Uuid::new_v4();
        let category = Uuid::new_v4();
        let mut coupon = sample_coupon(DiscountType::Fixed, dec!(5));
        coupon.applicable_products = ReferenceSet::new(vec![product]);
        coupon.applicable_categories = ReferenceSet::new(vec![category]);

        assert!(check_scope(&coupon, &OrderScope::new(vec![product], vec![])).is_ok());
        assert!(check_scope(&coupon, &OrderScope::new(vec![], vec![category])).is_ok());
        assert_matches!(
            check_scope(
                &coupon,
                &OrderScope::new(vec![Uuid::new_v4()], vec![Uuid::new_v4()])
            ),
            Err(RejectionReason::CouponNotApplicable)
        );
    }

    #[test]
    fn float_totals_are_checked_at_the_edge() {
        assert_eq!(order_total_from_f64(19.99), Ok(dec!(19.99)));
        assert_eq!(
            order_total_from_f64(f64::NAN),
            Err(RejectionReason::InvalidOrderTotal)
        );
        assert_eq!(
            order_total_from_f64(f64::INFINITY),
            Err(RejectionReason::InvalidOrderTotal)
        );
        assert_eq!(
            order_total_from_f64(-1.0),
            Err(RejectionReason::InvalidOrderTotal)
        );
    }

    #[test]
    fn rejection_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&RejectionReason::UsageLimitReached).unwrap(),
            "\"UsageLimitReached\""
        );
        assert_eq!(RejectionReason::CouponExpired.as_ref(), "CouponExpired");
    }
}
