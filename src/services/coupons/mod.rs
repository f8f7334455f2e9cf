//! Coupon validation, redemption and administration.

pub mod evaluator;
pub mod memory_store;
pub mod store;

pub use evaluator::{check_scope, evaluate, order_total_from_f64, OrderScope, RejectionReason};
pub use memory_store::InMemoryCouponStore;
pub use store::{normalize_code, CouponFilter, CouponPatch, CouponStore, NewCoupon, SeaOrmCouponStore};

use crate::{
    config::CouponSettings,
    entities::coupon::Model as CouponModel,
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit::{AuditEntry, AuditSink},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Longest accepted coupon code after normalization
pub const MAX_CODE_LEN: usize = 15;

/// Discounts must fit the `DECIMAL(19, 4)` column they are stored in
pub const MAX_DISCOUNT: Decimal = Decimal::from_parts(2_313_682_943, 2_328_306_436, 0, false, 4);

/// Result of a redemption attempt that reached a decision
#[derive(Debug, Clone, PartialEq)]
pub enum RedemptionOutcome {
    /// The coupon was applied; `coupon` carries the incremented counter
    Applied {
        discount_amount: Decimal,
        coupon: CouponModel,
    },
    Rejected(RejectionReason),
}

/// Normalizes a code and checks it is 1 to 15 characters of `A-Z`, `0-9`, `_` or `-`
pub fn validate_code(code: &str) -> Result<String, ServiceError> {
    let normalized = normalize_code(code);
    if normalized.is_empty() || normalized.chars().count() > MAX_CODE_LEN {
        return Err(ServiceError::ValidationError(format!(
            "code must be between 1 and {} characters",
            MAX_CODE_LEN
        )));
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(ServiceError::ValidationError(
            "code may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    Ok(normalized)
}

fn validate_discount(discount: Decimal) -> Result<(), ServiceError> {
    if discount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "discount must not be negative".to_string(),
        ));
    }
    if discount > MAX_DISCOUNT {
        return Err(ServiceError::ValidationError(format!(
            "discount must not exceed {}",
            MAX_DISCOUNT
        )));
    }
    Ok(())
}

fn validate_max_uses(max_uses: Option<i32>) -> Result<(), ServiceError> {
    match max_uses {
        Some(max) if max <= 0 => Err(ServiceError::ValidationError(
            "max_uses must be a positive integer".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_expiration(expiration: chrono::DateTime<Utc>) -> Result<(), ServiceError> {
    if expiration <= Utc::now() {
        return Err(ServiceError::ValidationError(
            "expiration_date must be in the future".to_string(),
        ));
    }
    Ok(())
}

/// Coupon service: redemption plus admin CRUD over a [`CouponStore`]
#[derive(Clone)]
pub struct CouponService {
    store: Arc<dyn CouponStore>,
    audit: Arc<dyn AuditSink>,
    event_sender: Arc<EventSender>,
    settings: CouponSettings,
}

impl CouponService {
    pub fn new(
        store: Arc<dyn CouponStore>,
        audit: Arc<dyn AuditSink>,
        event_sender: Arc<EventSender>,
        settings: CouponSettings,
    ) -> Self {
        Self {
            store,
            audit,
            event_sender,
            settings,
        }
    }

    pub fn settings(&self) -> &CouponSettings {
        &self.settings
    }

    /// Validates `code` against `order_total` and, if it passes, consumes one use.
    ///
    /// When another redemption moves the counter between lookup and
    /// increment the lookup and evaluation are repeated, up to
    /// `max_redemption_attempts` rounds in total.
    #[instrument(skip(self, scope))]
    pub async fn apply_coupon(
        &self,
        code: &str,
        order_total: Decimal,
        scope: Option<&OrderScope>,
    ) -> Result<RedemptionOutcome, ServiceError> {
        if !self.settings.redemption_enabled {
            return Err(ServiceError::ServiceUnavailable(
                "Coupon redemption is disabled".to_string(),
            ));
        }

        let max_attempts = self.settings.max_redemption_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let coupon = self.store.find_by_code(code).await?;
            let discount_amount = match evaluate(coupon.as_ref(), order_total, Utc::now()) {
                Ok(amount) => amount,
                Err(reason) => return Ok(self.rejected(code, reason)),
            };
            let Some(coupon) = coupon else {
                return Ok(self.rejected(code, RejectionReason::CouponNotFound));
            };

            if let Some(scope) = scope {
                if let Err(reason) = check_scope(&coupon, scope) {
                    return Ok(self.rejected(code, reason));
                }
            }

            match self.store.increment_usage(coupon.id, coupon.used_count).await {
                Ok(updated) => {
                    counter!("coupons.redemptions.applied", 1);
                    info!(
                        coupon_id = %updated.id,
                        %discount_amount,
                        used_count = updated.used_count,
                        attempt,
                        "Coupon applied"
                    );
                    self.event_sender
                        .send_or_log(Event::CouponRedeemed {
                            coupon_id: updated.id,
                            code: updated.code.clone(),
                            discount_amount,
                            used_count: updated.used_count,
                            redeemed_at: Utc::now(),
                        })
                        .await;
                    return Ok(RedemptionOutcome::Applied {
                        discount_amount,
                        coupon: updated,
                    });
                }
                Err(ServiceError::ConcurrentModification(id)) => {
                    counter!("coupons.redemptions.conflicts", 1);
                    if attempt >= max_attempts {
                        warn!(
                            coupon_id = %id,
                            attempts = attempt,
                            "Coupon redemption gave up after repeated conflicts"
                        );
                        return Ok(self.rejected(code, RejectionReason::ConcurrencyConflict));
                    }
                    debug!(coupon_id = %id, attempt, "Usage counter moved, retrying");
                    tokio::task::yield_now().await;
                }
                Err(ServiceError::NotFound(_)) => {
                    return Ok(self.rejected(code, RejectionReason::CouponNotFound));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn rejected(&self, code: &str, reason: RejectionReason) -> RedemptionOutcome {
        counter!("coupons.redemptions.rejected", 1, "reason" => reason.as_ref().to_owned());
        debug!(%code, ?reason, "Coupon rejected");
        RedemptionOutcome::Rejected(reason)
    }

    #[instrument(skip(self))]
    pub async fn get_coupon(&self, id: Uuid) -> Result<CouponModel, ServiceError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }

    /// Case-insensitive lookup, without consuming a use
    #[instrument(skip(self))]
    pub async fn find_by_code(&self, code: &str) -> Result<Option<CouponModel>, ServiceError> {
        self.store.find_by_code(code).await
    }

    #[instrument(skip(self))]
    pub async fn list_coupons(
        &self,
        filter: CouponFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CouponModel>, u64), ServiceError> {
        self.store.list(&filter, page.max(1), per_page.max(1)).await
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(
        &self,
        mut input: NewCoupon,
        performed_by: Option<String>,
    ) -> Result<CouponModel, ServiceError> {
        input.code = validate_code(&input.code)?;
        validate_discount(input.discount)?;
        validate_max_uses(input.max_uses)?;
        validate_expiration(input.expiration_date)?;

        let coupon = self.store.create(input).await?;
        info!(coupon_id = %coupon.id, code = %coupon.code, "Coupon created");

        self.record_audit(AuditEntry::coupon(
            "coupon.created",
            coupon.id,
            performed_by,
            json!({
                "code": coupon.code,
                "discount": coupon.discount,
                "discount_type": coupon.discount_type,
                "max_uses": coupon.max_uses,
            }),
        ))
        .await;
        self.event_sender
            .send_or_log(Event::CouponCreated {
                coupon_id: coupon.id,
                code: coupon.code.clone(),
            })
            .await;

        Ok(coupon)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_coupon(
        &self,
        id: Uuid,
        mut patch: CouponPatch,
        performed_by: Option<String>,
    ) -> Result<CouponModel, ServiceError> {
        if patch.is_empty() {
            return Err(ServiceError::ValidationError(
                "update must change at least one field".to_string(),
            ));
        }
        if let Some(code) = &patch.code {
            patch.code = Some(validate_code(code)?);
        }
        if let Some(discount) = patch.discount {
            validate_discount(discount)?;
        }
        if let Some(max_uses) = patch.max_uses {
            validate_max_uses(max_uses)?;
        }
        if let Some(expiration) = patch.expiration_date {
            validate_expiration(expiration)?;
        }
        if matches!(patch.used_count, Some(used) if used < 0) {
            return Err(ServiceError::ValidationError(
                "used_count must not be negative".to_string(),
            ));
        }

        let changed = patch.changed_fields();
        let coupon = self.store.update(id, patch).await?;
        info!(coupon_id = %coupon.id, ?changed, "Coupon updated");

        self.record_audit(AuditEntry::coupon(
            "coupon.updated",
            coupon.id,
            performed_by,
            json!({ "changed": changed }),
        ))
        .await;
        self.event_sender
            .send_or_log(Event::CouponUpdated(coupon.id))
            .await;

        Ok(coupon)
    }

    #[instrument(skip(self))]
    pub async fn set_active(
        &self,
        id: Uuid,
        active: bool,
        performed_by: Option<String>,
    ) -> Result<CouponModel, ServiceError> {
        let coupon = self.store.set_active(id, active).await?;
        info!(coupon_id = %coupon.id, is_active = active, "Coupon activation changed");

        let action = if active {
            "coupon.activated"
        } else {
            "coupon.deactivated"
        };
        self.record_audit(AuditEntry::coupon(
            action,
            coupon.id,
            performed_by,
            json!({ "is_active": active }),
        ))
        .await;
        self.event_sender
            .send_or_log(Event::CouponActivationChanged {
                coupon_id: coupon.id,
                is_active: active,
            })
            .await;

        Ok(coupon)
    }

    #[instrument(skip(self))]
    pub async fn delete_coupon(
        &self,
        id: Uuid,
        performed_by: Option<String>,
    ) -> Result<(), ServiceError> {
        let existing = self.get_coupon(id).await?;
        self.store.delete(id).await?;
        info!(coupon_id = %id, code = %existing.code, "Coupon deleted");

        self.record_audit(AuditEntry::coupon(
            "coupon.deleted",
            id,
            performed_by,
            json!({ "code": existing.code, "used_count": existing.used_count }),
        ))
        .await;
        self.event_sender.send_or_log(Event::CouponDeleted(id)).await;

        Ok(())
    }

    /// Audit failures are logged; the mutation they describe stands.
    async fn record_audit(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        let entity_id = entry.entity_id;
        if let Err(e) = self.audit.record(entry).await {
            warn!(%action, %entity_id, error = %e, "Failed to record audit entry");
        }
    }
}
