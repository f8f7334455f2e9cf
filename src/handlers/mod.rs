pub mod audit_logs;
pub mod common;
pub mod coupons;
pub mod health;

use crate::config::CouponSettings;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    audit::{AuditLogService, AuditSink},
    coupons::{CouponService, CouponStore, SeaOrmCouponStore},
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub coupons: Arc<CouponService>,
    pub audit: Arc<AuditLogService>,
}

impl AppServices {
    /// Database-backed services
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        settings: CouponSettings,
    ) -> Self {
        let store: Arc<dyn CouponStore> = Arc::new(SeaOrmCouponStore::new(db_pool.clone()));
        Self::with_store(store, db_pool, event_sender, settings)
    }

    /// Same wiring with a caller-supplied coupon store
    pub fn with_store(
        store: Arc<dyn CouponStore>,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        settings: CouponSettings,
    ) -> Self {
        let audit = Arc::new(AuditLogService::new(db_pool));
        let sink: Arc<dyn AuditSink> = audit.clone();
        let coupons = Arc::new(CouponService::new(store, sink, event_sender, settings));

        Self { coupons, audit }
    }
}
