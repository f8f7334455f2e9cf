pub mod audit_log;
pub mod coupon;

// Re-export entities
pub use audit_log::{Entity as AuditLog, Model as AuditLogModel};
pub use coupon::{DiscountType, Entity as Coupon, Model as CouponModel, ReferenceSet};
