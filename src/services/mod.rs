// Coupon redemption and administration
pub mod coupons;

// Audit trail for administrative mutations
pub mod audit;
