use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Admin API",
        version = "0.1.0",
        description = r#"
# Storefront Admin API

Coupon management and redemption for the storefront back office.

## Redemption

`POST /api/v1/coupons/apply` validates a code against an order total and
consumes one use. Rejections are returned as
`{"success": false, "reason": "<Reason>", "message": "..."}` where `reason`
is one of `InvalidOrderTotal`, `CouponNotFound`, `CouponInactive`,
`CouponExpired`, `UsageLimitReached`, `CouponNotApplicable` or
`ConcurrencyConflict`.

## Administration

Mutating endpoints record an audit entry. Pass the acting administrator in
the `x-user-id` header.

## Errors

Other failures use a common body:

```json
{
  "error": "Not Found",
  "message": "Not found: Coupon 550e8400-e29b-41d4-a716-446655440000 not found",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

Every response carries an `x-request-id` header.
"#
    ),
    paths(
        crate::handlers::coupons::apply_coupon,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::get_coupon,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::coupons::activate_coupon,
        crate::handlers::coupons::deactivate_coupon,
        crate::handlers::coupons::delete_coupon,
        crate::handlers::audit_logs::list_audit_logs,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::handlers::coupons::ApplyCouponRequest,
            crate::handlers::coupons::ApplyCouponResponse,
            crate::handlers::coupons::CouponRejectionResponse,
            crate::handlers::coupons::CreateCouponRequest,
            crate::handlers::coupons::UpdateCouponRequest,
            crate::handlers::coupons::CouponResponse,
            crate::handlers::audit_logs::AuditLogEntryResponse,
            crate::handlers::health::HealthResponse,
            crate::services::coupons::RejectionReason,
            crate::entities::coupon::DiscountType,
            crate::errors::ErrorResponse
        )
    ),
    tags(
        (name = "coupons", description = "Coupon redemption and administration"),
        (name = "audit", description = "Audit trail of administrative changes"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_coupon_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Storefront Admin API"));
        assert!(json.contains("/api/v1/coupons/apply"));
        assert!(json.contains("/api/v1/audit-logs"));
        assert!(json.contains("UsageLimitReached"));
    }
}
