use crate::{
    entities::coupon::{DiscountType, Model as CouponModel, ReferenceSet},
    errors::{ApiError, ServiceError},
    handlers::common::{
        created_response, default_page, default_per_page, no_content_response, validate_input,
        Actor, PaginationParams,
    },
    services::coupons::{
        order_total_from_f64, CouponFilter, CouponPatch, NewCoupon, OrderScope,
        RedemptionOutcome, RejectionReason,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Distinguishes an absent field from an explicit `null`
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "code": "SAVE10",
    "orderTotal": 200.0,
    "productIds": ["550e8400-e29b-41d4-a716-446655440000"]
}))]
pub struct ApplyCouponRequest {
    /// Coupon code, matched case-insensitively
    #[validate(length(min = 1, max = 64))]
    #[schema(example = "SAVE10")]
    pub code: String,
    /// Order total the discount is computed against
    #[schema(example = 200.0)]
    pub order_total: f64,
    /// Products in the order; enables product restriction checks
    pub product_ids: Option<Vec<Uuid>>,
    /// Categories in the order; enables category restriction checks
    pub category_ids: Option<Vec<Uuid>>,
}

impl ApplyCouponRequest {
    fn scope(&self) -> Option<OrderScope> {
        if self.product_ids.is_none() && self.category_ids.is_none() {
            return None;
        }
        Some(OrderScope::new(
            self.product_ids.clone().unwrap_or_default(),
            self.category_ids.clone().unwrap_or_default(),
        ))
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "success": true,
    "discountAmount": "20.00",
    "couponId": "550e8400-e29b-41d4-a716-446655440000",
    "usedCount": 1
}))]
pub struct ApplyCouponResponse {
    pub success: bool,
    pub discount_amount: Decimal,
    pub coupon_id: Uuid,
    pub used_count: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "success": false,
    "reason": "UsageLimitReached",
    "message": "Coupon usage limit reached"
}))]
pub struct CouponRejectionResponse {
    pub success: bool,
    pub reason: RejectionReason,
    pub message: String,
}

/// HTTP status for a rejected redemption
pub fn rejection_status(reason: RejectionReason) -> StatusCode {
    match reason {
        RejectionReason::CouponNotFound => StatusCode::NOT_FOUND,
        RejectionReason::InvalidOrderTotal => StatusCode::BAD_REQUEST,
        RejectionReason::ConcurrencyConflict => StatusCode::CONFLICT,
        RejectionReason::CouponInactive
        | RejectionReason::CouponExpired
        | RejectionReason::UsageLimitReached
        | RejectionReason::CouponNotApplicable => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn rejection_response(reason: RejectionReason) -> Response {
    (
        rejection_status(reason),
        Json(CouponRejectionResponse {
            success: false,
            reason,
            message: reason.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "code": "SAVE10",
    "discount": "10",
    "discount_type": "percentage",
    "expiration_date": "2030-01-01T00:00:00Z",
    "max_uses": 100
}))]
pub struct CreateCouponRequest {
    /// Coupon code; stored uppercase
    #[validate(length(min = 1, max = 15))]
    #[schema(example = "SAVE10")]
    pub code: String,
    /// Percentage points or absolute amount, depending on `discount_type`
    pub discount: Decimal,
    pub discount_type: DiscountType,
    /// Must lie in the future
    pub expiration_date: DateTime<Utc>,
    /// Omit for unlimited redemptions
    #[validate(range(min = 1))]
    pub max_uses: Option<i32>,
    /// Defaults to true
    pub is_active: Option<bool>,
    #[serde(default)]
    pub applicable_products: Vec<Uuid>,
    #[serde(default)]
    pub applicable_categories: Vec<Uuid>,
}

impl From<CreateCouponRequest> for NewCoupon {
    fn from(request: CreateCouponRequest) -> Self {
        Self {
            code: request.code,
            discount: request.discount,
            discount_type: request.discount_type,
            expiration_date: request.expiration_date,
            max_uses: request.max_uses,
            is_active: request.is_active.unwrap_or(true),
            applicable_products: ReferenceSet::new(request.applicable_products),
            applicable_categories: ReferenceSet::new(request.applicable_categories),
        }
    }
}

/// Partial update; omitted fields are left as they are.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "discount": "15",
    "max_uses": null
}))]
pub struct UpdateCouponRequest {
    #[validate(length(min = 1, max = 15))]
    pub code: Option<String>,
    pub discount: Option<Decimal>,
    pub discount_type: Option<DiscountType>,
    pub expiration_date: Option<DateTime<Utc>>,
    /// `null` removes the usage cap
    #[serde(default, deserialize_with = "deserialize_some")]
    #[schema(value_type = Option<i32>)]
    pub max_uses: Option<Option<i32>>,
    /// Corrective edit of the redemption counter
    #[validate(range(min = 0))]
    pub used_count: Option<i32>,
    pub is_active: Option<bool>,
    pub applicable_products: Option<Vec<Uuid>>,
    pub applicable_categories: Option<Vec<Uuid>>,
}

impl From<UpdateCouponRequest> for CouponPatch {
    fn from(request: UpdateCouponRequest) -> Self {
        Self {
            code: request.code,
            discount: request.discount,
            discount_type: request.discount_type,
            expiration_date: request.expiration_date,
            max_uses: request.max_uses,
            used_count: request.used_count,
            is_active: request.is_active,
            applicable_products: request.applicable_products.map(ReferenceSet::new),
            applicable_categories: request.applicable_categories.map(ReferenceSet::new),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CouponResponse {
    pub id: Uuid,
    #[schema(example = "SAVE10")]
    pub code: String,
    pub discount: Decimal,
    pub discount_type: DiscountType,
    pub expiration_date: DateTime<Utc>,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    /// `None` when unlimited
    pub remaining_uses: Option<i32>,
    pub is_active: bool,
    pub applicable_products: Vec<Uuid>,
    pub applicable_categories: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CouponModel> for CouponResponse {
    fn from(model: CouponModel) -> Self {
        Self {
            remaining_uses: model.remaining_uses(),
            id: model.id,
            code: model.code,
            discount: model.discount,
            discount_type: model.discount_type,
            expiration_date: model.expiration_date,
            max_uses: model.max_uses,
            used_count: model.used_count,
            is_active: model.is_active,
            applicable_products: model.applicable_products.iter().copied().collect(),
            applicable_categories: model.applicable_categories.iter().copied().collect(),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CouponListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    /// Only active (true) or inactive (false) coupons
    pub is_active: Option<bool>,
    /// Code substring, case-insensitive
    pub search: Option<String>,
}

/// Coupon routes, mounted under `/api/v1`
pub fn coupon_routes() -> Router<AppState> {
    Router::new()
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route("/coupons/apply", post(apply_coupon))
        .route(
            "/coupons/:id",
            get(get_coupon).put(update_coupon).delete(delete_coupon),
        )
        .route("/coupons/:id/activate", post(activate_coupon))
        .route("/coupons/:id/deactivate", post(deactivate_coupon))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/apply",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon applied", body = ApplyCouponResponse),
        (status = 400, description = "Invalid order total", body = CouponRejectionResponse),
        (status = 404, description = "Coupon not found", body = CouponRejectionResponse),
        (status = 409, description = "Concurrent redemptions exhausted the retry bound", body = CouponRejectionResponse),
        (status = 422, description = "Coupon inactive, expired, exhausted or not applicable", body = CouponRejectionResponse),
        (status = 503, description = "Redemption disabled", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let order_total = match order_total_from_f64(payload.order_total) {
        Ok(total) => total,
        Err(reason) => return Ok(rejection_response(reason)),
    };
    let scope = payload.scope();

    let outcome = state
        .services
        .coupons
        .apply_coupon(&payload.code, order_total, scope.as_ref())
        .await?;

    Ok(match outcome {
        RedemptionOutcome::Applied {
            discount_amount,
            coupon,
        } => Json(ApplyCouponResponse {
            success: true,
            discount_amount,
            coupon_id: coupon.id,
            used_count: coupon.used_count,
        })
        .into_response(),
        RedemptionOutcome::Rejected(reason) => rejection_response(reason),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    params(CouponListQuery),
    responses(
        (status = 200, description = "Coupons listed", body = ApiResponse<PaginatedResponse<CouponResponse>>)
    ),
    tag = "coupons"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(query): Query<CouponListQuery>,
) -> ApiResult<PaginatedResponse<CouponResponse>> {
    let (page, per_page) = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    }
    .normalized();
    let filter = CouponFilter {
        is_active: query.is_active,
        search: query.search,
    };

    let (coupons, total) = state
        .services
        .coupons
        .list_coupons(filter, page, per_page)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        coupons.into_iter().map(CouponResponse::from).collect(),
        total,
        page,
        per_page,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/coupons/:id",
    params(
        ("id" = Uuid, Path, description = "Coupon ID")
    ),
    responses(
        (status = 200, description = "Coupon fetched", body = ApiResponse<CouponResponse>),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CouponResponse> {
    let coupon = state.services.coupons.get_coupon(id).await?;
    Ok(Json(ApiResponse::success(coupon.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = CreateCouponRequest,
    params(
        ("x-user-id" = Option<String>, Header, description = "Acting administrator")
    ),
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<CouponResponse>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already in use", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateCouponRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let coupon = state
        .services
        .coupons
        .create_coupon(payload.into(), actor.into_inner())
        .await?;

    Ok(created_response(ApiResponse::success(CouponResponse::from(
        coupon,
    ))))
}

#[utoipa::path(
    put,
    path = "/api/v1/coupons/:id",
    request_body = UpdateCouponRequest,
    params(
        ("id" = Uuid, Path, description = "Coupon ID"),
        ("x-user-id" = Option<String>, Header, description = "Acting administrator")
    ),
    responses(
        (status = 200, description = "Coupon updated", body = ApiResponse<CouponResponse>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already in use", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<UpdateCouponRequest>,
) -> Result<Json<ApiResponse<CouponResponse>>, ApiError> {
    validate_input(&payload)?;

    let coupon = state
        .services
        .coupons
        .update_coupon(id, payload.into(), actor.into_inner())
        .await?;

    Ok(Json(ApiResponse::success(coupon.into())))
}

async fn set_active(
    state: &AppState,
    id: Uuid,
    active: bool,
    actor: Actor,
) -> Result<CouponResponse, ServiceError> {
    let coupon = state
        .services
        .coupons
        .set_active(id, active, actor.into_inner())
        .await?;
    Ok(coupon.into())
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/:id/activate",
    params(
        ("id" = Uuid, Path, description = "Coupon ID"),
        ("x-user-id" = Option<String>, Header, description = "Acting administrator")
    ),
    responses(
        (status = 200, description = "Coupon activated", body = ApiResponse<CouponResponse>),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn activate_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> ApiResult<CouponResponse> {
    Ok(Json(ApiResponse::success(
        set_active(&state, id, true, actor).await?,
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/:id/deactivate",
    params(
        ("id" = Uuid, Path, description = "Coupon ID"),
        ("x-user-id" = Option<String>, Header, description = "Acting administrator")
    ),
    responses(
        (status = 200, description = "Coupon deactivated", body = ApiResponse<CouponResponse>),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn deactivate_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> ApiResult<CouponResponse> {
    Ok(Json(ApiResponse::success(
        set_active(&state, id, false, actor).await?,
    )))
}

#[utoipa::path(
    delete,
    path = "/api/v1/coupons/:id",
    params(
        ("id" = Uuid, Path, description = "Coupon ID"),
        ("x-user-id" = Option<String>, Header, description = "Acting administrator")
    ),
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Response, ApiError> {
    state
        .services
        .coupons
        .delete_coupon(id, actor.into_inner())
        .await?;
    Ok(no_content_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejection_status_mapping() {
        assert_eq!(
            rejection_status(RejectionReason::CouponNotFound),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            rejection_status(RejectionReason::InvalidOrderTotal),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            rejection_status(RejectionReason::ConcurrencyConflict),
            StatusCode::CONFLICT
        );
        for reason in [
            RejectionReason::CouponInactive,
            RejectionReason::CouponExpired,
            RejectionReason::UsageLimitReached,
            RejectionReason::CouponNotApplicable,
        ] {
            assert_eq!(rejection_status(reason), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    #[test]
    fn apply_request_uses_camel_case_and_optional_scope() {
        let request: ApplyCouponRequest = serde_json::from_value(json!({
            "code": "save10",
            "orderTotal": 200
        }))
        .unwrap();
        assert_eq!(request.order_total, 200.0);
        assert!(request.scope().is_none());

        let product = Uuid::new_v4();
        let request: ApplyCouponRequest = serde_json::from_value(json!({
            "code": "save10",
            "orderTotal": 50.5,
            "productIds": [product]
        }))
        .unwrap();
        assert_eq!(
            request.scope(),
            Some(OrderScope::new(vec![product], vec![]))
        );
    }

    #[test]
    fn update_request_distinguishes_null_from_missing() {
        let lift: UpdateCouponRequest =
            serde_json::from_value(json!({ "max_uses": null })).unwrap();
        assert_eq!(lift.max_uses, Some(None));

        let untouched: UpdateCouponRequest =
            serde_json::from_value(json!({ "discount": "5" })).unwrap();
        assert_eq!(untouched.max_uses, None);

        let patch = CouponPatch::from(lift);
        assert_eq!(patch.max_uses, Some(None));
        assert_eq!(patch.changed_fields(), vec!["max_uses"]);
    }

    #[test]
    fn create_request_validation() {
        let request: CreateCouponRequest = serde_json::from_value(json!({
            "code": "TOO-LONG-CODE-1234",
            "discount": "5",
            "discount_type": "fixed",
            "expiration_date": "2099-01-01T00:00:00Z",
            "max_uses": 0
        }))
        .unwrap();

        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("code"));
        assert!(fields.contains_key("max_uses"));
    }

    #[test]
    fn rejection_body_shape() {
        let body = serde_json::to_value(CouponRejectionResponse {
            success: false,
            reason: RejectionReason::CouponExpired,
            message: RejectionReason::CouponExpired.to_string(),
        })
        .unwrap();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["reason"], json!("CouponExpired"));
    }
}
