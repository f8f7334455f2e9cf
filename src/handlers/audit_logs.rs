use crate::{
    entities::audit_log::Model as AuditLogModel,
    handlers::common::{default_page, default_per_page, PaginationParams},
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    /// Restrict to one entity, e.g. a coupon id
    pub entity_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditLogEntryResponse {
    pub id: Uuid,
    #[schema(example = "coupon.created")]
    pub action: String,
    #[schema(example = "coupon")]
    pub entity_type: String,
    pub entity_id: Uuid,
    pub performed_by: Option<String>,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLogModel> for AuditLogEntryResponse {
    fn from(model: AuditLogModel) -> Self {
        Self {
            id: model.id,
            action: model.action,
            entity_type: model.entity_type,
            entity_id: model.entity_id,
            performed_by: model.performed_by,
            details: model.details,
            created_at: model.created_at,
        }
    }
}

pub fn audit_log_routes() -> Router<AppState> {
    Router::new().route("/audit-logs", get(list_audit_logs))
}

#[utoipa::path(
    get,
    path = "/api/v1/audit-logs",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Audit entries listed", body = ApiResponse<PaginatedResponse<AuditLogEntryResponse>>)
    ),
    tag = "audit"
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> ApiResult<PaginatedResponse<AuditLogEntryResponse>> {
    let (page, per_page) = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    }
    .normalized();

    let (entries, total) = state
        .services
        .audit
        .list_entries(query.entity_id, page, per_page)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        entries
            .into_iter()
            .map(AuditLogEntryResponse::from)
            .collect(),
        total,
        page,
        per_page,
    ))))
}
