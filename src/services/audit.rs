use crate::{
    entities::audit_log::{self, Entity as AuditLog, Model as AuditLogModel},
    errors::ServiceError,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

/// Entity type recorded for coupon mutations
pub const COUPON_ENTITY: &str = "coupon";

/// One administrative mutation to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AuditEntry {
    #[validate(length(min = 1, max = 64))]
    pub action: String,
    #[validate(length(min = 1, max = 64))]
    pub entity_type: String,
    pub entity_id: Uuid,
    pub performed_by: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn coupon(
        action: &str,
        coupon_id: Uuid,
        performed_by: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            action: action.to_string(),
            entity_type: COUPON_ENTITY.to_string(),
            entity_id: coupon_id,
            performed_by,
            details,
        }
    }
}

/// Destination for audit entries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), ServiceError>;
}

/// Audit sink backed by the `audit_logs` table
#[derive(Clone)]
pub struct AuditLogService {
    db: Arc<DatabaseConnection>,
}

impl AuditLogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists entries newest first, optionally restricted to one entity
    #[instrument(skip(self))]
    pub async fn list_entries(
        &self,
        entity_id: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<AuditLogModel>, u64), ServiceError> {
        let mut query = AuditLog::find();
        if let Some(entity_id) = entity_id {
            query = query.filter(audit_log::Column::EntityId.eq(entity_id));
        }

        let paginator = query
            .order_by_desc(audit_log::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let entries = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((entries, total))
    }
}

#[async_trait]
impl AuditSink for AuditLogService {
    #[instrument(skip(self, entry), fields(action = %entry.action, entity_id = %entry.entity_id))]
    async fn record(&self, entry: AuditEntry) -> Result<(), ServiceError> {
        entry.validate()?;

        let model = audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            action: Set(entry.action),
            entity_type: Set(entry.entity_type),
            entity_id: Set(entry.entity_id),
            performed_by: Set(entry.performed_by),
            details: Set(entry.details),
            created_at: Set(Utc::now()),
        };

        let saved = model.insert(&*self.db).await?;
        debug!(audit_id = %saved.id, "Audit entry recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coupon_entry_uses_coupon_entity_type() {
        let id = Uuid::new_v4();
        let entry = AuditEntry::coupon("coupon.created", id, Some("admin-1".into()), json!({}));

        assert_eq!(entry.entity_type, COUPON_ENTITY);
        assert_eq!(entry.entity_id, id);
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn empty_action_is_invalid() {
        let entry = AuditEntry::coupon("", Uuid::new_v4(), None, json!(null));
        assert!(entry.validate().is_err());
    }
}
