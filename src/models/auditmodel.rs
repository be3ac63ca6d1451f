// models/auditmodel.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: String,
    pub order_id: Option<Uuid>,
    pub related_user_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub user_id: Uuid,
    pub event_type: String,
    pub order_id: Option<Uuid>,
    pub related_user_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub description: String,
}
