// db/auditdb.rs
use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::PgStoreTx;
use crate::models::auditmodel::{AuditLog, NewAuditLog};

#[async_trait]
pub trait AuditExt: Send {
    async fn insert_audit_log(&mut self, entry: &NewAuditLog) -> Result<AuditLog, Error>;

    async fn get_audit_logs_for_order(
        &mut self,
        order_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, Error>;
}

#[async_trait]
impl AuditExt for PgStoreTx {
    async fn insert_audit_log(&mut self, entry: &NewAuditLog) -> Result<AuditLog, Error> {
        sqlx::query_as::<_, AuditLog>(
            r#"
            INSERT INTO audit_logs
            (user_id, event_type, order_id, related_user_id, metadata, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING id, user_id, event_type, order_id, related_user_id, metadata, description, created_at
            "#
        )
        .bind(entry.user_id)
        .bind(&entry.event_type)
        .bind(entry.order_id)
        .bind(entry.related_user_id)
        .bind(&entry.metadata)
        .bind(&entry.description)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn get_audit_logs_for_order(
        &mut self,
        order_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, Error> {
        sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT id, user_id, event_type, order_id, related_user_id, metadata, description, created_at
            FROM audit_logs
            WHERE order_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        )
        .bind(order_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
    }
}
