// service/audit_service.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::{AuditExt, LedgerStore, StoreTx},
    models::{
        auditmodel::{AuditLog, NewAuditLog},
        dispatchmodel::{DispatchRound, IncomeAllocation},
        settlementmodel::{SettlementComputation, SettlementRecord},
        walletmodels::BalanceDelta,
    },
    service::error::ServiceError,
};

/// Actor recorded for writes the engine makes on its own behalf.
pub const SYSTEM_ACTOR: Uuid = Uuid::nil();

#[derive(Debug, Clone)]
pub struct AuditService {
    store: Arc<dyn LedgerStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn log_round_settlement(
        tx: &mut dyn StoreTx,
        round: &DispatchRound,
        batch_id: Uuid,
        records: &[SettlementRecord],
    ) -> Result<(), ServiceError> {
        let total: bigdecimal::BigDecimal = records.iter().map(|r| &r.final_earnings).sum();
        Self::log_audit_event(
            tx,
            SYSTEM_ACTOR,
            "round_settlement".to_string(),
            Some(round.order_id),
            None,
            Some(serde_json::json!({
                "round_id": round.id,
                "round_status": round.status.to_str(),
                "batch_id": batch_id,
                "rows": records.len(),
                "total_final_earnings": total,
            })),
            format!("Round {} settled as {}", round.sequence, round.status.to_str()),
        ).await
    }

    pub async fn log_settlement_repair(
        tx: &mut dyn StoreTx,
        operator_id: Uuid,
        order_id: Uuid,
        batch_id: Uuid,
        before: &[SettlementRecord],
        after: &[SettlementRecord],
        rollback: &BTreeMap<Uuid, BalanceDelta>,
    ) -> Result<(), ServiceError> {
        Self::log_audit_event(
            tx,
            operator_id,
            "settlement_repair".to_string(),
            Some(order_id),
            None,
            Some(serde_json::json!({
                "batch_id": batch_id,
                "before": before,
                "after": after,
                "rollback_deltas": rollback,
            })),
            format!(
                "Settlements of order rebuilt: {} rows replaced by {}",
                before.len(),
                after.len()
            ),
        ).await
    }

    pub async fn log_manual_adjustment(
        tx: &mut dyn StoreTx,
        operator_id: Uuid,
        before: &SettlementRecord,
        after: &SettlementRecord,
        reason: &str,
    ) -> Result<(), ServiceError> {
        Self::log_audit_event(
            tx,
            operator_id,
            "settlement_adjustment".to_string(),
            Some(after.order_id),
            Some(after.worker_id),
            Some(serde_json::json!({
                "settlement_id": after.id,
                "previous_adjustment": before.manual_adjustment,
                "adjustment": after.manual_adjustment,
                "final_earnings": after.final_earnings,
                "reason": reason,
            })),
            "Manual settlement adjustment".to_string(),
        ).await
    }

    pub async fn log_income_allocation(
        tx: &mut dyn StoreTx,
        operator_id: Uuid,
        allocation: &IncomeAllocation,
    ) -> Result<(), ServiceError> {
        Self::log_audit_event(
            tx,
            operator_id,
            "income_allocation".to_string(),
            Some(allocation.order_id),
            None,
            Some(serde_json::json!({
                "round_id": allocation.round_id,
                "amount": allocation.amount,
            })),
            "Round income allocation recorded".to_string(),
        ).await
    }

    pub async fn log_settlement_preview(
        tx: &mut dyn StoreTx,
        operator_id: Uuid,
        computation: &SettlementComputation,
    ) -> Result<(), ServiceError> {
        Self::log_audit_event(
            tx,
            operator_id,
            "settlement_preview".to_string(),
            Some(computation.order_id),
            None,
            Some(serde_json::json!({
                "rows": computation.rows.len(),
                "pool": computation.pool,
            })),
            "Settlement repair previewed".to_string(),
        ).await
    }

    async fn log_audit_event(
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        event_type: String,
        order_id: Option<Uuid>,
        related_user_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
        description: String,
    ) -> Result<(), ServiceError> {
        tx.insert_audit_log(&NewAuditLog {
            user_id,
            event_type,
            order_id,
            related_user_id,
            metadata,
            description,
        })
        .await?;

        Ok(())
    }

    pub async fn get_audit_logs_for_order(
        &self,
        order_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, ServiceError> {
        let mut tx = self.store.begin().await?;
        let logs = tx.get_audit_logs_for_order(order_id, limit, offset).await?;
        Ok(logs)
    }
}
