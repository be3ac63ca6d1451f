// service/settlement_service.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{DispatchExt, LedgerStore, SettlementExt, StoreTx},
    dtos::settlementdtos::{IncomeAllocationDto, ManualAdjustmentDto},
    models::{
        dispatchmodel::{DispatchRound, IncomeAllocation, RoundStatus},
        settlementmodel::SettlementRecord,
    },
    service::{
        audit_service::AuditService,
        billing::compute_settlements,
        error::ServiceError,
        freeze_window::FreezePolicy,
        settlement_writer::write_settlements,
        wallet_ledger::WalletLedger,
    },
    utils::decimal::money_from_f64,
};

#[derive(Debug, Clone)]
pub struct RoundSettlement {
    pub round: DispatchRound,
    pub batch_id: Uuid,
    pub records: Vec<SettlementRecord>,
}

#[derive(Debug, Clone)]
pub struct SettlementService {
    store: Arc<dyn LedgerStore>,
    freeze: FreezePolicy,
}

impl SettlementService {
    pub fn new(store: Arc<dyn LedgerStore>, freeze: FreezePolicy) -> Self {
        Self { store, freeze }
    }

    /// Claims the round by moving it from accepted to settling in its own
    /// committed transaction. Losing the race is a conflict, never retried here.
    pub async fn lock_for_settlement(&self, round_id: Uuid) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        let claimed = tx
            .transition_round_status(round_id, RoundStatus::Accepted, RoundStatus::Settling)
            .await?;

        if claimed == 0 {
            return match tx.get_round(round_id).await? {
                None => Err(ServiceError::RoundNotFound(round_id)),
                Some(round) if round.status == RoundStatus::Settling => {
                    Err(ServiceError::RoundLocked(round_id))
                }
                Some(round) => Err(ServiceError::InvalidRoundStatus(round_id, round.status)),
            };
        }

        tx.commit().await?;
        Ok(())
    }

    /// Returns a settling round to accepted. Returns false if it was not settling.
    pub async fn release_settlement_lock(&self, round_id: Uuid) -> Result<bool, ServiceError> {
        let mut tx = self.store.begin().await?;
        let released = tx
            .transition_round_status(round_id, RoundStatus::Settling, RoundStatus::Accepted)
            .await?;
        tx.commit().await?;
        Ok(released > 0)
    }

    /// Archives or completes a round and settles the whole order around it.
    pub async fn settle_round(
        &self,
        round_id: Uuid,
        outcome: RoundStatus,
        at: DateTime<Utc>,
    ) -> Result<RoundSettlement, ServiceError> {
        if !outcome.is_settled() {
            return Err(ServiceError::validation(format!(
                "a round can only be settled as archived or completed, not {}",
                outcome.to_str()
            )));
        }

        self.lock_for_settlement(round_id).await?;

        match self.settle_locked(round_id, outcome, at).await {
            Ok(settlement) => Ok(settlement),
            Err(e) => {
                tracing::warn!("settlement of round {} failed, unlocking: {}", round_id, e);
                if let Err(unlock_err) = self.release_settlement_lock(round_id).await {
                    tracing::error!(
                        "round {} stays settling after failed unlock: {}",
                        round_id,
                        unlock_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn settle_locked(
        &self,
        round_id: Uuid,
        outcome: RoundStatus,
        at: DateTime<Utc>,
    ) -> Result<RoundSettlement, ServiceError> {
        let mut tx = self.store.begin().await?;

        let round = tx.mark_round_settled(round_id, outcome, at).await?;

        // A sibling still settling would be missing from this snapshot.
        let siblings = tx.count_settling_rounds(round.order_id).await?;
        if siblings > 0 {
            return Err(ServiceError::Conflict(format!(
                "order {} has {} other round(s) being settled",
                round.order_id, siblings
            )));
        }

        let snapshot = tx
            .load_order_snapshot(round.order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(round.order_id))?;

        let computation = compute_settlements(&snapshot)?;
        let unlock_at = self.freeze.unlock_at_for_order(&snapshot)?;

        let batch_id = Uuid::new_v4();
        let records = write_settlements(tx.as_mut(), &computation, batch_id, false).await?;
        let records = sync_records(tx.as_mut(), records, unlock_at).await?;

        AuditService::log_round_settlement(tx.as_mut(), &round, batch_id, &records).await?;
        tx.commit().await?;

        tracing::info!(
            "settled round {} of order {} as {} (batch {}, {} rows)",
            round.id,
            round.order_id,
            outcome.to_str(),
            batch_id,
            records.len()
        );

        Ok(RoundSettlement {
            round,
            batch_id,
            records,
        })
    }

    pub async fn adjust_settlement(
        &self,
        settlement_id: Uuid,
        operator_id: Uuid,
        dto: ManualAdjustmentDto,
    ) -> Result<SettlementRecord, ServiceError> {
        dto.validate()?;
        let adjustment = money_from_f64(dto.adjustment)
            .ok_or_else(|| ServiceError::validation("adjustment must be a finite amount"))?;

        let mut tx = self.store.begin().await?;
        let before = tx
            .get_settlement(settlement_id)
            .await?
            .ok_or(ServiceError::SettlementNotFound(settlement_id))?;

        let mut after = tx.set_manual_adjustment(settlement_id, &adjustment).await?;
        let snapshot = tx
            .load_order_snapshot(after.order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(after.order_id))?;
        let unlock_at = self.freeze.unlock_at_for_order(&snapshot)?;

        after.payment_status = WalletLedger::sync_settlement(tx.as_mut(), &after, unlock_at).await?;

        AuditService::log_manual_adjustment(tx.as_mut(), operator_id, &before, &after, &dto.reason)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "settlement {} adjusted by {} to {} (final {})",
            settlement_id,
            operator_id,
            after.manual_adjustment,
            after.final_earnings
        );

        Ok(after)
    }

    pub async fn record_income_allocation(
        &self,
        round_id: Uuid,
        operator_id: Uuid,
        dto: IncomeAllocationDto,
    ) -> Result<IncomeAllocation, ServiceError> {
        dto.validate()?;
        let amount = money_from_f64(dto.amount)
            .ok_or_else(|| ServiceError::validation("amount must be a finite amount"))?;

        let mut tx = self.store.begin().await?;
        if tx.get_round(round_id).await?.is_none() {
            return Err(ServiceError::RoundNotFound(round_id));
        }

        let allocation = tx.upsert_income_allocation(round_id, amount, operator_id).await?;
        AuditService::log_income_allocation(tx.as_mut(), operator_id, &allocation).await?;
        tx.commit().await?;

        Ok(allocation)
    }
}

/// Mirrors every record into the wallet, stamping the resulting payment status.
pub(crate) async fn sync_records(
    tx: &mut dyn StoreTx,
    records: Vec<SettlementRecord>,
    unlock_at: Option<DateTime<Utc>>,
) -> Result<Vec<SettlementRecord>, ServiceError> {
    let mut synced = Vec::with_capacity(records.len());
    for mut record in records {
        record.payment_status = WalletLedger::sync_settlement(tx, &record, unlock_at).await?;
        synced.push(record);
    }
    Ok(synced)
}
