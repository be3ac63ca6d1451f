// service/repair_service.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use validator::Validate;

use crate::{
    db::{DispatchExt, LedgerStore, SettlementExt, StoreTx, WalletExt},
    dtos::settlementdtos::{RepairRequestDto, RepairResponseDto},
    models::{
        dispatchmodel::OrderSnapshot,
        settlementmodel::{SettlementComputation, SettlementPreview, SettlementRecord},
        walletmodels::{BalanceDelta, SourceType},
    },
    service::{
        audit_service::AuditService,
        billing::compute_settlements,
        error::ServiceError,
        freeze_window::FreezePolicy,
        settlement_service::sync_records,
        settlement_writer::write_settlements,
    },
};

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub order_id: Uuid,
    pub batch_id: Uuid,
    pub before: Vec<SettlementRecord>,
    pub after: Vec<SettlementRecord>,
    /// Per-user increments that undid the previous wallet impact.
    pub rollback: BTreeMap<Uuid, BalanceDelta>,
}

/// Recomputes an order from scratch and replaces its settlements and their
/// wallet effects in one transaction.
#[derive(Debug, Clone)]
pub struct RepairService {
    store: Arc<dyn LedgerStore>,
    freeze: FreezePolicy,
    preview_ttl: Duration,
}

impl RepairService {
    pub fn new(store: Arc<dyn LedgerStore>, freeze: FreezePolicy, preview_ttl: Duration) -> Self {
        Self {
            store,
            freeze,
            preview_ttl,
        }
    }

    /// Dry run. The result is stored with an expiry and is what `apply_repair` commits to.
    pub async fn preview_repair(
        &self,
        order_id: Uuid,
        operator_id: Uuid,
    ) -> Result<SettlementPreview, ServiceError> {
        let mut tx = self.store.begin().await?;
        let snapshot = load_repairable(tx.as_mut(), order_id).await?;
        let computation = compute_settlements(&snapshot)?;

        let computed_at = Utc::now();
        let preview = SettlementPreview {
            order_id,
            computation: Json(computation),
            computed_at,
            expires_at: computed_at + self.preview_ttl,
        };
        tx.save_preview(&preview).await?;
        AuditService::log_settlement_preview(tx.as_mut(), operator_id, &preview.computation.0).await?;
        tx.commit().await?;

        tracing::info!(
            "previewed repair of order {}: {} rows, expires {}",
            order_id,
            preview.computation.rows.len(),
            preview.expires_at
        );

        Ok(preview)
    }

    /// Applies the stored preview. If the order changed since the preview was
    /// taken the recomputation differs and the caller must preview again.
    pub async fn apply_repair(
        &self,
        order_id: Uuid,
        operator_id: Uuid,
    ) -> Result<RepairOutcome, ServiceError> {
        let mut tx = self.store.begin().await?;

        let preview = tx
            .get_preview(order_id)
            .await?
            .ok_or(ServiceError::PreviewNotFound(order_id))?;
        if preview.is_expired(Utc::now()) {
            return Err(ServiceError::Conflict(format!(
                "settlement preview for order {} expired at {}",
                order_id, preview.expires_at
            )));
        }

        let snapshot = load_repairable(tx.as_mut(), order_id).await?;
        let computation = compute_settlements(&snapshot)?;
        if computation != preview.computation.0 {
            return Err(ServiceError::Conflict(format!(
                "order {} changed since its settlement preview",
                order_id
            )));
        }

        let outcome = self
            .rebuild(tx.as_mut(), &snapshot, &computation, operator_id)
            .await?;
        tx.delete_preview(order_id).await?;
        tx.commit().await?;

        tracing::info!(
            "repaired order {} in batch {}: {} rows replaced by {}, {} wallets rolled back",
            order_id,
            outcome.batch_id,
            outcome.before.len(),
            outcome.after.len(),
            outcome.rollback.len()
        );

        Ok(outcome)
    }

    pub async fn repair_order(
        &self,
        order_id: Uuid,
        operator_id: Uuid,
    ) -> Result<RepairOutcome, ServiceError> {
        self.preview_repair(order_id, operator_id).await?;
        self.apply_repair(order_id, operator_id).await
    }

    /// Operator entry point: validates the request and runs a full repair.
    pub async fn handle_repair_request(
        &self,
        operator_id: Uuid,
        dto: RepairRequestDto,
    ) -> Result<RepairResponseDto, ServiceError> {
        dto.validate()?;
        tracing::info!(
            "operator {} requested repair of order {}: {}",
            operator_id,
            dto.order_id,
            dto.reason
        );

        let outcome = self.repair_order(dto.order_id, operator_id).await?;
        Ok(RepairResponseDto::from_outcome(&outcome))
    }

    async fn rebuild(
        &self,
        tx: &mut dyn StoreTx,
        snapshot: &OrderSnapshot,
        computation: &SettlementComputation,
        operator_id: Uuid,
    ) -> Result<RepairOutcome, ServiceError> {
        let order_id = snapshot.order.id;
        let unlock_at = self.freeze.unlock_at_for_order(snapshot)?;

        let before = tx.get_settlements_for_order(order_id).await?;
        let old_ids: Vec<Uuid> = before.iter().map(|r| r.id).collect();

        // Everything settlement-sourced on the order, including rows whose
        // settlement record no longer exists.
        let mut earnings = tx.get_settlement_transactions_for_order(order_id).await?;
        for transaction in tx
            .get_transactions_by_sources(SourceType::Settlement, &old_ids)
            .await?
        {
            if !earnings.iter().any(|t| t.id == transaction.id) {
                earnings.push(transaction);
            }
        }
        let earning_ids: Vec<Uuid> = earnings.iter().map(|t| t.id).collect();
        let releases = tx
            .get_transactions_by_sources(SourceType::UnlockRelease, &earning_ids)
            .await?;

        for orphan in earnings.iter().filter(|t| !old_ids.contains(&t.source_id)) {
            tracing::warn!(
                "repair of order {} removes transaction {} of missing settlement {}",
                order_id,
                orphan.id,
                orphan.source_id
            );
        }

        // Undo exactly what the old rows contributed, never what the balance says.
        let mut rollback: BTreeMap<Uuid, BalanceDelta> = BTreeMap::new();
        for transaction in earnings.iter().chain(releases.iter()) {
            if !transaction.is_live() {
                continue;
            }
            let undo = -transaction.signed_effect();
            let entry = rollback
                .entry(transaction.user_id)
                .or_insert_with(BalanceDelta::zero);
            *entry = entry.clone() + undo;
        }
        rollback.retain(|_, delta| !delta.is_zero());

        for (user_id, delta) in &rollback {
            tx.apply_balance_delta(*user_id, delta).await?;
        }

        let removed_ids: Vec<Uuid> = earning_ids
            .iter()
            .copied()
            .chain(releases.iter().map(|t| t.id))
            .collect();
        tx.delete_holds_for_transactions(&earning_ids).await?;
        tx.delete_transactions(&removed_ids).await?;
        tx.delete_settlements(&old_ids).await?;

        let batch_id = Uuid::new_v4();
        let records = write_settlements(tx, computation, batch_id, true).await?;
        let after = sync_records(tx, records, unlock_at).await?;

        let new_ids: Vec<Uuid> = after.iter().map(|r| r.id).collect();
        let remaining = tx.get_settlement_transactions_for_order(order_id).await?;
        if let Some(orphan) = remaining
            .iter()
            .find(|t| t.is_live() && !new_ids.contains(&t.source_id))
        {
            return Err(ServiceError::consistency(format!(
                "transaction {} of order {} references settlement {} outside the rebuilt rows",
                orphan.id, order_id, orphan.source_id
            )));
        }

        AuditService::log_settlement_repair(
            tx,
            operator_id,
            order_id,
            batch_id,
            &before,
            &after,
            &rollback,
        )
        .await?;

        Ok(RepairOutcome {
            order_id,
            batch_id,
            before,
            after,
            rollback,
        })
    }
}

async fn load_repairable(tx: &mut dyn StoreTx, order_id: Uuid) -> Result<OrderSnapshot, ServiceError> {
    let settling = tx.count_settling_rounds(order_id).await?;
    if settling > 0 {
        return Err(ServiceError::Conflict(format!(
            "order {} has {} round(s) being settled",
            order_id, settling
        )));
    }

    tx.load_order_snapshot(order_id)
        .await?
        .ok_or(ServiceError::OrderNotFound(order_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryState, MemoryStore};
    use crate::dtos::settlementdtos::ManualAdjustmentDto;
    use crate::models::dispatchmodel::{BillingPolicy, RoundStatus};
    use crate::models::settlementmodel::SettlementType;
    use crate::service::error::ErrorKind;
    use crate::service::fixtures::{at, d, OrderBuilder};
    use crate::service::settlement_service::SettlementService;
    use crate::service::unlock_sweeper::UnlockSweeper;
    use crate::service::wallet_ledger::WalletLedger;

    struct Fixture {
        store: MemoryStore,
        settlement: SettlementService,
        repair: RepairService,
        order_id: Uuid,
        first: Uuid,
        workers: Vec<Uuid>,
    }

    async fn settled_order() -> Fixture {
        let store = MemoryStore::new();
        let dispatcher = Uuid::new_v4();
        let mut builder = OrderBuilder::new(BillingPolicy::DurationBased, "1000.00")
            .unit_price("100")
            .dispatcher(dispatcher);
        let first = builder.round(RoundStatus::Accepted, 0, 0);
        let second = builder.round(RoundStatus::Accepted, 150, 0);
        let workers = vec![Uuid::new_v4(), Uuid::new_v4(), dispatcher];
        builder.participant(first, workers[0], 0);
        builder.participant(second, workers[1], 150);
        builder.seed(&store).await;

        let shared: Arc<dyn LedgerStore> = Arc::new(store.clone());
        let settlement = SettlementService::new(shared.clone(), FreezePolicy::default());
        let repair = RepairService::new(shared, FreezePolicy::default(), Duration::minutes(15));

        settlement.settle_round(first, RoundStatus::Archived, at(150)).await.unwrap();
        settlement.settle_round(second, RoundStatus::Completed, at(200)).await.unwrap();

        Fixture {
            store,
            settlement,
            repair,
            order_id: builder.order_id(),
            first,
            workers,
        }
    }

    /// Amounts per (worker, type) plus balances, ignoring generated ids.
    fn ledger_view(state: &MemoryState, workers: &[Uuid]) -> Vec<String> {
        let mut view: Vec<String> = state
            .settlements
            .iter()
            .map(|r| {
                format!(
                    "{}:{}:{}:{:?}",
                    r.worker_id,
                    r.settlement_type.to_str(),
                    r.final_earnings,
                    r.payment_status
                )
            })
            .collect();
        for worker in workers {
            let account = &state.accounts[worker];
            view.push(format!(
                "{}:{}:{}",
                worker, account.available_balance, account.frozen_balance
            ));
        }
        view.sort();
        view
    }

    async fn assert_all_reconciled(store: &MemoryStore, workers: &[Uuid]) {
        let mut tx = store.begin().await.unwrap();
        for worker in workers {
            let report = WalletLedger::reconcile_in(tx.as_mut(), *worker).await.unwrap();
            assert!(report.is_balanced(), "{} drifted by {:?}", worker, report.drift());
        }
    }

    #[tokio::test]
    async fn test_repair_twice_converges() {
        let f = settled_order().await;
        let before = ledger_view(&f.store.snapshot().await, &f.workers);

        f.repair.repair_order(f.order_id, Uuid::new_v4()).await.unwrap();
        let once = ledger_view(&f.store.snapshot().await, &f.workers);
        f.repair.repair_order(f.order_id, Uuid::new_v4()).await.unwrap();
        let twice = ledger_view(&f.store.snapshot().await, &f.workers);

        assert_eq!(before, once);
        assert_eq!(once, twice);
        assert_all_reconciled(&f.store, &f.workers).await;

        let state = f.store.snapshot().await;
        assert_eq!(state.settlements.len(), 3);
        assert_eq!(state.transactions.len(), 3);
        assert_eq!(state.holds.len(), 3);
        assert!(state
            .audit_logs
            .iter()
            .any(|l| l.event_type == "settlement_repair"));
    }

    #[tokio::test]
    async fn test_repair_fixes_wrong_rows_and_drops_adjustments() {
        let f = settled_order().await;
        let worker = f.workers[1];
        let record = f
            .store
            .snapshot()
            .await
            .settlements
            .into_iter()
            .find(|r| r.worker_id == worker)
            .unwrap();
        f.settlement
            .adjust_settlement(
                record.id,
                Uuid::new_v4(),
                ManualAdjustmentDto {
                    adjustment: 25.0,
                    reason: "bonus".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(f.store.snapshot().await.accounts[&worker].frozen_balance, d("775.00"));

        let outcome = f.repair.repair_order(f.order_id, Uuid::new_v4()).await.unwrap();
        assert_eq!(outcome.rollback[&worker], BalanceDelta::frozen(d("-775.00")));

        let state = f.store.snapshot().await;
        assert_eq!(state.accounts[&worker].frozen_balance, d("750.00"));
        let rebuilt = state
            .settlements
            .iter()
            .find(|r| r.worker_id == worker)
            .unwrap();
        assert_eq!(rebuilt.manual_adjustment, d("0"));
        assert_ne!(rebuilt.id, record.id);
        assert_eq!(rebuilt.batch_id, outcome.batch_id);
        assert_all_reconciled(&f.store, &f.workers).await;
    }

    #[tokio::test]
    async fn test_repair_after_release_rolls_back_available() {
        let f = settled_order().await;
        let sweeper = UnlockSweeper::new(Arc::new(f.store.clone()), 50);
        let summary = sweeper
            .release_due_holds(at(200) + Duration::days(8))
            .await
            .unwrap();
        assert_eq!(summary.released, 3);

        let outcome = f.repair.repair_order(f.order_id, Uuid::new_v4()).await.unwrap();
        assert_eq!(outcome.rollback[&f.workers[0]], BalanceDelta::available(d("-250.00")));

        let state = f.store.snapshot().await;
        // release memos are gone with their earnings
        assert_eq!(state.transactions.len(), 3);
        assert_eq!(state.accounts[&f.workers[0]].available_balance, d("0"));
        assert_eq!(state.accounts[&f.workers[0]].frozen_balance, d("250.00"));
        assert_all_reconciled(&f.store, &f.workers).await;
    }

    #[tokio::test]
    async fn test_repair_refused_while_a_round_is_settling() {
        let f = settled_order().await;
        f.store
            .seed(|state| {
                state.rounds.get_mut(&f.first).unwrap().status = RoundStatus::Settling;
            })
            .await;

        let err = f.repair.repair_order(f.order_id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resubmit);
    }

    #[tokio::test]
    async fn test_stale_preview_is_rejected() {
        let f = settled_order().await;
        f.repair.preview_repair(f.order_id, Uuid::new_v4()).await.unwrap();

        // a late deduction changes the billable time of round one
        f.store
            .seed(|state| state.rounds.get_mut(&f.first).unwrap().deduction_minutes = 60)
            .await;

        let err = f.repair.apply_repair(f.order_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let outcome = f.repair.repair_order(f.order_id, Uuid::new_v4()).await.unwrap();
        let first_row = outcome
            .after
            .iter()
            .find(|r| r.round_id == f.first && r.settlement_type == SettlementType::BaseEarning)
            .unwrap();
        assert_eq!(first_row.final_earnings, d("150.00"));
        assert_all_reconciled(&f.store, &f.workers).await;
    }

    #[tokio::test]
    async fn test_expired_or_missing_preview() {
        let f = settled_order().await;
        let err = f.repair.apply_repair(f.order_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreviewNotFound(_)));

        f.repair.preview_repair(f.order_id, Uuid::new_v4()).await.unwrap();
        f.store
            .seed(|state| {
                let preview = state.previews.get_mut(&f.order_id).unwrap();
                preview.expires_at = Utc::now() - Duration::seconds(1);
            })
            .await;
        let err = f.repair.apply_repair(f.order_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_repair_request_reports_replaced_rows() {
        let f = settled_order().await;
        let response = f
            .repair
            .handle_repair_request(
                Uuid::new_v4(),
                RepairRequestDto {
                    order_id: f.order_id,
                    reason: "duplicate rows after migration".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(response.replaced_rows, 3);
        assert_eq!(response.records.len(), 3);
        assert_eq!(response.rollback_deltas.len(), 3);
        let total: f64 = response.records.iter().map(|r| r.final_earnings).sum();
        assert!((total - 1010.0).abs() < 1e-9);

        let err = f
            .repair
            .handle_repair_request(
                Uuid::new_v4(),
                RepairRequestDto {
                    order_id: f.order_id,
                    reason: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
    }

    #[tokio::test]
    async fn test_transaction_of_missing_settlement_is_rolled_back() {
        let f = settled_order().await;
        let worker = f.workers[0];
        f.store
            .seed(|state| state.settlements.retain(|r| r.worker_id != worker))
            .await;
        assert_eq!(f.store.snapshot().await.accounts[&worker].frozen_balance, d("250.00"));

        let outcome = f.repair.repair_order(f.order_id, Uuid::new_v4()).await.unwrap();
        assert_eq!(outcome.before.len(), 2);
        assert_eq!(outcome.rollback[&worker], BalanceDelta::frozen(d("-250.00")));

        let state = f.store.snapshot().await;
        assert_eq!(state.accounts[&worker].frozen_balance, d("250.00"));
        let live: Vec<_> = state
            .transactions
            .iter()
            .filter(|t| t.user_id == worker && t.is_live())
            .collect();
        assert_eq!(live.len(), 1);
        assert!(state.settlements.iter().any(|r| r.id == live[0].source_id));
        assert_eq!(state.holds.iter().filter(|h| h.user_id == worker).count(), 1);
        assert_all_reconciled(&f.store, &f.workers).await;
    }
}
