// service/unlock_sweeper.rs
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{LedgerStore, SettlementExt, StoreTx, WalletExt},
    models::{
        settlementmodel::PaymentStatus,
        walletmodels::*,
    },
    service::error::ServiceError,
    utils::decimal::zero_money,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub batches: usize,
    pub released: usize,
    pub amount: BigDecimal,
    /// Holds left frozen because releasing them failed.
    pub failed: Vec<Uuid>,
}

const HOLD_SAVEPOINT: &str = "hold_release";

#[derive(Debug, Clone)]
pub struct UnlockSweeper {
    store: Arc<dyn LedgerStore>,
    batch_size: i64,
}

impl UnlockSweeper {
    pub fn new(store: Arc<dyn LedgerStore>, batch_size: i64) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Releases every hold due at `now`, one committed transaction per batch,
    /// until a batch comes back short. Each hold is released under its own
    /// savepoint; a hold that fails is rolled back, reported in `failed` and
    /// not claimed again during this sweep.
    pub async fn release_due_holds(&self, now: DateTime<Utc>) -> Result<SweepSummary, ServiceError> {
        let mut summary = SweepSummary {
            amount: zero_money(),
            ..SweepSummary::default()
        };

        loop {
            let mut tx = self.store.begin().await?;
            let holds = tx
                .claim_due_holds(now, self.batch_size, &summary.failed)
                .await?;
            let claimed = holds.len();

            for hold in &holds {
                tx.savepoint(HOLD_SAVEPOINT).await?;
                match release_hold(tx.as_mut(), hold, now).await {
                    Ok(()) => {
                        tx.release_savepoint(HOLD_SAVEPOINT).await?;
                        summary.released += 1;
                        summary.amount = &summary.amount + &hold.amount;
                    }
                    Err(e) => {
                        tx.rollback_to_savepoint(HOLD_SAVEPOINT).await?;
                        tx.release_savepoint(HOLD_SAVEPOINT).await?;
                        tracing::error!(
                            "hold {} of {} could not be released: {}",
                            hold.id,
                            hold.user_id,
                            e
                        );
                        summary.failed.push(hold.id);
                    }
                }
            }
            tx.commit().await?;
            summary.batches += 1;

            if (claimed as i64) < self.batch_size {
                break;
            }
        }

        if summary.released > 0 || !summary.failed.is_empty() {
            tracing::info!(
                "unlock sweep released {} holds worth {} in {} batches, {} failed",
                summary.released,
                summary.amount,
                summary.batches,
                summary.failed.len()
            );
        }

        Ok(summary)
    }
}

/// Moves one hold's amount from frozen to available and records the release.
pub async fn release_hold(
    tx: &mut dyn StoreTx,
    hold: &WalletHold,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let original = tx
        .get_transaction(hold.transaction_id)
        .await?
        .ok_or_else(|| {
            ServiceError::consistency(format!(
                "hold {} points at missing transaction {}",
                hold.id, hold.transaction_id
            ))
        })?;

    if original.status != TransactionStatus::Frozen || original.direction != Direction::In {
        return Err(ServiceError::consistency(format!(
            "hold {} is frozen but transaction {} is {:?}",
            hold.id, original.id, original.status
        )));
    }
    if original.amount != hold.amount {
        return Err(ServiceError::consistency(format!(
            "hold {} amount {} differs from transaction {} amount {}",
            hold.id, hold.amount, original.id, original.amount
        )));
    }

    let account = tx
        .apply_balance_delta(
            hold.user_id,
            &(BalanceDelta::frozen(-hold.amount.clone()) + BalanceDelta::available(hold.amount.clone())),
        )
        .await?;

    let release_key = SourceKey::unlock_release(original.id);
    if tx.find_transaction_by_source(&release_key).await?.is_none() {
        let memo = NewWalletTransaction {
            user_id: hold.user_id,
            order_id: original.order_id,
            amount: hold.amount.clone(),
            direction: Direction::In,
            status: TransactionStatus::Available,
            business_type: BusinessType::UnlockRelease,
            source: release_key,
            description: format!("unlock of transaction {}", original.id),
        };
        tx.insert_transaction(&memo, &account).await?;
    }

    tx.update_transaction(
        original.id,
        &original.amount,
        Direction::In,
        TransactionStatus::Available,
        &account,
    )
    .await?;
    tx.set_hold_status(hold.id, HoldStatus::Released, Some(now)).await?;

    if original.source_type == SourceType::Settlement {
        tx.set_payment_status(original.source_id, PaymentStatus::Released).await?;
    }

    tracing::debug!("released hold {} ({}) for {}", hold.id, hold.amount, hold.user_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::db::memory::MemoryStore;
    use crate::service::fixtures::{at, d};
    use crate::service::wallet_ledger::{EarningEntry, WalletLedger};

    async fn freeze(store: &MemoryStore, user: Uuid, amount: &str, unlock_at: DateTime<Utc>) {
        let entry = EarningEntry {
            user_id: user,
            order_id: None,
            amount: d(amount),
            unlock_at: Some(unlock_at),
            source: SourceKey::settlement(Uuid::new_v4()),
            business_type: BusinessType::SettlementEarning,
            description: "earning".to_string(),
        };
        let mut tx = store.begin().await.unwrap();
        WalletLedger::sync_earning(tx.as_mut(), &entry).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_due_holds_move_to_available() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        freeze(&store, user, "70.00", at(0)).await;
        freeze(&store, user, "30.00", at(0) + Duration::days(10)).await;

        let sweeper = UnlockSweeper::new(Arc::new(store.clone()), 10);
        let summary = sweeper.release_due_holds(at(60)).await.unwrap();
        assert_eq!(summary.released, 1);
        assert_eq!(summary.amount, d("70.00"));

        let state = store.snapshot().await;
        let account = &state.accounts[&user];
        assert_eq!(account.available_balance, d("70.00"));
        assert_eq!(account.frozen_balance, d("30.00"));

        let memo = state
            .transactions
            .iter()
            .find(|t| t.business_type == BusinessType::UnlockRelease)
            .unwrap();
        assert_eq!(memo.amount, d("70.00"));
        assert_eq!(memo.balance_after_available, d("70.00"));
        assert_eq!(
            state.holds.iter().filter(|h| h.status == HoldStatus::Released).count(),
            1
        );

        let mut tx = store.begin().await.unwrap();
        let report = WalletLedger::reconcile_in(tx.as_mut(), user).await.unwrap();
        assert!(report.is_balanced());
    }

    #[tokio::test]
    async fn test_sweep_runs_in_batches_until_short() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        for _ in 0..5 {
            freeze(&store, user, "10.00", at(0)).await;
        }

        let sweeper = UnlockSweeper::new(Arc::new(store.clone()), 2);
        let summary = sweeper.release_due_holds(at(1)).await.unwrap();
        assert_eq!(summary.released, 5);
        assert_eq!(summary.batches, 3);

        let again = sweeper.release_due_holds(at(1)).await.unwrap();
        assert_eq!(again.released, 0);

        let state = store.snapshot().await;
        assert_eq!(state.accounts[&user].available_balance, d("50.00"));
        assert_eq!(state.accounts[&user].frozen_balance, d("0"));
    }

    #[tokio::test]
    async fn test_mismatched_hold_does_not_block_others() {
        let store = MemoryStore::new();
        let broken_user = Uuid::new_v4();
        let healthy_user = Uuid::new_v4();
        freeze(&store, broken_user, "10.00", at(0)).await;
        freeze(&store, healthy_user, "20.00", at(5)).await;
        store.seed(|state| state.holds[0].amount = d("12.00")).await;
        let broken_hold = store.snapshot().await.holds[0].id;

        // batch size one, so the broken hold would be claimed first every batch
        let sweeper = UnlockSweeper::new(Arc::new(store.clone()), 1);
        let summary = sweeper.release_due_holds(at(10)).await.unwrap();
        assert_eq!(summary.released, 1);
        assert_eq!(summary.amount, d("20.00"));
        assert_eq!(summary.failed, vec![broken_hold]);

        let state = store.snapshot().await;
        assert_eq!(state.accounts[&broken_user].frozen_balance, d("10.00"));
        assert_eq!(state.accounts[&broken_user].available_balance, d("0"));
        assert_eq!(state.accounts[&healthy_user].available_balance, d("20.00"));
        assert_eq!(state.holds[0].status, HoldStatus::Frozen);
        assert!(!state
            .transactions
            .iter()
            .any(|t| t.business_type == BusinessType::UnlockRelease && t.user_id == broken_user));

        // still reported on the next sweep
        let again = sweeper.release_due_holds(at(10)).await.unwrap();
        assert_eq!(again.released, 0);
        assert_eq!(again.failed, vec![broken_hold]);
    }

    #[tokio::test]
    async fn test_hold_without_transaction_is_consistency_error() {
        let store = MemoryStore::new();
        let hold = WalletHold {
            id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: d("12.00"),
            unlock_at: at(0),
            status: HoldStatus::Frozen,
            created_at: None,
            released_at: None,
        };

        let mut tx = store.begin().await.unwrap();
        let err = release_hold(tx.as_mut(), &hold, at(1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Consistency(_)));
    }
}
