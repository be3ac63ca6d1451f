// service/wallet_ledger.rs
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{LedgerStore, SettlementExt, StoreTx, WalletExt},
    models::{
        settlementmodel::{PaymentStatus, SettlementRecord, SettlementType},
        walletmodels::*,
    },
    service::error::ServiceError,
    utils::decimal::BigDecimalHelpers,
};

/// One earning to mirror into the wallet, keyed by its source.
#[derive(Debug, Clone)]
pub struct EarningEntry {
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    /// Signed: positive credits frozen, zero reverses, negative debits available.
    pub amount: BigDecimal,
    pub unlock_at: Option<DateTime<Utc>>,
    pub source: SourceKey,
    pub business_type: BusinessType,
    pub description: String,
}

impl EarningEntry {
    pub fn for_settlement(record: &SettlementRecord, unlock_at: Option<DateTime<Utc>>) -> Self {
        let business_type = if record.final_earnings < BigDecimal::zero() {
            BusinessType::SettlementPenalty
        } else if record.settlement_type == SettlementType::ServiceCoordinator {
            BusinessType::CoordinatorCommission
        } else {
            BusinessType::SettlementEarning
        };

        Self {
            user_id: record.worker_id,
            order_id: Some(record.order_id),
            amount: record.final_earnings.clone(),
            unlock_at,
            source: SourceKey::settlement(record.id),
            business_type,
            description: format!(
                "{} for round {}",
                record.settlement_type.to_str(),
                record.round_id
            ),
        }
    }

    fn new_transaction(
        &self,
        amount: BigDecimal,
        direction: Direction,
        status: TransactionStatus,
    ) -> NewWalletTransaction {
        NewWalletTransaction {
            user_id: self.user_id,
            order_id: self.order_id,
            amount,
            direction,
            status,
            business_type: self.business_type,
            source: self.source,
            description: self.description.clone(),
        }
    }
}

/// Expected versus stored balances for one account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountReconciliation {
    pub user_id: Uuid,
    pub expected: BalanceDelta,
    pub actual: BalanceDelta,
    pub transaction_count: usize,
}

impl AccountReconciliation {
    pub fn drift(&self) -> BalanceDelta {
        self.actual.clone() + -self.expected.clone()
    }

    pub fn is_balanced(&self) -> bool {
        self.drift().is_zero()
    }
}

#[derive(Debug, Clone)]
pub struct WalletLedger {
    store: Arc<dyn LedgerStore>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile_account(&self, user_id: Uuid) -> Result<AccountReconciliation, ServiceError> {
        let mut tx = self.store.begin().await?;
        let report = Self::reconcile_in(tx.as_mut(), user_id).await?;

        if !report.is_balanced() {
            tracing::warn!(
                "wallet {} drifted from its transactions: {:?}",
                user_id,
                report.drift()
            );
        }

        Ok(report)
    }

    pub async fn reconcile_in(
        tx: &mut dyn StoreTx,
        user_id: Uuid,
    ) -> Result<AccountReconciliation, ServiceError> {
        let transactions = tx.get_transactions_for_user(user_id).await?;
        let expected = transactions
            .iter()
            .filter(|t| t.is_live())
            .fold(BalanceDelta::zero(), |acc, t| acc + t.signed_effect());

        let account = tx
            .get_account(user_id)
            .await?
            .unwrap_or_else(|| WalletAccount::empty(user_id));

        Ok(AccountReconciliation {
            user_id,
            expected,
            actual: BalanceDelta {
                available: account.available_balance,
                frozen: account.frozen_balance,
            },
            transaction_count: transactions.len(),
        })
    }

    /// Mirrors a settlement row into its owner's wallet and records the
    /// resulting payment status on the row.
    pub async fn sync_settlement(
        tx: &mut dyn StoreTx,
        record: &SettlementRecord,
        unlock_at: Option<DateTime<Utc>>,
    ) -> Result<PaymentStatus, ServiceError> {
        let entry = EarningEntry::for_settlement(record, unlock_at);
        let status = Self::sync_earning(tx, &entry).await?;
        if status != record.payment_status {
            tx.set_payment_status(record.id, status).await?;
        }
        Ok(status)
    }

    /// Idempotent on `entry.source`. Replaying the same entry changes nothing;
    /// a changed amount is applied as a delta.
    pub async fn sync_earning(
        tx: &mut dyn StoreTx,
        entry: &EarningEntry,
    ) -> Result<PaymentStatus, ServiceError> {
        let amount = entry.amount.round_money();
        let existing = tx.find_transaction_by_source(&entry.source).await?;

        if let Some(ref current) = existing {
            if current.user_id != entry.user_id {
                return Err(ServiceError::consistency(format!(
                    "source {:?} already belongs to user {}, not {}",
                    entry.source, current.user_id, entry.user_id
                )));
            }
        }

        if amount > BigDecimal::zero() {
            Self::credit_frozen(tx, entry, amount, existing).await
        } else if amount < BigDecimal::zero() {
            Self::debit_available(tx, entry, -amount, existing).await
        } else {
            Self::reverse(tx, existing).await
        }
    }

    async fn credit_frozen(
        tx: &mut dyn StoreTx,
        entry: &EarningEntry,
        amount: BigDecimal,
        existing: Option<WalletTransaction>,
    ) -> Result<PaymentStatus, ServiceError> {
        match existing {
            None => {
                let Some(unlock_at) = entry.unlock_at else {
                    return Ok(PaymentStatus::Pending);
                };
                let account = tx
                    .apply_balance_delta(entry.user_id, &BalanceDelta::frozen(amount.clone()))
                    .await?;
                let created = tx
                    .insert_transaction(
                        &entry.new_transaction(amount.clone(), Direction::In, TransactionStatus::Frozen),
                        &account,
                    )
                    .await?;
                tx.upsert_hold(created.id, entry.user_id, &amount, unlock_at).await?;
                tracing::debug!("froze {} for {} under {:?}", amount, entry.user_id, entry.source);
                Ok(PaymentStatus::Frozen)
            }
            Some(current) if current.status == TransactionStatus::Reversed => {
                let Some(unlock_at) = entry.unlock_at else {
                    return Ok(PaymentStatus::Reversed);
                };
                let account = tx
                    .apply_balance_delta(entry.user_id, &BalanceDelta::frozen(amount.clone()))
                    .await?;
                tx.update_transaction(current.id, &amount, Direction::In, TransactionStatus::Frozen, &account)
                    .await?;
                tx.upsert_hold(current.id, entry.user_id, &amount, unlock_at).await?;
                Ok(PaymentStatus::Frozen)
            }
            Some(current)
                if current.direction == Direction::In
                    && current.status == TransactionStatus::Frozen =>
            {
                let hold = tx.get_hold_for_transaction(current.id).await?;
                let unlock_at = entry
                    .unlock_at
                    .or(hold.as_ref().map(|h| h.unlock_at))
                    .ok_or_else(|| {
                        ServiceError::consistency(format!(
                            "frozen transaction {} has no hold",
                            current.id
                        ))
                    })?;

                let delta = &amount - &current.amount;
                let hold_unchanged = hold
                    .as_ref()
                    .map(|h| h.unlock_at == unlock_at && h.status == HoldStatus::Frozen)
                    .unwrap_or(false);
                if delta.is_zero() && hold_unchanged {
                    return Ok(PaymentStatus::Frozen);
                }

                let account = tx
                    .apply_balance_delta(entry.user_id, &BalanceDelta::frozen(delta))
                    .await?;
                tx.update_transaction(current.id, &amount, Direction::In, TransactionStatus::Frozen, &account)
                    .await?;
                tx.upsert_hold(current.id, entry.user_id, &amount, unlock_at).await?;
                Ok(PaymentStatus::Frozen)
            }
            Some(current)
                if current.direction == Direction::In
                    && current.status == TransactionStatus::Available =>
            {
                if current.amount == amount {
                    Ok(PaymentStatus::Released)
                } else {
                    Err(ServiceError::consistency(format!(
                        "transaction {} was already released at {}, cannot change it to {}",
                        current.id, current.amount, amount
                    )))
                }
            }
            Some(current) => Err(ServiceError::consistency(format!(
                "transaction {} is a debit, cannot credit {} under the same source",
                current.id, amount
            ))),
        }
    }

    async fn debit_available(
        tx: &mut dyn StoreTx,
        entry: &EarningEntry,
        magnitude: BigDecimal,
        existing: Option<WalletTransaction>,
    ) -> Result<PaymentStatus, ServiceError> {
        match existing {
            None => {
                let account = tx
                    .apply_balance_delta(entry.user_id, &BalanceDelta::available(-magnitude.clone()))
                    .await?;
                tx.insert_transaction(
                    &entry.new_transaction(magnitude.clone(), Direction::Out, TransactionStatus::Available),
                    &account,
                )
                .await?;
                tracing::debug!("debited {} from {} under {:?}", magnitude, entry.user_id, entry.source);
                Ok(PaymentStatus::Debited)
            }
            Some(current) if current.status == TransactionStatus::Reversed => {
                let account = tx
                    .apply_balance_delta(entry.user_id, &BalanceDelta::available(-magnitude.clone()))
                    .await?;
                tx.update_transaction(
                    current.id,
                    &magnitude,
                    Direction::Out,
                    TransactionStatus::Available,
                    &account,
                )
                .await?;
                Ok(PaymentStatus::Debited)
            }
            Some(current) if current.direction == Direction::Out => {
                if current.amount == magnitude {
                    Ok(PaymentStatus::Debited)
                } else {
                    Err(ServiceError::consistency(format!(
                        "debit {} of {} cannot be changed to {}",
                        current.id, current.amount, magnitude
                    )))
                }
            }
            Some(current) => Err(ServiceError::consistency(format!(
                "transaction {} is a credit, cannot debit {} under the same source",
                current.id, magnitude
            ))),
        }
    }

    async fn reverse(
        tx: &mut dyn StoreTx,
        existing: Option<WalletTransaction>,
    ) -> Result<PaymentStatus, ServiceError> {
        let Some(current) = existing else {
            return Ok(PaymentStatus::Pending);
        };
        if current.status == TransactionStatus::Reversed {
            return Ok(PaymentStatus::Reversed);
        }

        let account = tx
            .apply_balance_delta(current.user_id, &-current.signed_effect())
            .await?;
        tx.update_transaction(
            current.id,
            &current.amount,
            current.direction,
            TransactionStatus::Reversed,
            &account,
        )
        .await?;

        if current.status == TransactionStatus::Frozen {
            if let Some(hold) = tx.get_hold_for_transaction(current.id).await? {
                tx.set_hold_status(hold.id, HoldStatus::Cancelled, None).await?;
            }
        }

        tracing::debug!("reversed transaction {} of {}", current.id, current.user_id);
        Ok(PaymentStatus::Reversed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::service::fixtures::{at, d};

    fn entry(user_id: Uuid, source: SourceKey, amount: &str) -> EarningEntry {
        EarningEntry {
            user_id,
            order_id: None,
            amount: d(amount),
            unlock_at: Some(at(7 * 24 * 60)),
            source,
            business_type: BusinessType::SettlementEarning,
            description: "base_earning for round".to_string(),
        }
    }

    async fn sync(store: &MemoryStore, entry: &EarningEntry) -> Result<PaymentStatus, ServiceError> {
        let mut tx = store.begin().await.unwrap();
        let status = WalletLedger::sync_earning(tx.as_mut(), entry).await?;
        tx.commit().await.unwrap();
        Ok(status)
    }

    async fn assert_reconciled(store: &MemoryStore, user_id: Uuid) {
        let mut tx = store.begin().await.unwrap();
        let report = WalletLedger::reconcile_in(tx.as_mut(), user_id).await.unwrap();
        assert!(report.is_balanced(), "drift {:?}", report.drift());
    }

    #[tokio::test]
    async fn test_replayed_earning_is_applied_once() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let e = entry(user, SourceKey::settlement(Uuid::new_v4()), "100.00");

        assert_eq!(sync(&store, &e).await.unwrap(), PaymentStatus::Frozen);
        assert_eq!(sync(&store, &e).await.unwrap(), PaymentStatus::Frozen);

        let state = store.snapshot().await;
        assert_eq!(state.transactions.len(), 1);
        assert_eq!(state.holds.len(), 1);
        assert_eq!(state.accounts[&user].frozen_balance, d("100.00"));
        assert_eq!(state.accounts[&user].available_balance, d("0"));
        assert_reconciled(&store, user).await;
    }

    #[tokio::test]
    async fn test_changed_amount_applies_delta() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let source = SourceKey::settlement(Uuid::new_v4());

        sync(&store, &entry(user, source, "100.00")).await.unwrap();
        sync(&store, &entry(user, source, "80.00")).await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.accounts[&user].frozen_balance, d("80.00"));
        assert_eq!(state.transactions[0].amount, d("80.00"));
        assert_eq!(state.transactions[0].balance_after_frozen, d("80.00"));
        assert_eq!(state.holds[0].amount, d("80.00"));
        assert_reconciled(&store, user).await;
    }

    #[tokio::test]
    async fn test_zero_reverses_and_cancels_hold() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let source = SourceKey::settlement(Uuid::new_v4());

        sync(&store, &entry(user, source, "100.00")).await.unwrap();
        assert_eq!(sync(&store, &entry(user, source, "0")).await.unwrap(), PaymentStatus::Reversed);

        let state = store.snapshot().await;
        assert_eq!(state.accounts[&user].frozen_balance, d("0"));
        assert_eq!(state.transactions[0].status, TransactionStatus::Reversed);
        assert_eq!(state.holds[0].status, HoldStatus::Cancelled);
        assert_reconciled(&store, user).await;

        // a later positive amount revives the same transaction
        sync(&store, &entry(user, source, "40.00")).await.unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.transactions.len(), 1);
        assert_eq!(state.transactions[0].status, TransactionStatus::Frozen);
        assert_eq!(state.holds[0].status, HoldStatus::Frozen);
        assert_eq!(state.accounts[&user].frozen_balance, d("40.00"));
        assert_reconciled(&store, user).await;
    }

    #[tokio::test]
    async fn test_negative_amount_debits_available_immediately() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let source = SourceKey::settlement(Uuid::new_v4());
        let mut penalty = entry(user, source, "-30.00");
        penalty.business_type = BusinessType::SettlementPenalty;

        assert_eq!(sync(&store, &penalty).await.unwrap(), PaymentStatus::Debited);
        assert_eq!(sync(&store, &penalty).await.unwrap(), PaymentStatus::Debited);

        let state = store.snapshot().await;
        assert_eq!(state.transactions.len(), 1);
        assert_eq!(state.transactions[0].direction, Direction::Out);
        assert_eq!(state.transactions[0].amount, d("30.00"));
        assert!(state.holds.is_empty());
        assert_eq!(state.accounts[&user].available_balance, d("-30.00"));
        assert_reconciled(&store, user).await;

        penalty.amount = d("-45.00");
        let err = sync(&store, &penalty).await.unwrap_err();
        assert!(matches!(err, ServiceError::Consistency(_)));
    }

    #[tokio::test]
    async fn test_source_owned_by_another_user_is_rejected() {
        let store = MemoryStore::new();
        let source = SourceKey::settlement(Uuid::new_v4());
        sync(&store, &entry(Uuid::new_v4(), source, "10.00")).await.unwrap();

        let err = sync(&store, &entry(Uuid::new_v4(), source, "10.00")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Consistency(_)));
    }

    #[tokio::test]
    async fn test_credit_waits_for_unlock_time() {
        let store = MemoryStore::new();
        let mut e = entry(Uuid::new_v4(), SourceKey::settlement(Uuid::new_v4()), "10.00");
        e.unlock_at = None;

        assert_eq!(sync(&store, &e).await.unwrap(), PaymentStatus::Pending);
        assert!(store.snapshot().await.transactions.is_empty());
    }

    #[tokio::test]
    async fn test_released_amount_cannot_be_corrected() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let source = SourceKey::settlement(Uuid::new_v4());
        sync(&store, &entry(user, source, "50.00")).await.unwrap();
        store
            .seed(|state| state.transactions[0].status = TransactionStatus::Available)
            .await;

        assert_eq!(
            sync(&store, &entry(user, source, "50.00")).await.unwrap(),
            PaymentStatus::Released
        );
        let err = sync(&store, &entry(user, source, "60.00")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Consistency(_)));
    }

    #[tokio::test]
    async fn test_reconcile_reports_drift() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        sync(&store, &entry(user, SourceKey::settlement(Uuid::new_v4()), "25.00"))
            .await
            .unwrap();
        store
            .seed(|state| {
                let account = state.accounts.get_mut(&user).unwrap();
                account.available_balance = d("5.00");
            })
            .await;

        let ledger = WalletLedger::new(Arc::new(store.clone()));
        let report = ledger.reconcile_account(user).await.unwrap();
        assert!(!report.is_balanced());
        assert_eq!(report.drift().available, d("5.00"));
    }
}
