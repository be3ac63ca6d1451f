// db/memory.rs
//! Process-local ledger store. One transaction at a time: `begin` takes the
//! state lock, works on a copy and writes it back on `commit`. Never open a
//! second transaction from a task that still holds one.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, Error};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    auditdb::AuditExt,
    db::{LedgerStore, StoreTx},
    dispatchdb::DispatchExt,
    settlementdb::SettlementExt,
    walletdb::WalletExt,
};
use crate::models::{
    auditmodel::{AuditLog, NewAuditLog},
    dispatchmodel::*,
    settlementmodel::*,
    walletmodels::*,
};
use crate::utils::decimal::zero_money;

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub products: HashMap<Uuid, Product>,
    pub orders: HashMap<Uuid, DispatchOrder>,
    pub rounds: HashMap<Uuid, DispatchRound>,
    pub participants: Vec<RoundParticipant>,
    pub allocations: HashMap<Uuid, IncomeAllocation>,
    pub settlements: Vec<SettlementRecord>,
    pub previews: HashMap<Uuid, SettlementPreview>,
    pub accounts: HashMap<Uuid, WalletAccount>,
    pub transactions: Vec<WalletTransaction>,
    pub holds: Vec<WalletHold>,
    pub audit_logs: Vec<AuditLog>,
    /// Makes every audit write fail, which aborts the enclosing unit of work.
    pub fail_audit_writes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutates committed state directly, outside of any transaction.
    pub async fn seed<F>(&self, f: F)
    where
        F: FnOnce(&mut MemoryState),
    {
        let mut state = self.state.lock().await;
        f(&mut state);
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

pub struct MemoryTx {
    committed: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
    savepoints: Vec<(String, MemoryState)>,
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, Error> {
        let committed = self.state.clone().lock_owned().await;
        let work = committed.clone();
        Ok(Box::new(MemoryTx {
            committed,
            work,
            savepoints: Vec::new(),
        }))
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let MemoryTx {
            mut committed, work, ..
        } = *self;
        *committed = work;
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), Error> {
        self.savepoints.push((name.to_string(), self.work.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), Error> {
        let position = self.savepoint_position(name)?;
        let (_, state) = self.savepoints[position].clone();
        self.savepoints.truncate(position + 1);
        self.work = state;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), Error> {
        let position = self.savepoint_position(name)?;
        self.savepoints.truncate(position);
        Ok(())
    }
}

impl MemoryTx {
    fn savepoint_position(&self, name: &str) -> Result<usize, Error> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| Error::Protocol(format!("no savepoint named {}", name)))
    }
}

#[async_trait]
impl DispatchExt for MemoryTx {
    async fn load_order_snapshot(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<OrderSnapshot>, Error> {
        let Some(order) = self.work.orders.get(&order_id).cloned() else {
            return Ok(None);
        };
        let product = self
            .work
            .products
            .get(&order.product_id)
            .cloned()
            .ok_or(Error::RowNotFound)?;

        let mut rounds: Vec<DispatchRound> = self
            .work
            .rounds
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.sequence);

        let round_ids: Vec<Uuid> = rounds.iter().map(|r| r.id).collect();
        let participants = self
            .work
            .participants
            .iter()
            .filter(|p| round_ids.contains(&p.round_id))
            .cloned()
            .collect();

        let allocations = self
            .work
            .allocations
            .values()
            .filter(|a| a.order_id == order_id)
            .map(|a| (a.round_id, a.amount.clone()))
            .collect();

        Ok(Some(OrderSnapshot {
            order,
            product,
            rounds,
            participants,
            allocations,
        }))
    }

    async fn get_round(&mut self, round_id: Uuid) -> Result<Option<DispatchRound>, Error> {
        Ok(self.work.rounds.get(&round_id).cloned())
    }

    async fn transition_round_status(
        &mut self,
        round_id: Uuid,
        from: RoundStatus,
        to: RoundStatus,
    ) -> Result<u64, Error> {
        match self.work.rounds.get_mut(&round_id) {
            Some(round) if round.status == from => {
                round.status = to;
                round.updated_at = Some(Utc::now());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn mark_round_settled(
        &mut self,
        round_id: Uuid,
        status: RoundStatus,
        at: DateTime<Utc>,
    ) -> Result<DispatchRound, Error> {
        let round = self
            .work
            .rounds
            .get_mut(&round_id)
            .filter(|r| r.status == RoundStatus::Settling)
            .ok_or(Error::RowNotFound)?;

        round.status = status;
        match status {
            RoundStatus::Archived => round.archived_at = Some(at),
            RoundStatus::Completed => round.completed_at = Some(at),
            _ => {}
        }
        round.updated_at = Some(Utc::now());
        Ok(round.clone())
    }

    async fn count_settling_rounds(&mut self, order_id: Uuid) -> Result<i64, Error> {
        Ok(self
            .work
            .rounds
            .values()
            .filter(|r| r.order_id == order_id && r.status == RoundStatus::Settling)
            .count() as i64)
    }

    async fn record_round_billing(&mut self, billing: &RoundBilling) -> Result<(), Error> {
        if let Some(round) = self.work.rounds.get_mut(&billing.round_id) {
            round.billable_minutes = Some(billing.billable_minutes);
            round.billable_hours = Some(billing.billable_hours.clone());
        }
        Ok(())
    }

    async fn upsert_income_allocation(
        &mut self,
        round_id: Uuid,
        amount: BigDecimal,
        entered_by: Uuid,
    ) -> Result<IncomeAllocation, Error> {
        let order_id = self
            .work
            .rounds
            .get(&round_id)
            .map(|r| r.order_id)
            .ok_or(Error::RowNotFound)?;

        let allocation = IncomeAllocation {
            round_id,
            order_id,
            amount,
            entered_by,
            entered_at: Some(Utc::now()),
        };
        self.work.allocations.insert(round_id, allocation.clone());
        Ok(allocation)
    }
}

#[async_trait]
impl SettlementExt for MemoryTx {
    async fn upsert_settlement(
        &mut self,
        row: &CandidateSettlement,
        batch_id: Uuid,
        replace_adjustment: bool,
    ) -> Result<SettlementRecord, Error> {
        let now = Utc::now();
        if let Some(existing) = self
            .work
            .settlements
            .iter_mut()
            .find(|s| s.key() == row.key())
        {
            if replace_adjustment {
                existing.manual_adjustment = zero_money();
            }
            existing.gross_amount = row.gross_amount.clone();
            existing.multiplier = row.multiplier.clone();
            existing.calculated_earnings = row.calculated_earnings.clone();
            existing.final_earnings = &row.calculated_earnings + &existing.manual_adjustment;
            existing.batch_id = batch_id;
            existing.updated_at = Some(now);
            return Ok(existing.clone());
        }

        let record = SettlementRecord {
            id: Uuid::new_v4(),
            order_id: row.order_id,
            round_id: row.round_id,
            worker_id: row.worker_id,
            settlement_type: row.settlement_type,
            gross_amount: row.gross_amount.clone(),
            multiplier: row.multiplier.clone(),
            calculated_earnings: row.calculated_earnings.clone(),
            manual_adjustment: zero_money(),
            final_earnings: row.calculated_earnings.clone(),
            payment_status: PaymentStatus::Pending,
            batch_id,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.work.settlements.push(record.clone());
        Ok(record)
    }

    async fn get_settlements_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<SettlementRecord>, Error> {
        Ok(self
            .work
            .settlements
            .iter()
            .filter(|s| s.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn get_settlement(&mut self, settlement_id: Uuid) -> Result<Option<SettlementRecord>, Error> {
        Ok(self
            .work
            .settlements
            .iter()
            .find(|s| s.id == settlement_id)
            .cloned())
    }

    async fn set_manual_adjustment(
        &mut self,
        settlement_id: Uuid,
        adjustment: &BigDecimal,
    ) -> Result<SettlementRecord, Error> {
        let record = self
            .work
            .settlements
            .iter_mut()
            .find(|s| s.id == settlement_id)
            .ok_or(Error::RowNotFound)?;

        record.manual_adjustment = adjustment.clone();
        record.final_earnings = &record.calculated_earnings + adjustment;
        record.updated_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn set_payment_status(
        &mut self,
        settlement_id: Uuid,
        status: PaymentStatus,
    ) -> Result<(), Error> {
        if let Some(record) = self
            .work
            .settlements
            .iter_mut()
            .find(|s| s.id == settlement_id)
        {
            record.payment_status = status;
            record.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_settlements(&mut self, settlement_ids: &[Uuid]) -> Result<u64, Error> {
        let before = self.work.settlements.len();
        self.work
            .settlements
            .retain(|s| !settlement_ids.contains(&s.id));
        Ok((before - self.work.settlements.len()) as u64)
    }

    async fn save_preview(&mut self, preview: &SettlementPreview) -> Result<(), Error> {
        self.work.previews.insert(preview.order_id, preview.clone());
        Ok(())
    }

    async fn get_preview(&mut self, order_id: Uuid) -> Result<Option<SettlementPreview>, Error> {
        Ok(self.work.previews.get(&order_id).cloned())
    }

    async fn delete_preview(&mut self, order_id: Uuid) -> Result<(), Error> {
        self.work.previews.remove(&order_id);
        Ok(())
    }
}

#[async_trait]
impl WalletExt for MemoryTx {
    async fn get_account(&mut self, user_id: Uuid) -> Result<Option<WalletAccount>, Error> {
        Ok(self.work.accounts.get(&user_id).cloned())
    }

    async fn apply_balance_delta(
        &mut self,
        user_id: Uuid,
        delta: &BalanceDelta,
    ) -> Result<WalletAccount, Error> {
        let account = self
            .work
            .accounts
            .entry(user_id)
            .or_insert_with(|| WalletAccount::empty(user_id));

        account.available_balance = &account.available_balance + &delta.available;
        account.frozen_balance = &account.frozen_balance + &delta.frozen;
        account.updated_at = Some(Utc::now());
        Ok(account.clone())
    }

    async fn find_transaction_by_source(
        &mut self,
        key: &SourceKey,
    ) -> Result<Option<WalletTransaction>, Error> {
        Ok(self
            .work
            .transactions
            .iter()
            .find(|t| t.source_key() == *key)
            .cloned())
    }

    async fn get_transaction(&mut self, transaction_id: Uuid) -> Result<Option<WalletTransaction>, Error> {
        Ok(self
            .work
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .cloned())
    }

    async fn insert_transaction(
        &mut self,
        new: &NewWalletTransaction,
        balance_after: &WalletAccount,
    ) -> Result<WalletTransaction, Error> {
        if self
            .work
            .transactions
            .iter()
            .any(|t| t.source_key() == new.source)
        {
            return Err(Error::Protocol(format!(
                "duplicate wallet transaction source {:?}",
                new.source
            )));
        }

        let now = Utc::now();
        let transaction = WalletTransaction {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            order_id: new.order_id,
            amount: new.amount.clone(),
            direction: new.direction,
            status: new.status,
            business_type: new.business_type,
            source_type: new.source.source_type,
            source_id: new.source.source_id,
            balance_after_available: balance_after.available_balance.clone(),
            balance_after_frozen: balance_after.frozen_balance.clone(),
            description: new.description.clone(),
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.work.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn update_transaction(
        &mut self,
        transaction_id: Uuid,
        amount: &BigDecimal,
        direction: Direction,
        status: TransactionStatus,
        balance_after: &WalletAccount,
    ) -> Result<WalletTransaction, Error> {
        let transaction = self
            .work
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
            .ok_or(Error::RowNotFound)?;

        transaction.amount = amount.clone();
        transaction.direction = direction;
        transaction.status = status;
        transaction.balance_after_available = balance_after.available_balance.clone();
        transaction.balance_after_frozen = balance_after.frozen_balance.clone();
        transaction.updated_at = Some(Utc::now());
        Ok(transaction.clone())
    }

    async fn get_transactions_for_user(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<WalletTransaction>, Error> {
        Ok(self
            .work
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_transactions_by_sources(
        &mut self,
        source_type: SourceType,
        source_ids: &[Uuid],
    ) -> Result<Vec<WalletTransaction>, Error> {
        Ok(self
            .work
            .transactions
            .iter()
            .filter(|t| t.source_type == source_type && source_ids.contains(&t.source_id))
            .cloned()
            .collect())
    }

    async fn get_settlement_transactions_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<WalletTransaction>, Error> {
        Ok(self
            .work
            .transactions
            .iter()
            .filter(|t| t.source_type == SourceType::Settlement && t.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn delete_transactions(&mut self, transaction_ids: &[Uuid]) -> Result<u64, Error> {
        let before = self.work.transactions.len();
        self.work
            .transactions
            .retain(|t| !transaction_ids.contains(&t.id));
        Ok((before - self.work.transactions.len()) as u64)
    }

    async fn upsert_hold(
        &mut self,
        transaction_id: Uuid,
        user_id: Uuid,
        amount: &BigDecimal,
        unlock_at: DateTime<Utc>,
    ) -> Result<WalletHold, Error> {
        if let Some(hold) = self
            .work
            .holds
            .iter_mut()
            .find(|h| h.transaction_id == transaction_id)
        {
            hold.amount = amount.clone();
            hold.unlock_at = unlock_at;
            hold.status = HoldStatus::Frozen;
            hold.released_at = None;
            return Ok(hold.clone());
        }

        let hold = WalletHold {
            id: Uuid::new_v4(),
            transaction_id,
            user_id,
            amount: amount.clone(),
            unlock_at,
            status: HoldStatus::Frozen,
            created_at: Some(Utc::now()),
            released_at: None,
        };
        self.work.holds.push(hold.clone());
        Ok(hold)
    }

    async fn get_hold_for_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> Result<Option<WalletHold>, Error> {
        Ok(self
            .work
            .holds
            .iter()
            .find(|h| h.transaction_id == transaction_id)
            .cloned())
    }

    async fn set_hold_status(
        &mut self,
        hold_id: Uuid,
        status: HoldStatus,
        released_at: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        if let Some(hold) = self.work.holds.iter_mut().find(|h| h.id == hold_id) {
            hold.status = status;
            hold.released_at = released_at;
        }
        Ok(())
    }

    async fn claim_due_holds(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
        skip: &[Uuid],
    ) -> Result<Vec<WalletHold>, Error> {
        let mut due: Vec<WalletHold> = self
            .work
            .holds
            .iter()
            .filter(|h| h.status == HoldStatus::Frozen && h.unlock_at <= now && !skip.contains(&h.id))
            .cloned()
            .collect();
        due.sort_by_key(|h| (h.unlock_at, h.id));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn delete_holds_for_transactions(&mut self, transaction_ids: &[Uuid]) -> Result<u64, Error> {
        let before = self.work.holds.len();
        self.work
            .holds
            .retain(|h| !transaction_ids.contains(&h.transaction_id));
        Ok((before - self.work.holds.len()) as u64)
    }
}

#[async_trait]
impl AuditExt for MemoryTx {
    async fn insert_audit_log(&mut self, entry: &NewAuditLog) -> Result<AuditLog, Error> {
        if self.work.fail_audit_writes {
            return Err(Error::Protocol("audit log unavailable".to_string()));
        }

        let log = AuditLog {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            event_type: entry.event_type.clone(),
            order_id: entry.order_id,
            related_user_id: entry.related_user_id,
            metadata: entry.metadata.clone(),
            description: entry.description.clone(),
            created_at: Some(Utc::now()),
        };
        self.work.audit_logs.push(log.clone());
        Ok(log)
    }

    async fn get_audit_logs_for_order(
        &mut self,
        order_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, Error> {
        Ok(self
            .work
            .audit_logs
            .iter()
            .rev()
            .filter(|l| l.order_id == Some(order_id))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
