// models/walletmodels.rs
use std::ops::{Add, Neg};

use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::utils::decimal::zero_money;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "transaction_direction", rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "wallet_transaction_status", rename_all = "lowercase")]
pub enum TransactionStatus {
    Frozen,
    Available,
    Reversed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "business_type", rename_all = "snake_case")]
pub enum BusinessType {
    SettlementEarning,
    SettlementPenalty,
    CoordinatorCommission,
    /// Memo row written when a hold unlocks; the original transaction carries the value.
    UnlockRelease,
}

impl BusinessType {
    pub fn is_memo(&self) -> bool {
        matches!(self, BusinessType::UnlockRelease)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "wallet_source_type", rename_all = "snake_case")]
pub enum SourceType {
    Settlement,
    UnlockRelease,
}

/// The sole idempotency key of a wallet transaction.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub source_type: SourceType,
    pub source_id: Uuid,
}

impl SourceKey {
    pub fn settlement(settlement_id: Uuid) -> Self {
        Self {
            source_type: SourceType::Settlement,
            source_id: settlement_id,
        }
    }

    pub fn unlock_release(transaction_id: Uuid) -> Self {
        Self {
            source_type: SourceType::UnlockRelease,
            source_id: transaction_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletAccount {
    pub user_id: Uuid,
    pub available_balance: BigDecimal,
    pub frozen_balance: BigDecimal,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WalletAccount {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            available_balance: zero_money(),
            frozen_balance: zero_money(),
            updated_at: None,
        }
    }

    pub fn total_balance(&self) -> BigDecimal {
        &self.available_balance + &self.frozen_balance
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    /// Always a non-negative magnitude; `direction` carries the sign.
    pub amount: BigDecimal,
    pub direction: Direction,
    pub status: TransactionStatus,
    pub business_type: BusinessType,
    pub source_type: SourceType,
    pub source_id: Uuid,
    pub balance_after_available: BigDecimal,
    pub balance_after_frozen: BigDecimal,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WalletTransaction {
    pub fn source_key(&self) -> SourceKey {
        SourceKey {
            source_type: self.source_type,
            source_id: self.source_id,
        }
    }

    /// Contribution of this row to the owner's (available, frozen) balances.
    pub fn signed_effect(&self) -> BalanceDelta {
        if self.business_type.is_memo() {
            return BalanceDelta::zero();
        }
        let amount = self.amount.clone();
        match (self.direction, self.status) {
            (_, TransactionStatus::Reversed) => BalanceDelta::zero(),
            (Direction::In, TransactionStatus::Frozen) => BalanceDelta::frozen(amount),
            (Direction::In, TransactionStatus::Available) => BalanceDelta::available(amount),
            (Direction::Out, TransactionStatus::Frozen) => BalanceDelta::frozen(-amount),
            (Direction::Out, TransactionStatus::Available) => BalanceDelta::available(-amount),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status != TransactionStatus::Reversed
    }
}

#[derive(Debug, Clone)]
pub struct NewWalletTransaction {
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub direction: Direction,
    pub status: TransactionStatus,
    pub business_type: BusinessType,
    pub source: SourceKey,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "hold_status", rename_all = "lowercase")]
pub enum HoldStatus {
    Frozen,
    Released,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletHold {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub unlock_at: DateTime<Utc>,
    pub status: HoldStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

/// A pair of increments applied to an account's two buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub available: BigDecimal,
    pub frozen: BigDecimal,
}

impl BalanceDelta {
    pub fn zero() -> Self {
        Self {
            available: zero_money(),
            frozen: zero_money(),
        }
    }

    pub fn available(amount: BigDecimal) -> Self {
        Self {
            available: amount,
            frozen: zero_money(),
        }
    }

    pub fn frozen(amount: BigDecimal) -> Self {
        Self {
            available: zero_money(),
            frozen: amount,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.available.is_zero() && self.frozen.is_zero()
    }
}

impl Add for BalanceDelta {
    type Output = BalanceDelta;

    fn add(self, rhs: BalanceDelta) -> BalanceDelta {
        BalanceDelta {
            available: self.available + rhs.available,
            frozen: self.frozen + rhs.frozen,
        }
    }
}

impl Neg for BalanceDelta {
    type Output = BalanceDelta;

    fn neg(self) -> BalanceDelta {
        BalanceDelta {
            available: -self.available,
            frozen: -self.frozen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn tx(direction: Direction, status: TransactionStatus, business_type: BusinessType) -> WalletTransaction {
        WalletTransaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            order_id: None,
            amount: BigDecimal::from_str("12.50").unwrap(),
            direction,
            status,
            business_type,
            source_type: SourceType::Settlement,
            source_id: Uuid::new_v4(),
            balance_after_available: zero_money(),
            balance_after_frozen: zero_money(),
            description: String::new(),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_signed_effect_by_direction_and_status() {
        let amount = BigDecimal::from_str("12.50").unwrap();

        let frozen_in = tx(Direction::In, TransactionStatus::Frozen, BusinessType::SettlementEarning);
        assert_eq!(frozen_in.signed_effect(), BalanceDelta::frozen(amount.clone()));

        let released_in = tx(Direction::In, TransactionStatus::Available, BusinessType::SettlementEarning);
        assert_eq!(released_in.signed_effect(), BalanceDelta::available(amount.clone()));

        let debit = tx(Direction::Out, TransactionStatus::Available, BusinessType::SettlementPenalty);
        assert_eq!(debit.signed_effect(), BalanceDelta::available(-amount));

        let reversed = tx(Direction::In, TransactionStatus::Reversed, BusinessType::SettlementEarning);
        assert!(reversed.signed_effect().is_zero());
    }

    #[test]
    fn test_release_memo_has_no_effect() {
        let memo = tx(Direction::In, TransactionStatus::Available, BusinessType::UnlockRelease);
        assert!(memo.signed_effect().is_zero());
    }

    #[test]
    fn test_delta_negation() {
        let delta = BalanceDelta::frozen(BigDecimal::from(5)) + BalanceDelta::available(BigDecimal::from(2));
        let inverse = -delta.clone();
        assert!((delta + inverse).is_zero());
    }
}
