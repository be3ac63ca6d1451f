// models/settlementmodel.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

use super::dispatchmodel::BillingPolicy;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[sqlx(type_name = "settlement_type", rename_all = "snake_case")]
pub enum SettlementType {
    BaseEarning,
    PenaltyLoss,
    CarryCompensation,
    ServiceCoordinator,
}

impl SettlementType {
    pub fn to_str(&self) -> &str {
        match self {
            SettlementType::BaseEarning => "base_earning",
            SettlementType::PenaltyLoss => "penalty_loss",
            SettlementType::CarryCompensation => "carry_compensation",
            SettlementType::ServiceCoordinator => "service_coordinator",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "settlement_payment_status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Frozen,
    Released,
    Debited,
    Reversed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub round_id: Uuid,
    pub worker_id: Uuid,
    pub settlement_type: SettlementType,
    pub gross_amount: BigDecimal,
    pub multiplier: BigDecimal,
    pub calculated_earnings: BigDecimal,
    pub manual_adjustment: BigDecimal,
    pub final_earnings: BigDecimal,
    pub payment_status: PaymentStatus,
    pub batch_id: Uuid,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    pub fn key(&self) -> (Uuid, Uuid, SettlementType) {
        (self.round_id, self.worker_id, self.settlement_type)
    }
}

/// A row produced by a billing calculator, before it touches any store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateSettlement {
    pub order_id: Uuid,
    pub round_id: Uuid,
    pub worker_id: Uuid,
    pub settlement_type: SettlementType,
    /// Share of the order pool before commission.
    pub gross_amount: BigDecimal,
    pub multiplier: BigDecimal,
    pub calculated_earnings: BigDecimal,
}

impl CandidateSettlement {
    pub fn key(&self) -> (Uuid, Uuid, SettlementType) {
        (self.round_id, self.worker_id, self.settlement_type)
    }
}

/// Per-round figures persisted back onto the round for duration billing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundBilling {
    pub round_id: Uuid,
    pub billable_minutes: i32,
    pub billable_hours: BigDecimal,
    pub gross_amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementComputation {
    pub order_id: Uuid,
    pub billing_policy: BillingPolicy,
    pub pool: BigDecimal,
    pub rows: Vec<CandidateSettlement>,
    pub rounds: Vec<RoundBilling>,
}

impl SettlementComputation {
    /// Pool consumed by worker rows; the coordinator share is paid on top.
    pub fn distributed_gross(&self) -> BigDecimal {
        self.rows
            .iter()
            .filter(|r| r.settlement_type != SettlementType::ServiceCoordinator)
            .map(|r| &r.gross_amount)
            .sum()
    }
}

/// Persisted dry-run result; apply must happen before `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SettlementPreview {
    pub order_id: Uuid,
    pub computation: sqlx::types::Json<SettlementComputation>,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SettlementPreview {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
