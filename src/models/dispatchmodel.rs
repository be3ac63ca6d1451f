// models/dispatchmodel.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "product_category", rename_all = "snake_case")]
pub enum ProductCategory {
    Standard,
    Promotional,
    Trial,
}

impl ProductCategory {
    pub fn to_str(&self) -> &str {
        match self {
            ProductCategory::Standard => "standard",
            ProductCategory::Promotional => "promotional",
            ProductCategory::Trial => "trial",
        }
    }

    /// Promotional categories unlock earnings on the short freeze window.
    pub fn is_promotional(&self) -> bool {
        matches!(self, ProductCategory::Promotional | ProductCategory::Trial)
    }

    /// Trial orders carry no service-coordinator share.
    pub fn pays_coordinator_share(&self) -> bool {
        !matches!(self, ProductCategory::Trial)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "billing_policy", rename_all = "snake_case")]
pub enum BillingPolicy {
    DurationBased,
    QuotaBased,
    ExternallyAllocated,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "round_status", rename_all = "snake_case")]
pub enum RoundStatus {
    AwaitingAssignment,
    AwaitingAcceptance,
    Accepted,
    Settling,
    Archived,
    Completed,
}

impl RoundStatus {
    pub fn to_str(&self) -> &str {
        match self {
            RoundStatus::AwaitingAssignment => "awaiting_assignment",
            RoundStatus::AwaitingAcceptance => "awaiting_acceptance",
            RoundStatus::Accepted => "accepted",
            RoundStatus::Settling => "settling",
            RoundStatus::Archived => "archived",
            RoundStatus::Completed => "completed",
        }
    }

    /// Archived and completed rounds are the ones billing looks at.
    pub fn is_settled(&self) -> bool {
        matches!(self, RoundStatus::Archived | RoundStatus::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub category: ProductCategory,
    pub commission_rate: Option<BigDecimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DispatchOrder {
    pub id: Uuid,
    pub product_id: Uuid,
    pub paid_amount: BigDecimal,
    pub receivable_amount: BigDecimal,
    pub billing_policy: BillingPolicy,
    /// Guaranteed quota size in "wan" units, quota-based orders only.
    pub guaranteed_quota: Option<BigDecimal>,
    /// Hourly price, duration-based orders only.
    pub unit_price: Option<BigDecimal>,
    pub commission_rate: Option<BigDecimal>,
    pub is_gift: bool,
    pub dispatcher_id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
}

impl DispatchOrder {
    /// Amount the workers of this order are paid out of.
    pub fn pool_basis(&self) -> BigDecimal {
        if self.is_gift {
            self.receivable_amount.clone()
        } else {
            self.paid_amount.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DispatchRound {
    pub id: Uuid,
    pub order_id: Uuid,
    pub sequence: i32,
    pub status: RoundStatus,
    pub accepted_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Minutes subtracted from the billable duration.
    pub deduction_minutes: i32,
    pub billable_minutes: Option<i32>,
    pub billable_hours: Option<BigDecimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DispatchRound {
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            RoundStatus::Completed => self.completed_at,
            RoundStatus::Archived => self.archived_at,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoundParticipant {
    pub id: Uuid,
    pub round_id: Uuid,
    pub worker_id: Uuid,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    /// Signed progress contribution, quota-based orders only.
    pub contribution: Option<BigDecimal>,
    /// False once the participant has been superseded in the round.
    pub is_active: bool,
    /// Commission rate of the worker's tier, joined at load time.
    pub tier_commission_rate: Option<BigDecimal>,
}

impl RoundParticipant {
    pub fn is_accepted(&self) -> bool {
        self.is_active && self.accepted_at.is_some() && self.rejected_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IncomeAllocation {
    pub round_id: Uuid,
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub entered_by: Uuid,
    pub entered_at: Option<DateTime<Utc>>,
}

/// Everything billing needs for one order, loaded once per run.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub order: DispatchOrder,
    pub product: Product,
    pub rounds: Vec<DispatchRound>,
    pub participants: Vec<RoundParticipant>,
    pub allocations: HashMap<Uuid, BigDecimal>,
}

impl OrderSnapshot {
    /// Archived and completed rounds by sequence, the completed round last.
    pub fn settled_rounds(&self) -> Vec<&DispatchRound> {
        let mut rounds: Vec<&DispatchRound> = self
            .rounds
            .iter()
            .filter(|r| r.status.is_settled())
            .collect();
        rounds.sort_by_key(|r| (r.status == RoundStatus::Completed, r.sequence));
        rounds
    }

    pub fn completed_round(&self) -> Option<&DispatchRound> {
        self.rounds
            .iter()
            .find(|r| r.status == RoundStatus::Completed)
    }

    pub fn accepted_participants_of(&self, round_id: Uuid) -> Vec<&RoundParticipant> {
        self.participants
            .iter()
            .filter(|p| p.round_id == round_id && p.is_accepted())
            .collect()
    }
}
