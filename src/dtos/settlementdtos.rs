// dtos/settlementdtos.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::settlementmodel::*;
use crate::models::walletmodels::BalanceDelta;
use crate::service::repair_service::RepairOutcome;
use crate::utils::decimal::BigDecimalHelpers;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ManualAdjustmentDto {
    /// Signed correction added to the calculated earnings.
    pub adjustment: f64,

    #[validate(length(min = 1, max = 500, message = "Reason must be between 1 and 500 characters"))]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct IncomeAllocationDto {
    #[validate(range(min = 0.0, max = 100000000.0, message = "Amount must be between 0 and 100,000,000"))]
    pub amount: f64,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RepairRequestDto {
    pub order_id: Uuid,

    #[validate(length(min = 1, max = 500, message = "Reason must be between 1 and 500 characters"))]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettlementRecordDto {
    pub id: Uuid,
    pub round_id: Uuid,
    pub worker_id: Uuid,
    pub settlement_type: SettlementType,
    pub gross_amount: f64,
    pub calculated_earnings: f64,
    pub manual_adjustment: f64,
    pub final_earnings: f64,
    pub payment_status: PaymentStatus,
    pub batch_id: Uuid,
}

impl SettlementRecordDto {
    pub fn from_record(record: &SettlementRecord) -> Self {
        Self {
            id: record.id,
            round_id: record.round_id,
            worker_id: record.worker_id,
            settlement_type: record.settlement_type,
            gross_amount: cents_to_f64(record.gross_amount.to_cents()),
            calculated_earnings: cents_to_f64(record.calculated_earnings.to_cents()),
            manual_adjustment: cents_to_f64(record.manual_adjustment.to_cents()),
            final_earnings: cents_to_f64(record.final_earnings.to_cents()),
            payment_status: record.payment_status,
            batch_id: record.batch_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RepairResponseDto {
    pub order_id: Uuid,
    pub batch_id: Uuid,
    pub replaced_rows: usize,
    pub records: Vec<SettlementRecordDto>,
    pub rollback_deltas: Vec<(Uuid, BalanceDelta)>,
}

impl RepairResponseDto {
    pub fn from_outcome(outcome: &RepairOutcome) -> Self {
        Self {
            order_id: outcome.order_id,
            batch_id: outcome.batch_id,
            replaced_rows: outcome.before.len(),
            records: outcome.after.iter().map(SettlementRecordDto::from_record).collect(),
            rollback_deltas: outcome
                .rollback
                .iter()
                .map(|(user_id, delta)| (*user_id, delta.clone()))
                .collect(),
        }
    }
}

fn cents_to_f64(cents: i64) -> f64 {
    cents as f64 / 100.0
}
