// service/billing/quota.rs
use bigdecimal::BigDecimal;
use num_traits::{One, Zero};

use crate::{
    models::{
        dispatchmodel::{OrderSnapshot, RoundStatus},
        settlementmodel::{CandidateSettlement, SettlementType},
    },
    service::{commission::CommissionSnapshot, error::ServiceError},
    utils::decimal::BigDecimalHelpers,
};

use super::{candidate, split_round};

/// Running totals across the archived rounds of one order.
#[derive(Debug, Default)]
struct QuotaLedger {
    /// Net pool already paid out; penalties shrink it.
    consumed: BigDecimal,
    /// Penalties not yet won back by later positive progress.
    debt: BigDecimal,
}

pub(super) fn compute(
    snapshot: &OrderSnapshot,
    commission: &CommissionSnapshot,
    pool: &BigDecimal,
) -> Result<Vec<CandidateSettlement>, ServiceError> {
    let order = &snapshot.order;
    let quota = order
        .guaranteed_quota
        .as_ref()
        .filter(|q| **q > BigDecimal::zero())
        .ok_or_else(|| {
            ServiceError::validation(format!(
                "quota-based order {} needs a positive guaranteed quota",
                order.id
            ))
        })?;

    if pool.is_zero() {
        return Err(ServiceError::validation(format!(
            "quota-based order {} has an empty pool",
            order.id
        )));
    }

    // earning = contribution / (quota / pool)
    let ratio = quota / pool;

    let mut ledger = QuotaLedger::default();
    let mut rows = Vec::new();

    for round in snapshot.settled_rounds() {
        if round.status == RoundStatus::Completed {
            let participants = snapshot.accepted_participants_of(round.id);
            if participants.is_empty() {
                return Err(ServiceError::validation(format!(
                    "completed round {} has no accepted participants",
                    round.id
                )));
            }
            let remaining = pool - &ledger.consumed;
            let remaining = if remaining < BigDecimal::zero() { BigDecimal::zero() } else { remaining };
            rows.extend(split_round(snapshot, commission, round, &remaining)?);
            continue;
        }

        for participant in snapshot.accepted_participants_of(round.id) {
            let contribution = participant.contribution.clone().unwrap_or_else(BigDecimal::zero);
            let raw = (&contribution / &ratio).round_money();

            if raw < BigDecimal::zero() {
                ledger.consumed = &ledger.consumed + &raw;
                ledger.debt = &ledger.debt - &raw;
                rows.push(candidate(
                    snapshot,
                    round.id,
                    participant.worker_id,
                    SettlementType::PenaltyLoss,
                    raw,
                    BigDecimal::one(),
                ));
                continue;
            }

            let available = pool - &ledger.consumed;
            let available = if available < BigDecimal::zero() { BigDecimal::zero() } else { available };
            let earned = if raw > available { available } else { raw };

            let repay = if earned > ledger.debt { ledger.debt.clone() } else { earned.clone() };
            let base = &earned - &repay;

            ledger.consumed = &ledger.consumed + &earned;
            ledger.debt = &ledger.debt - &repay;

            if repay > BigDecimal::zero() {
                rows.push(candidate(
                    snapshot,
                    round.id,
                    participant.worker_id,
                    SettlementType::CarryCompensation,
                    repay.clone(),
                    BigDecimal::one(),
                ));
            }
            if base > BigDecimal::zero() || repay.is_zero() {
                rows.push(candidate(
                    snapshot,
                    round.id,
                    participant.worker_id,
                    SettlementType::BaseEarning,
                    base,
                    commission.multiplier_for(participant.worker_id),
                ));
            }
        }
    }

    Ok(rows)
}
