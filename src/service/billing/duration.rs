// service/billing/duration.rs
use bigdecimal::BigDecimal;
use num_traits::Zero;

use crate::{
    models::{
        dispatchmodel::{DispatchRound, OrderSnapshot, RoundStatus},
        settlementmodel::{CandidateSettlement, RoundBilling},
    },
    service::{commission::CommissionSnapshot, error::ServiceError},
    utils::decimal::BigDecimalHelpers,
};

use super::split_round;

/// Whole hours plus a bucket for the leftover minutes:
/// under 18 adds nothing, 18 to 45 adds half an hour, over 45 a full hour.
pub fn billable_hours(minutes: i64) -> BigDecimal {
    let minutes = minutes.max(0);
    let whole = BigDecimal::from(minutes / 60);
    let extra = minutes % 60;

    if extra < 18 {
        whole
    } else if extra <= 45 {
        whole + BigDecimal::new(5.into(), 1)
    } else {
        whole + BigDecimal::from(1)
    }
}

fn billable_minutes(snapshot: &OrderSnapshot, round: &DispatchRound) -> Result<i64, ServiceError> {
    let ended_at = round.ended_at().ok_or_else(|| {
        ServiceError::validation(format!("round {} has no end time", round.id))
    })?;

    let started_at = snapshot
        .accepted_participants_of(round.id)
        .iter()
        .filter_map(|p| p.accepted_at)
        .min()
        .or(round.accepted_at)
        .ok_or_else(|| {
            ServiceError::validation(format!("round {} was never accepted", round.id))
        })?;

    let elapsed = (ended_at - started_at).num_minutes();
    Ok((elapsed - i64::from(round.deduction_minutes)).max(0))
}

pub(super) fn compute(
    snapshot: &OrderSnapshot,
    commission: &CommissionSnapshot,
    pool: &BigDecimal,
) -> Result<(Vec<CandidateSettlement>, Vec<RoundBilling>), ServiceError> {
    let unit_price = snapshot.order.unit_price.as_ref().ok_or_else(|| {
        ServiceError::validation(format!(
            "duration-based order {} has no unit price",
            snapshot.order.id
        ))
    })?;

    let mut remaining = pool.clone();
    let mut rows = Vec::new();
    let mut billing = Vec::new();

    for round in snapshot.settled_rounds() {
        let has_workers = !snapshot.accepted_participants_of(round.id).is_empty();
        let terminal = round.status == RoundStatus::Completed;

        if terminal && !has_workers {
            return Err(ServiceError::validation(format!(
                "completed round {} has no accepted participants",
                round.id
            )));
        }

        let minutes = if has_workers { billable_minutes(snapshot, round)? } else { 0 };
        let hours = billable_hours(minutes);

        let gross = if terminal {
            remaining.clone()
        } else {
            let priced = (&hours * unit_price).round_money();
            if priced > remaining { remaining.clone() } else { priced }
        };
        let gross = if gross < BigDecimal::zero() { BigDecimal::zero() } else { gross };
        remaining = &remaining - &gross;

        tracing::debug!(
            "round {} billed {} minutes ({} h), gross {}",
            round.id,
            minutes,
            hours,
            gross
        );

        rows.extend(split_round(snapshot, commission, round, &gross)?);
        billing.push(RoundBilling {
            round_id: round.id,
            billable_minutes: i32::try_from(minutes).unwrap_or(i32::MAX),
            billable_hours: hours,
            gross_amount: gross,
        });
    }

    Ok((rows, billing))
}
