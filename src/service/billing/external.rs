// service/billing/external.rs
use bigdecimal::BigDecimal;
use num_traits::Zero;

use crate::{
    models::{dispatchmodel::OrderSnapshot, settlementmodel::CandidateSettlement},
    service::{commission::CommissionSnapshot, error::ServiceError},
    utils::decimal::BigDecimalHelpers,
};

use super::split_round;

pub(super) fn compute(
    snapshot: &OrderSnapshot,
    commission: &CommissionSnapshot,
    pool: &BigDecimal,
) -> Result<Vec<CandidateSettlement>, ServiceError> {
    let mut allocated = BigDecimal::zero();
    let mut rows = Vec::new();

    for round in snapshot.settled_rounds() {
        let amount = snapshot
            .allocations
            .get(&round.id)
            .map(|a| a.round_money())
            .ok_or_else(|| {
                ServiceError::validation(format!("round {} has no income allocation", round.id))
            })?;

        if amount < BigDecimal::zero() {
            return Err(ServiceError::validation(format!(
                "round {} has a negative income allocation",
                round.id
            )));
        }

        allocated = &allocated + &amount;
        if allocated > *pool {
            return Err(ServiceError::validation(format!(
                "income allocations of order {} ({}) exceed its pool {}",
                snapshot.order.id, allocated, pool
            )));
        }

        rows.extend(split_round(snapshot, commission, round, &amount)?);
    }

    Ok(rows)
}
