// service/billing/mod.rs
//! Billing calculators. Each one is a pure function of an `OrderSnapshot`;
//! nothing in here touches a store.
mod duration;
mod external;
mod quota;

use bigdecimal::BigDecimal;
use num_traits::{One, Zero};
use uuid::Uuid;

use crate::{
    models::{
        dispatchmodel::{BillingPolicy, DispatchRound, OrderSnapshot},
        settlementmodel::{CandidateSettlement, SettlementComputation, SettlementType},
    },
    service::{commission::CommissionSnapshot, error::ServiceError},
    utils::decimal::{split_evenly, BigDecimalHelpers},
};

pub use duration::billable_hours;

/// Flat share of the pool paid to the order's dispatcher on completion.
pub const COORDINATOR_SHARE_PERCENT: i64 = 1;

pub fn compute_settlements(snapshot: &OrderSnapshot) -> Result<SettlementComputation, ServiceError> {
    let pool = snapshot.order.pool_basis().round_money();
    if pool < BigDecimal::zero() {
        return Err(ServiceError::validation(format!(
            "order {} has a negative pool basis {}",
            snapshot.order.id, pool
        )));
    }

    let commission = CommissionSnapshot::from_order(snapshot);

    let (mut rows, rounds) = match snapshot.order.billing_policy {
        BillingPolicy::DurationBased => duration::compute(snapshot, &commission, &pool)?,
        BillingPolicy::QuotaBased => (quota::compute(snapshot, &commission, &pool)?, Vec::new()),
        BillingPolicy::ExternallyAllocated => {
            (external::compute(snapshot, &commission, &pool)?, Vec::new())
        }
    };

    if let Some(row) = coordinator_row(snapshot, &pool) {
        rows.push(row);
    }

    tracing::debug!(
        "computed {} settlement rows for order {} ({:?}, pool {})",
        rows.len(),
        snapshot.order.id,
        snapshot.order.billing_policy,
        pool
    );

    Ok(SettlementComputation {
        order_id: snapshot.order.id,
        billing_policy: snapshot.order.billing_policy,
        pool,
        rows,
        rounds,
    })
}

fn coordinator_row(snapshot: &OrderSnapshot, pool: &BigDecimal) -> Option<CandidateSettlement> {
    let round = snapshot.completed_round()?;
    let dispatcher_id = snapshot.order.dispatcher_id?;
    if !snapshot.product.category.pays_coordinator_share() {
        return None;
    }

    let gross = (pool * BigDecimal::from(COORDINATOR_SHARE_PERCENT) / BigDecimal::from(100)).round_money();
    Some(candidate(
        snapshot,
        round.id,
        dispatcher_id,
        SettlementType::ServiceCoordinator,
        gross,
        BigDecimal::one(),
    ))
}

pub(crate) fn candidate(
    snapshot: &OrderSnapshot,
    round_id: Uuid,
    worker_id: Uuid,
    settlement_type: SettlementType,
    gross: BigDecimal,
    multiplier: BigDecimal,
) -> CandidateSettlement {
    let calculated_earnings = (&gross * &multiplier).round_money();
    CandidateSettlement {
        order_id: snapshot.order.id,
        round_id,
        worker_id,
        settlement_type,
        gross_amount: gross,
        multiplier,
        calculated_earnings,
    }
}

/// Splits a round's gross evenly among its accepted participants as base earnings.
pub(crate) fn split_round(
    snapshot: &OrderSnapshot,
    commission: &CommissionSnapshot,
    round: &DispatchRound,
    gross: &BigDecimal,
) -> Result<Vec<CandidateSettlement>, ServiceError> {
    let participants = snapshot.accepted_participants_of(round.id);
    if participants.is_empty() {
        if gross.is_zero() {
            return Ok(Vec::new());
        }
        return Err(ServiceError::validation(format!(
            "round {} has {} to distribute but no accepted participants",
            round.id, gross
        )));
    }

    let shares = split_evenly(gross, participants.len());
    Ok(participants
        .into_iter()
        .zip(shares)
        .map(|(p, share)| {
            candidate(
                snapshot,
                round.id,
                p.worker_id,
                SettlementType::BaseEarning,
                share,
                commission.multiplier_for(p.worker_id),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dispatchmodel::{ProductCategory, RoundStatus};
    use crate::service::fixtures::{d, OrderBuilder};

    fn completed_duration_order(category: ProductCategory, dispatcher: Option<Uuid>) -> OrderBuilder {
        let mut builder = OrderBuilder::new(BillingPolicy::DurationBased, "1000.00")
            .unit_price("100")
            .category(category);
        if let Some(id) = dispatcher {
            builder = builder.dispatcher(id);
        }
        let round = builder.round(RoundStatus::Completed, 0, 120);
        builder.participant(round, Uuid::new_v4(), 0);
        builder
    }

    #[test]
    fn test_coordinator_row_is_one_percent() {
        let dispatcher = Uuid::new_v4();
        let snapshot = completed_duration_order(ProductCategory::Standard, Some(dispatcher)).build();
        let result = compute_settlements(&snapshot).unwrap();

        let row = result
            .rows
            .iter()
            .find(|r| r.settlement_type == SettlementType::ServiceCoordinator)
            .unwrap();
        assert_eq!(row.worker_id, dispatcher);
        assert_eq!(row.gross_amount, d("10.00"));
        assert_eq!(row.calculated_earnings, d("10.00"));
        assert_eq!(result.distributed_gross(), d("1000.00"));
    }

    #[test]
    fn test_trial_orders_pay_no_coordinator_share() {
        let snapshot = completed_duration_order(ProductCategory::Trial, Some(Uuid::new_v4())).build();
        let result = compute_settlements(&snapshot).unwrap();
        assert!(result
            .rows
            .iter()
            .all(|r| r.settlement_type != SettlementType::ServiceCoordinator));
    }

    #[test]
    fn test_no_coordinator_row_before_completion() {
        let mut builder = OrderBuilder::new(BillingPolicy::DurationBased, "1000.00")
            .unit_price("100")
            .dispatcher(Uuid::new_v4());
        let round = builder.round(RoundStatus::Archived, 0, 60);
        builder.participant(round, Uuid::new_v4(), 0);

        let result = compute_settlements(&builder.build()).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].settlement_type, SettlementType::BaseEarning);
    }

    #[test]
    fn test_gift_orders_use_receivable_amount() {
        let mut builder = OrderBuilder::new(BillingPolicy::DurationBased, "0")
            .unit_price("100")
            .gift("400.00");
        let round = builder.round(RoundStatus::Completed, 0, 60);
        builder.participant(round, Uuid::new_v4(), 0);

        let result = compute_settlements(&builder.build()).unwrap();
        assert_eq!(result.pool, d("400.00"));
        assert_eq!(result.rows[0].gross_amount, d("400.00"));
    }

    #[test]
    fn test_commission_applied_to_calculated_earnings() {
        let mut builder = OrderBuilder::new(BillingPolicy::DurationBased, "500.00")
            .unit_price("100")
            .order_rate("20");
        let round = builder.round(RoundStatus::Completed, 0, 60);
        builder.participant(round, Uuid::new_v4(), 0);

        let result = compute_settlements(&builder.build()).unwrap();
        assert_eq!(result.rows[0].gross_amount, d("500.00"));
        assert_eq!(result.rows[0].multiplier, d("0.8"));
        assert_eq!(result.rows[0].calculated_earnings, d("400.00"));
    }
}
