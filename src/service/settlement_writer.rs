// service/settlement_writer.rs
use std::collections::HashSet;

use uuid::Uuid;

use crate::{
    db::{DispatchExt, SettlementExt, StoreTx},
    models::settlementmodel::{CandidateSettlement, SettlementComputation, SettlementRecord},
    service::error::ServiceError,
    utils::decimal::zero_money,
};

/// Writes a computation's rows under `batch_id`.
///
/// With `replace_adjustment` unset, stored manual adjustments survive and rows
/// the computation no longer produces are zeroed rather than dropped, so their
/// wallet effects can be reversed by the caller.
pub async fn write_settlements(
    tx: &mut dyn StoreTx,
    computation: &SettlementComputation,
    batch_id: Uuid,
    replace_adjustment: bool,
) -> Result<Vec<SettlementRecord>, ServiceError> {
    let mut records = Vec::with_capacity(computation.rows.len());
    for row in &computation.rows {
        records.push(tx.upsert_settlement(row, batch_id, replace_adjustment).await?);
    }

    if !replace_adjustment {
        let produced: HashSet<_> = computation.rows.iter().map(|r| r.key()).collect();
        let stale: Vec<SettlementRecord> = tx
            .get_settlements_for_order(computation.order_id)
            .await?
            .into_iter()
            .filter(|r| !produced.contains(&r.key()))
            .collect();

        for record in stale {
            tracing::debug!(
                "zeroing settlement {} no longer produced for order {}",
                record.id,
                computation.order_id
            );
            let zeroed = CandidateSettlement {
                order_id: record.order_id,
                round_id: record.round_id,
                worker_id: record.worker_id,
                settlement_type: record.settlement_type,
                gross_amount: zero_money(),
                multiplier: record.multiplier.clone(),
                calculated_earnings: zero_money(),
            };
            records.push(tx.upsert_settlement(&zeroed, batch_id, false).await?);
        }
    }

    for round in &computation.rounds {
        tx.record_round_billing(round).await?;
    }

    tracing::info!(
        "wrote {} settlement rows for order {} in batch {}",
        records.len(),
        computation.order_id,
        batch_id
    );

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory::MemoryStore, LedgerStore};
    use crate::models::dispatchmodel::{BillingPolicy, RoundStatus};
    use crate::service::billing::compute_settlements;
    use crate::service::fixtures::{d, OrderBuilder};

    #[tokio::test]
    async fn test_rewrite_preserves_manual_adjustment() {
        let store = MemoryStore::new();
        let mut builder = OrderBuilder::new(BillingPolicy::DurationBased, "300.00").unit_price("100");
        let round = builder.round(RoundStatus::Completed, 0, 60);
        builder.participant(round, Uuid::new_v4(), 0);
        let computation = compute_settlements(&builder.build()).unwrap();

        let mut tx = store.begin().await.unwrap();
        let first = write_settlements(tx.as_mut(), &computation, Uuid::new_v4(), false).await.unwrap();
        tx.set_manual_adjustment(first[0].id, &d("15.00")).await.unwrap();

        let second = write_settlements(tx.as_mut(), &computation, Uuid::new_v4(), false).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].manual_adjustment, d("15.00"));
        assert_eq!(second[0].final_earnings, d("315.00"));

        let replaced = write_settlements(tx.as_mut(), &computation, Uuid::new_v4(), true).await.unwrap();
        assert_eq!(replaced[0].manual_adjustment, d("0"));
        assert_eq!(replaced[0].final_earnings, d("300.00"));
    }

    #[tokio::test]
    async fn test_rows_no_longer_produced_are_zeroed() {
        let store = MemoryStore::new();
        let mut builder = OrderBuilder::new(BillingPolicy::DurationBased, "300.00").unit_price("100");
        let round = builder.round(RoundStatus::Completed, 0, 60);
        builder.participant(round, Uuid::new_v4(), 0);
        let dropped = Uuid::new_v4();
        builder.participant(round, dropped, 0);

        let mut tx = store.begin().await.unwrap();
        let before = compute_settlements(&builder.build()).unwrap();
        write_settlements(tx.as_mut(), &before, Uuid::new_v4(), false).await.unwrap();

        builder.participants.retain(|p| p.worker_id != dropped);
        let after = compute_settlements(&builder.build()).unwrap();
        let records = write_settlements(tx.as_mut(), &after, Uuid::new_v4(), false).await.unwrap();

        let zeroed = records.iter().find(|r| r.worker_id == dropped).unwrap();
        assert_eq!(zeroed.final_earnings, d("0"));
        assert_eq!(records.iter().find(|r| r.worker_id != dropped).unwrap().final_earnings, d("300.00"));
    }
}
