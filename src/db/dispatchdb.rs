// db/dispatchdb.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, Error};
use uuid::Uuid;

use super::db::PgStoreTx;
use crate::models::{
    dispatchmodel::*,
    settlementmodel::RoundBilling,
};

const ROUND_COLUMNS: &str = r#"
    id, order_id, sequence, status, accepted_at, archived_at, completed_at,
    deduction_minutes, billable_minutes, billable_hours, updated_at
"#;

#[async_trait]
pub trait DispatchExt: Send {
    /// Order, product, rounds, participants and allocations in one read.
    async fn load_order_snapshot(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<OrderSnapshot>, Error>;

    async fn get_round(&mut self, round_id: Uuid) -> Result<Option<DispatchRound>, Error>;

    /// Conditional status change; returns the number of rows that matched `from`.
    async fn transition_round_status(
        &mut self,
        round_id: Uuid,
        from: RoundStatus,
        to: RoundStatus,
    ) -> Result<u64, Error>;

    /// Moves a settling round to archived/completed and stamps the matching timestamp.
    async fn mark_round_settled(
        &mut self,
        round_id: Uuid,
        status: RoundStatus,
        at: DateTime<Utc>,
    ) -> Result<DispatchRound, Error>;

    async fn count_settling_rounds(&mut self, order_id: Uuid) -> Result<i64, Error>;

    async fn record_round_billing(&mut self, billing: &RoundBilling) -> Result<(), Error>;

    async fn upsert_income_allocation(
        &mut self,
        round_id: Uuid,
        amount: BigDecimal,
        entered_by: Uuid,
    ) -> Result<IncomeAllocation, Error>;
}

#[async_trait]
impl DispatchExt for PgStoreTx {
    async fn load_order_snapshot(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<OrderSnapshot>, Error> {
        let order = sqlx::query_as::<_, DispatchOrder>(
            r#"
            SELECT id, product_id, paid_amount, receivable_amount, billing_policy,
                   guaranteed_quota, unit_price, commission_rate, is_gift,
                   dispatcher_id, created_at
            FROM dispatch_orders
            WHERE id = $1
            "#
        )
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(order) = order else {
            return Ok(None);
        };

        let product = sqlx::query_as::<_, Product>(
            "SELECT id, name, category, commission_rate FROM products WHERE id = $1"
        )
        .bind(order.product_id)
        .fetch_one(&mut *self.tx)
        .await?;

        let rounds = sqlx::query_as::<_, DispatchRound>(&format!(
            "SELECT {} FROM dispatch_rounds WHERE order_id = $1 ORDER BY sequence",
            ROUND_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;

        let participants = sqlx::query_as::<_, RoundParticipant>(
            r#"
            SELECT rp.id, rp.round_id, rp.worker_id, rp.accepted_at, rp.rejected_at,
                   rp.contribution, rp.is_active,
                   wt.commission_rate AS tier_commission_rate
            FROM round_participants rp
            JOIN dispatch_rounds dr ON dr.id = rp.round_id
            LEFT JOIN worker_profiles wp ON wp.user_id = rp.worker_id
            LEFT JOIN worker_tiers wt ON wt.id = wp.tier_id
            WHERE dr.order_id = $1
            ORDER BY dr.sequence, rp.accepted_at NULLS LAST, rp.worker_id
            "#
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;

        let allocations: HashMap<Uuid, BigDecimal> = sqlx::query_as::<_, (Uuid, BigDecimal)>(
            "SELECT round_id, amount FROM round_income_allocations WHERE order_id = $1"
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
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
        sqlx::query_as::<_, DispatchRound>(&format!(
            "SELECT {} FROM dispatch_rounds WHERE id = $1",
            ROUND_COLUMNS
        ))
        .bind(round_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn transition_round_status(
        &mut self,
        round_id: Uuid,
        from: RoundStatus,
        to: RoundStatus,
    ) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_rounds
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#
        )
        .bind(round_id)
        .bind(from)
        .bind(to)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_round_settled(
        &mut self,
        round_id: Uuid,
        status: RoundStatus,
        at: DateTime<Utc>,
    ) -> Result<DispatchRound, Error> {
        let archived_at = (status == RoundStatus::Archived).then_some(at);
        let completed_at = (status == RoundStatus::Completed).then_some(at);

        sqlx::query_as::<_, DispatchRound>(&format!(
            r#"
            UPDATE dispatch_rounds
            SET status = $2,
                archived_at = COALESCE($3, archived_at),
                completed_at = COALESCE($4, completed_at),
                updated_at = NOW()
            WHERE id = $1 AND status = 'settling'
            RETURNING {}
            "#,
            ROUND_COLUMNS
        ))
        .bind(round_id)
        .bind(status)
        .bind(archived_at)
        .bind(completed_at)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn count_settling_rounds(&mut self, order_id: Uuid) -> Result<i64, Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM dispatch_rounds WHERE order_id = $1 AND status = 'settling'"
        )
        .bind(order_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count)
    }

    async fn record_round_billing(&mut self, billing: &RoundBilling) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE dispatch_rounds
            SET billable_minutes = $2, billable_hours = $3, updated_at = NOW()
            WHERE id = $1
            "#
        )
        .bind(billing.round_id)
        .bind(billing.billable_minutes)
        .bind(&billing.billable_hours)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn upsert_income_allocation(
        &mut self,
        round_id: Uuid,
        amount: BigDecimal,
        entered_by: Uuid,
    ) -> Result<IncomeAllocation, Error> {
        sqlx::query_as::<_, IncomeAllocation>(
            r#"
            INSERT INTO round_income_allocations (round_id, order_id, amount, entered_by)
            SELECT id, order_id, $2, $3 FROM dispatch_rounds WHERE id = $1
            ON CONFLICT (round_id) DO UPDATE
            SET amount = EXCLUDED.amount,
                entered_by = EXCLUDED.entered_by,
                entered_at = NOW()
            RETURNING round_id, order_id, amount, entered_by, entered_at
            "#
        )
        .bind(round_id)
        .bind(amount)
        .bind(entered_by)
        .fetch_one(&mut *self.tx)
        .await
    }
}
