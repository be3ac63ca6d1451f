// db/settlementdb.rs
use async_trait::async_trait;
use sqlx::{types::{BigDecimal, Json}, Error};
use uuid::Uuid;

use super::db::PgStoreTx;
use crate::models::settlementmodel::*;

const SETTLEMENT_COLUMNS: &str = r#"
    id, order_id, round_id, worker_id, settlement_type, gross_amount, multiplier,
    calculated_earnings, manual_adjustment, final_earnings, payment_status,
    batch_id, created_at, updated_at
"#;

#[async_trait]
pub trait SettlementExt: Send {
    /// Insert-or-update keyed by (round, worker, type). With `replace_adjustment`
    /// the stored manual adjustment is reset, otherwise it is carried over.
    async fn upsert_settlement(
        &mut self,
        row: &CandidateSettlement,
        batch_id: Uuid,
        replace_adjustment: bool,
    ) -> Result<SettlementRecord, Error>;

    async fn get_settlements_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<SettlementRecord>, Error>;

    async fn get_settlement(&mut self, settlement_id: Uuid) -> Result<Option<SettlementRecord>, Error>;

    async fn set_manual_adjustment(
        &mut self,
        settlement_id: Uuid,
        adjustment: &BigDecimal,
    ) -> Result<SettlementRecord, Error>;

    async fn set_payment_status(
        &mut self,
        settlement_id: Uuid,
        status: PaymentStatus,
    ) -> Result<(), Error>;

    async fn delete_settlements(&mut self, settlement_ids: &[Uuid]) -> Result<u64, Error>;

    async fn save_preview(&mut self, preview: &SettlementPreview) -> Result<(), Error>;

    async fn get_preview(&mut self, order_id: Uuid) -> Result<Option<SettlementPreview>, Error>;

    async fn delete_preview(&mut self, order_id: Uuid) -> Result<(), Error>;
}

#[async_trait]
impl SettlementExt for PgStoreTx {
    async fn upsert_settlement(
        &mut self,
        row: &CandidateSettlement,
        batch_id: Uuid,
        replace_adjustment: bool,
    ) -> Result<SettlementRecord, Error> {
        sqlx::query_as::<_, SettlementRecord>(&format!(
            r#"
            INSERT INTO settlement_records
            (id, order_id, round_id, worker_id, settlement_type, gross_amount, multiplier,
             calculated_earnings, manual_adjustment, final_earnings, payment_status, batch_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $8, 'pending', $9)
            ON CONFLICT (round_id, worker_id, settlement_type) DO UPDATE
            SET gross_amount = EXCLUDED.gross_amount,
                multiplier = EXCLUDED.multiplier,
                calculated_earnings = EXCLUDED.calculated_earnings,
                manual_adjustment = CASE WHEN $10 THEN 0
                                         ELSE settlement_records.manual_adjustment END,
                final_earnings = EXCLUDED.calculated_earnings
                                 + CASE WHEN $10 THEN 0
                                        ELSE settlement_records.manual_adjustment END,
                batch_id = EXCLUDED.batch_id,
                updated_at = NOW()
            RETURNING {}
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(row.order_id)
        .bind(row.round_id)
        .bind(row.worker_id)
        .bind(row.settlement_type)
        .bind(&row.gross_amount)
        .bind(&row.multiplier)
        .bind(&row.calculated_earnings)
        .bind(batch_id)
        .bind(replace_adjustment)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn get_settlements_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<SettlementRecord>, Error> {
        sqlx::query_as::<_, SettlementRecord>(&format!(
            r#"
            SELECT {}
            FROM settlement_records
            WHERE order_id = $1
            ORDER BY created_at, round_id, worker_id, settlement_type
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
    }

    async fn get_settlement(&mut self, settlement_id: Uuid) -> Result<Option<SettlementRecord>, Error> {
        sqlx::query_as::<_, SettlementRecord>(&format!(
            "SELECT {} FROM settlement_records WHERE id = $1 FOR UPDATE",
            SETTLEMENT_COLUMNS
        ))
        .bind(settlement_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn set_manual_adjustment(
        &mut self,
        settlement_id: Uuid,
        adjustment: &BigDecimal,
    ) -> Result<SettlementRecord, Error> {
        sqlx::query_as::<_, SettlementRecord>(&format!(
            r#"
            UPDATE settlement_records
            SET manual_adjustment = $2,
                final_earnings = calculated_earnings + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(settlement_id)
        .bind(adjustment)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn set_payment_status(
        &mut self,
        settlement_id: Uuid,
        status: PaymentStatus,
    ) -> Result<(), Error> {
        sqlx::query(
            "UPDATE settlement_records SET payment_status = $2, updated_at = NOW() WHERE id = $1"
        )
        .bind(settlement_id)
        .bind(status)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_settlements(&mut self, settlement_ids: &[Uuid]) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM settlement_records WHERE id = ANY($1)")
            .bind(settlement_ids)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn save_preview(&mut self, preview: &SettlementPreview) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO settlement_previews (order_id, computation, computed_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id) DO UPDATE
            SET computation = EXCLUDED.computation,
                computed_at = EXCLUDED.computed_at,
                expires_at = EXCLUDED.expires_at
            "#
        )
        .bind(preview.order_id)
        .bind(Json(&preview.computation.0))
        .bind(preview.computed_at)
        .bind(preview.expires_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn get_preview(&mut self, order_id: Uuid) -> Result<Option<SettlementPreview>, Error> {
        sqlx::query_as::<_, SettlementPreview>(
            r#"
            SELECT order_id, computation, computed_at, expires_at
            FROM settlement_previews
            WHERE order_id = $1
            "#
        )
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn delete_preview(&mut self, order_id: Uuid) -> Result<(), Error> {
        sqlx::query("DELETE FROM settlement_previews WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }
}
