// db/walletdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, Error};
use uuid::Uuid;

use super::db::PgStoreTx;
use crate::models::walletmodels::*;

const TRANSACTION_COLUMNS: &str = r#"
    id, user_id, order_id, amount, direction, status, business_type,
    source_type, source_id, balance_after_available, balance_after_frozen,
    description, created_at, updated_at
"#;

const HOLD_COLUMNS: &str = r#"
    id, transaction_id, user_id, amount, unlock_at, status, created_at, released_at
"#;

#[async_trait]
pub trait WalletExt: Send {
    async fn get_account(&mut self, user_id: Uuid) -> Result<Option<WalletAccount>, Error>;

    /// Increments both buckets in place (creating the account on first use)
    /// and returns the post-operation balances.
    async fn apply_balance_delta(
        &mut self,
        user_id: Uuid,
        delta: &BalanceDelta,
    ) -> Result<WalletAccount, Error>;

    /// Looks a transaction up by its idempotency key, locking the row.
    async fn find_transaction_by_source(
        &mut self,
        key: &SourceKey,
    ) -> Result<Option<WalletTransaction>, Error>;

    async fn get_transaction(&mut self, transaction_id: Uuid) -> Result<Option<WalletTransaction>, Error>;

    async fn insert_transaction(
        &mut self,
        new: &NewWalletTransaction,
        balance_after: &WalletAccount,
    ) -> Result<WalletTransaction, Error>;

    async fn update_transaction(
        &mut self,
        transaction_id: Uuid,
        amount: &BigDecimal,
        direction: Direction,
        status: TransactionStatus,
        balance_after: &WalletAccount,
    ) -> Result<WalletTransaction, Error>;

    async fn get_transactions_for_user(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<WalletTransaction>, Error>;

    async fn get_transactions_by_sources(
        &mut self,
        source_type: SourceType,
        source_ids: &[Uuid],
    ) -> Result<Vec<WalletTransaction>, Error>;

    /// Every settlement-sourced transaction booked against the order, whether or
    /// not its settlement row still exists.
    async fn get_settlement_transactions_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<WalletTransaction>, Error>;

    async fn delete_transactions(&mut self, transaction_ids: &[Uuid]) -> Result<u64, Error>;

    /// Creates the hold for a frozen transaction or resets an existing one to frozen.
    async fn upsert_hold(
        &mut self,
        transaction_id: Uuid,
        user_id: Uuid,
        amount: &BigDecimal,
        unlock_at: DateTime<Utc>,
    ) -> Result<WalletHold, Error>;

    async fn get_hold_for_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> Result<Option<WalletHold>, Error>;

    async fn set_hold_status(
        &mut self,
        hold_id: Uuid,
        status: HoldStatus,
        released_at: Option<DateTime<Utc>>,
    ) -> Result<(), Error>;

    /// Frozen holds due at `now`, oldest first, skipping rows other workers hold
    /// and the ids in `skip`.
    async fn claim_due_holds(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
        skip: &[Uuid],
    ) -> Result<Vec<WalletHold>, Error>;

    async fn delete_holds_for_transactions(&mut self, transaction_ids: &[Uuid]) -> Result<u64, Error>;
}

#[async_trait]
impl WalletExt for PgStoreTx {
    async fn get_account(&mut self, user_id: Uuid) -> Result<Option<WalletAccount>, Error> {
        sqlx::query_as::<_, WalletAccount>(
            r#"
            SELECT user_id, available_balance, frozen_balance, updated_at
            FROM wallet_accounts
            WHERE user_id = $1
            "#
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn apply_balance_delta(
        &mut self,
        user_id: Uuid,
        delta: &BalanceDelta,
    ) -> Result<WalletAccount, Error> {
        sqlx::query_as::<_, WalletAccount>(
            r#"
            INSERT INTO wallet_accounts (user_id, available_balance, frozen_balance)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET available_balance = wallet_accounts.available_balance + EXCLUDED.available_balance,
                frozen_balance = wallet_accounts.frozen_balance + EXCLUDED.frozen_balance,
                updated_at = NOW()
            RETURNING user_id, available_balance, frozen_balance, updated_at
            "#
        )
        .bind(user_id)
        .bind(&delta.available)
        .bind(&delta.frozen)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn find_transaction_by_source(
        &mut self,
        key: &SourceKey,
    ) -> Result<Option<WalletTransaction>, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            SELECT {}
            FROM wallet_transactions
            WHERE source_type = $1 AND source_id = $2
            FOR UPDATE
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(key.source_type)
        .bind(key.source_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn get_transaction(&mut self, transaction_id: Uuid) -> Result<Option<WalletTransaction>, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {} FROM wallet_transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn insert_transaction(
        &mut self,
        new: &NewWalletTransaction,
        balance_after: &WalletAccount,
    ) -> Result<WalletTransaction, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            INSERT INTO wallet_transactions
            (user_id, order_id, amount, direction, status, business_type, source_type,
             source_id, balance_after_available, balance_after_frozen, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.order_id)
        .bind(&new.amount)
        .bind(new.direction)
        .bind(new.status)
        .bind(new.business_type)
        .bind(new.source.source_type)
        .bind(new.source.source_id)
        .bind(&balance_after.available_balance)
        .bind(&balance_after.frozen_balance)
        .bind(&new.description)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn update_transaction(
        &mut self,
        transaction_id: Uuid,
        amount: &BigDecimal,
        direction: Direction,
        status: TransactionStatus,
        balance_after: &WalletAccount,
    ) -> Result<WalletTransaction, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            UPDATE wallet_transactions
            SET amount = $2,
                direction = $3,
                status = $4,
                balance_after_available = $5,
                balance_after_frozen = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(amount)
        .bind(direction)
        .bind(status)
        .bind(&balance_after.available_balance)
        .bind(&balance_after.frozen_balance)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn get_transactions_for_user(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<WalletTransaction>, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {} FROM wallet_transactions WHERE user_id = $1 ORDER BY created_at, id",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await
    }

    async fn get_transactions_by_sources(
        &mut self,
        source_type: SourceType,
        source_ids: &[Uuid],
    ) -> Result<Vec<WalletTransaction>, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            SELECT {}
            FROM wallet_transactions
            WHERE source_type = $1 AND source_id = ANY($2)
            ORDER BY created_at, id
            FOR UPDATE
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(source_type)
        .bind(source_ids)
        .fetch_all(&mut *self.tx)
        .await
    }

    async fn get_settlement_transactions_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<WalletTransaction>, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            SELECT {}
            FROM wallet_transactions
            WHERE order_id = $1 AND source_type = 'settlement'
            ORDER BY created_at, id
            FOR UPDATE
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
    }

    async fn delete_transactions(&mut self, transaction_ids: &[Uuid]) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM wallet_transactions WHERE id = ANY($1)")
            .bind(transaction_ids)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_hold(
        &mut self,
        transaction_id: Uuid,
        user_id: Uuid,
        amount: &BigDecimal,
        unlock_at: DateTime<Utc>,
    ) -> Result<WalletHold, Error> {
        sqlx::query_as::<_, WalletHold>(&format!(
            r#"
            INSERT INTO wallet_holds (transaction_id, user_id, amount, unlock_at, status)
            VALUES ($1, $2, $3, $4, 'frozen')
            ON CONFLICT (transaction_id) DO UPDATE
            SET amount = EXCLUDED.amount,
                unlock_at = EXCLUDED.unlock_at,
                status = 'frozen',
                released_at = NULL
            RETURNING {}
            "#,
            HOLD_COLUMNS
        ))
        .bind(transaction_id)
        .bind(user_id)
        .bind(amount)
        .bind(unlock_at)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn get_hold_for_transaction(
        &mut self,
        transaction_id: Uuid,
    ) -> Result<Option<WalletHold>, Error> {
        sqlx::query_as::<_, WalletHold>(&format!(
            "SELECT {} FROM wallet_holds WHERE transaction_id = $1 FOR UPDATE",
            HOLD_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn set_hold_status(
        &mut self,
        hold_id: Uuid,
        status: HoldStatus,
        released_at: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE wallet_holds SET status = $2, released_at = $3 WHERE id = $1")
            .bind(hold_id)
            .bind(status)
            .bind(released_at)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn claim_due_holds(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
        skip: &[Uuid],
    ) -> Result<Vec<WalletHold>, Error> {
        sqlx::query_as::<_, WalletHold>(&format!(
            r#"
            SELECT {}
            FROM wallet_holds
            WHERE status = 'frozen' AND unlock_at <= $1 AND NOT (id = ANY($3))
            ORDER BY unlock_at, id
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
            HOLD_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.tx)
        .await
    }

    async fn delete_holds_for_transactions(&mut self, transaction_ids: &[Uuid]) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM wallet_holds WHERE transaction_id = ANY($1)")
            .bind(transaction_ids)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }
}
