// db/db.rs
use async_trait::async_trait;
use sqlx::{Pool, Postgres, Transaction};

use super::{
    auditdb::AuditExt,
    dispatchdb::DispatchExt,
    settlementdb::SettlementExt,
    walletdb::WalletExt,
};

/// One open unit of work. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait StoreTx: DispatchExt + SettlementExt + WalletExt + AuditExt + Send {
    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error>;

    /// Marks a point the transaction can roll back to without aborting.
    async fn savepoint(&mut self, name: &str) -> Result<(), sqlx::Error>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), sqlx::Error>;

    async fn release_savepoint(&mut self, name: &str) -> Result<(), sqlx::Error>;
}

/// Opens transactions against whatever backs the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, sqlx::Error>;
}

#[derive(Clone)]
pub struct DBClient {
    pub pool: Pool<Postgres>,
}

impl std::fmt::Debug for DBClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBClient")
            .field("pool", &"Pool<Postgres>")
            .field("size", &self.pool.size())
            .finish()
    }
}

impl DBClient {
    pub fn new(pool: Pool<Postgres>) -> Self {
        DBClient { pool }
    }

    /// Get pool status for monitoring
    pub fn pool_status(&self) -> (u32, usize) {
        (self.pool.size(), self.pool.num_idle())
    }
}

pub struct PgStoreTx {
    pub(crate) tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), sqlx::Error> {
        sqlx::query(&format!("SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), sqlx::Error> {
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), sqlx::Error> {
        sqlx::query(&format!("RELEASE SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for DBClient {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, sqlx::Error> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }
}
