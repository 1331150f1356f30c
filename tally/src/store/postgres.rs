//! Postgres-backed ledger store.
//!
//! Thin pool-holding wrapper over the [`crate::db::handlers`] repositories.
//! The atomicity story lives in the SQL: the conditional decrement and the
//! monotonic top-up are single UPDATE statements, so Postgres row locking
//! serializes concurrent writers per balance row and nothing here needs an
//! application-level lock.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::db::errors::{DbError, Result};
use crate::db::handlers::{Balances, ConfigRecords, Lots};
use crate::db::models::balances::{MonthlyBalance, MonthlyBalanceCreateDBRequest};
use crate::db::models::config::CreditsConfigRecord;
use crate::db::models::lots::{PurchasedLot, PurchasedLotCreateDBRequest};
use crate::period::BillingPeriod;
use crate::store::{CasOutcome, ConfigSource, LedgerStore};
use crate::types::{BalanceId, UserId};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small default pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| DbError::Other(anyhow::Error::from(err)))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Record a purchased lot on behalf of the fulfillment collaborator.
    pub async fn record_lot(&self, request: &PurchasedLotCreateDBRequest) -> Result<PurchasedLot> {
        let mut conn = self.pool.acquire().await?;
        Lots::new(&mut conn).create(request).await
    }

    /// A user's lots, newest first (admin/display surface).
    pub async fn list_lots(&self, user: UserId) -> Result<Vec<PurchasedLot>> {
        let mut conn = self.pool.acquire().await?;
        Lots::new(&mut conn).list_for_user(user).await
    }

    /// Overwrite the stored configuration record.
    pub async fn put_config(&self, record: &CreditsConfigRecord) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        ConfigRecords::new(&mut conn).upsert(record).await
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn monthly_balance(
        &self,
        user: UserId,
        period: BillingPeriod,
    ) -> Result<Option<MonthlyBalance>> {
        let mut conn = self.pool.acquire().await?;
        Balances::new(&mut conn).get_for_period(user, period).await
    }

    async fn create_monthly_balance(
        &self,
        user: UserId,
        period: BillingPeriod,
        initial_amount: i64,
    ) -> Result<MonthlyBalance> {
        let mut conn = self.pool.acquire().await?;
        let request = MonthlyBalanceCreateDBRequest {
            user_id: user,
            period,
            initial_amount,
        };
        Balances::new(&mut conn).create(&request).await
    }

    async fn compare_and_decrement(&self, balance: BalanceId, cost: i64) -> Result<CasOutcome> {
        let mut conn = self.pool.acquire().await?;
        let mut repo = Balances::new(&mut conn);
        if let Some(remaining) = repo.decrement_if_affordable(balance, cost).await? {
            return Ok(CasOutcome::Applied { remaining });
        }
        // No row updated: the balance is either gone or cannot afford the
        // cost. Re-read to tell the two apart; the observed amount is for
        // the caller's message only, the refusal itself was atomic.
        match repo.get_by_id(balance).await? {
            Some(row) => Ok(CasOutcome::Insufficient {
                balance: row.usage_count,
            }),
            None => Err(DbError::NotFound),
        }
    }

    async fn top_up(&self, balance: BalanceId, new_amount: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Balances::new(&mut conn).top_up(balance, new_amount).await?;
        Ok(())
    }

    async fn sum_purchased_lots(&self, user: UserId) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Lots::new(&mut conn).sum_for_user(user).await
    }
}

#[async_trait]
impl ConfigSource for PostgresStore {
    async fn load_overrides(&self) -> Result<Option<CreditsConfigRecord>> {
        let mut conn = self.pool.acquire().await?;
        ConfigRecords::new(&mut conn).get().await
    }
}
