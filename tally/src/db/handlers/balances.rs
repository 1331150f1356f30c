//! Database repository for monthly balance rows.

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::{DbError, Result},
        models::balances::{MonthlyBalance, MonthlyBalanceCreateDBRequest},
    },
    period::BillingPeriod,
    types::{BalanceId, UserId},
};

/// Balance rows are scoped to this feature key so the table can meter other
/// credit pools later without a schema change.
pub const FEATURE_KEY: &str = "ai_credits";

pub struct Balances<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Balances<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Fetch the balance row for a user's period, if one exists.
    #[instrument(skip(self), err)]
    pub async fn get_for_period(
        &mut self,
        user_id: UserId,
        period: BillingPeriod,
    ) -> Result<Option<MonthlyBalance>> {
        let row = sqlx::query_as::<_, MonthlyBalance>(
            "SELECT id, user_id, period_start, period_end, usage_count, created_at, updated_at \
             FROM monthly_balances \
             WHERE user_id = $1 AND feature_key = $2 AND period_start = $3 AND period_end = $4",
        )
        .bind(user_id)
        .bind(FEATURE_KEY)
        .bind(period.starts_on)
        .bind(period.ends_on)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: BalanceId) -> Result<Option<MonthlyBalance>> {
        let row = sqlx::query_as::<_, MonthlyBalance>(
            "SELECT id, user_id, period_start, period_end, usage_count, created_at, updated_at \
             FROM monthly_balances \
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row)
    }

    /// Insert the row for a period, opening at the plan's allowance.
    ///
    /// The loser of a first-read-of-period race gets `DuplicatePeriod` and
    /// must re-read the winner's row, not retry the insert.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, period = %request.period), err)]
    pub async fn create(&mut self, request: &MonthlyBalanceCreateDBRequest) -> Result<MonthlyBalance> {
        let row = sqlx::query_as::<_, MonthlyBalance>(
            "INSERT INTO monthly_balances (user_id, feature_key, period_start, period_end, usage_count) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, user_id, period_start, period_end, usage_count, created_at, updated_at",
        )
        .bind(request.user_id)
        .bind(FEATURE_KEY)
        .bind(request.period.starts_on)
        .bind(request.period.ends_on)
        .bind(request.initial_amount)
        .fetch_one(&mut *self.db)
        .await
        .map_err(|err| match DbError::from(err) {
            DbError::UniqueViolation { .. } => DbError::DuplicatePeriod {
                user: request.user_id,
                period: request.period,
            },
            other => other,
        })?;

        Ok(row)
    }

    /// The load-bearing operation of the whole subsystem: decrement the
    /// balance only if it can afford `cost`, in one atomic statement.
    ///
    /// The affordability predicate and the decrement are a single UPDATE, so
    /// concurrent deductions serialize on the row and a balance that covers
    /// only one of them admits exactly one winner. Returns the new amount,
    /// or `None` when the row was not updated (missing or unaffordable;
    /// callers re-read to tell the two apart).
    #[instrument(skip(self), err)]
    pub async fn decrement_if_affordable(&mut self, id: BalanceId, cost: i64) -> Result<Option<i64>> {
        let updated = sqlx::query_scalar::<_, i64>(
            "UPDATE monthly_balances \
             SET usage_count = usage_count - $2, updated_at = NOW() \
             WHERE id = $1 AND usage_count >= $2 \
             RETURNING usage_count",
        )
        .bind(id)
        .bind(cost)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(updated)
    }

    /// Monotonic upward reconciliation: set `usage_count` to `new_amount`
    /// only where that raises it. Never lowers a balance. Returns whether a
    /// row was updated.
    #[instrument(skip(self), err)]
    pub async fn top_up(&mut self, id: BalanceId, new_amount: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE monthly_balances \
             SET usage_count = $2, updated_at = NOW() \
             WHERE id = $1 AND usage_count < $2",
        )
        .bind(id)
        .bind(new_amount)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
