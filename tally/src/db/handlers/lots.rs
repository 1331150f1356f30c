//! Database repository for purchased credit lots.

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        models::lots::{PurchasedLot, PurchasedLotCreateDBRequest},
    },
    types::UserId,
};

pub const FEATURE_KEY: &str = "ai_credits_purchased";

pub struct Lots<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Lots<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Record a new lot. This is the fulfillment collaborator's write; the
    /// ledger itself only ever sums lots.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, amount = request.amount), err)]
    pub async fn create(&mut self, request: &PurchasedLotCreateDBRequest) -> Result<PurchasedLot> {
        let lot = sqlx::query_as::<_, PurchasedLot>(
            "INSERT INTO purchased_credit_lots (user_id, feature_key, amount, source) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, user_id, amount, source, created_at",
        )
        .bind(request.user_id)
        .bind(FEATURE_KEY)
        .bind(request.amount)
        .bind(&request.source)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(lot)
    }

    /// Aggregate purchased total for a user. Spend order across lots is
    /// irrelevant to the user-facing total, so no per-lot remaining amount is
    /// tracked anywhere.
    #[instrument(skip(self), err)]
    pub async fn sum_for_user(&mut self, user_id: UserId) -> Result<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT \
             FROM purchased_credit_lots \
             WHERE user_id = $1 AND feature_key = $2",
        )
        .bind(user_id)
        .bind(FEATURE_KEY)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(total)
    }

    /// List a user's lots, newest first.
    #[instrument(skip(self), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<PurchasedLot>> {
        let lots = sqlx::query_as::<_, PurchasedLot>(
            "SELECT id, user_id, amount, source, created_at \
             FROM purchased_credit_lots \
             WHERE user_id = $1 AND feature_key = $2 \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .bind(FEATURE_KEY)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(lots)
    }
}
