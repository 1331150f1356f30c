//! Database models for monthly balance rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::period::BillingPeriod;
use crate::types::UserId;

/// One row per (user, period). `usage_count` is the credits remaining in the
/// monthly allowance; it is only ever raised by reconciliation and lowered by
/// the conditional decrement, and is `>= 0` at rest.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonthlyBalance {
    pub id: Uuid,
    pub user_id: UserId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonthlyBalance {
    pub fn period(&self) -> BillingPeriod {
        BillingPeriod {
            starts_on: self.period_start,
            ends_on: self.period_end,
        }
    }
}

/// Database request for creating a new monthly balance row
#[derive(Debug, Clone)]
pub struct MonthlyBalanceCreateDBRequest {
    pub user_id: UserId,
    pub period: BillingPeriod,
    /// Opening balance: the plan's monthly allowance at creation time.
    pub initial_amount: i64,
}
