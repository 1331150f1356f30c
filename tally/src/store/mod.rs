//! The persistence seam of the ledger.
//!
//! All coordination between concurrent requests happens through a
//! [`LedgerStore`]; the ledger holds no locks across calls and keeps no
//! shared in-process state, so it can run on a stateless, horizontally
//! scaled request tier. [`postgres::PostgresStore`] is the production
//! implementation. [`memory::InMemoryStore`] provides the same
//! serialization guarantees on in-process entry locks for tests and
//! embedded use.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::db::errors::Result;
use crate::db::models::balances::MonthlyBalance;
use crate::db::models::config::CreditsConfigRecord;
use crate::period::BillingPeriod;
use crate::types::{BalanceId, UserId};

/// Outcome of the atomic conditional decrement.
///
/// An unaffordable cost is a data-carrying outcome, not an error: the store
/// reports the balance it observed so the caller can say how many credits
/// are missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The decrement was applied; `remaining` is the balance after it.
    Applied { remaining: i64 },
    /// The balance could not afford the cost; nothing was changed.
    Insufficient { balance: i64 },
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// The monthly balance row for a user's period, if it exists.
    async fn monthly_balance(
        &self,
        user: UserId,
        period: BillingPeriod,
    ) -> Result<Option<MonthlyBalance>>;

    /// Insert the row for a period, opening at `initial_amount`.
    ///
    /// Insert-if-absent: the loser of a concurrent creation race gets
    /// [`crate::db::errors::DbError::DuplicatePeriod`] and must re-read the
    /// winner's row rather than retry the insert.
    async fn create_monthly_balance(
        &self,
        user: UserId,
        period: BillingPeriod,
        initial_amount: i64,
    ) -> Result<MonthlyBalance>;

    /// Atomically decrement `usage_count` by `cost` if and only if the
    /// balance can afford it, check and mutation in one step.
    ///
    /// Must be linearizable per balance row: with balance 5 and two
    /// concurrent cost-5 decrements, exactly one may be `Applied`. A
    /// read-then-write implementation is a defect, not a simplification.
    async fn compare_and_decrement(&self, balance: BalanceId, cost: i64) -> Result<CasOutcome>;

    /// Raise `usage_count` to exactly `new_amount` if that is an increase.
    /// Never lowers a balance.
    async fn top_up(&self, balance: BalanceId, new_amount: i64) -> Result<()>;

    /// Aggregate purchased credits for a user.
    async fn sum_purchased_lots(&self, user: UserId) -> Result<i64>;
}

/// Read access to the stored credits configuration record.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load_overrides(&self) -> Result<Option<CreditsConfigRecord>>;
}
