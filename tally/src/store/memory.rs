//! In-memory ledger store.
//!
//! Backs tests and embedded single-process deployments. Every mutation of a
//! balance happens under that entry's map lock, the in-process equivalent of
//! the row-level serialization Postgres gives us: the affordability check
//! and the decrement are one critical section, and period-row creation is
//! insert-if-absent on the (user, period) key.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::db::errors::{DbError, Result};
use crate::db::models::balances::MonthlyBalance;
use crate::db::models::config::CreditsConfigRecord;
use crate::db::models::lots::PurchasedLot;
use crate::period::BillingPeriod;
use crate::store::{CasOutcome, ConfigSource, LedgerStore};
use crate::types::{BalanceId, UserId};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    balances: DashMap<BalanceId, MonthlyBalance>,
    by_period: DashMap<(UserId, BillingPeriod), BalanceId>,
    lots: DashMap<UserId, Vec<PurchasedLot>>,
    config: RwLock<Option<CreditsConfigRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a purchased lot, standing in for the external fulfillment
    /// collaborator. Mirrors the database check: the amount must be positive.
    pub fn grant_lot(&self, user: UserId, amount: i64, source: Option<String>) -> Result<PurchasedLot> {
        if amount <= 0 {
            return Err(DbError::CheckViolation {
                constraint: Some("purchased_credit_lots_amount_check".to_string()),
                table: Some("purchased_credit_lots".to_string()),
                message: format!("lot amount must be positive, got {amount}"),
            });
        }
        let lot = PurchasedLot {
            id: Uuid::new_v4(),
            user_id: user,
            amount,
            source,
            created_at: Utc::now(),
        };
        self.inner.lots.entry(user).or_default().push(lot.clone());
        Ok(lot)
    }

    /// Install or replace the stored configuration record.
    pub fn put_config(&self, record: CreditsConfigRecord) {
        let mut config = self
            .inner
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *config = Some(record);
    }

    /// Number of monthly balance rows held for a user, across all periods.
    pub fn monthly_row_count(&self, user: UserId) -> usize {
        self.inner
            .balances
            .iter()
            .filter(|entry| entry.value().user_id == user)
            .count()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn monthly_balance(
        &self,
        user: UserId,
        period: BillingPeriod,
    ) -> Result<Option<MonthlyBalance>> {
        let Some(id) = self.inner.by_period.get(&(user, period)).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.inner.balances.get(&id).map(|row| row.value().clone()))
    }

    async fn create_monthly_balance(
        &self,
        user: UserId,
        period: BillingPeriod,
        initial_amount: i64,
    ) -> Result<MonthlyBalance> {
        if initial_amount < 0 {
            return Err(DbError::CheckViolation {
                constraint: Some("monthly_balances_usage_count_check".to_string()),
                table: Some("monthly_balances".to_string()),
                message: format!("usage_count must be non-negative, got {initial_amount}"),
            });
        }
        match self.inner.by_period.entry((user, period)) {
            Entry::Occupied(_) => Err(DbError::DuplicatePeriod { user, period }),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let row = MonthlyBalance {
                    id: Uuid::new_v4(),
                    user_id: user,
                    period_start: period.starts_on,
                    period_end: period.ends_on,
                    usage_count: initial_amount,
                    created_at: now,
                    updated_at: now,
                };
                // Publish the row before the period index so a reader that
                // finds the id always finds the row.
                self.inner.balances.insert(row.id, row.clone());
                slot.insert(row.id);
                Ok(row)
            }
        }
    }

    async fn compare_and_decrement(&self, balance: BalanceId, cost: i64) -> Result<CasOutcome> {
        let Some(mut row) = self.inner.balances.get_mut(&balance) else {
            return Err(DbError::NotFound);
        };
        if row.usage_count >= cost {
            row.usage_count -= cost;
            row.updated_at = Utc::now();
            Ok(CasOutcome::Applied {
                remaining: row.usage_count,
            })
        } else {
            Ok(CasOutcome::Insufficient {
                balance: row.usage_count,
            })
        }
    }

    async fn top_up(&self, balance: BalanceId, new_amount: i64) -> Result<()> {
        let Some(mut row) = self.inner.balances.get_mut(&balance) else {
            return Err(DbError::NotFound);
        };
        if new_amount > row.usage_count {
            row.usage_count = new_amount;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn sum_purchased_lots(&self, user: UserId) -> Result<i64> {
        Ok(self
            .inner
            .lots
            .get(&user)
            .map(|lots| lots.iter().map(|lot| lot.amount).sum())
            .unwrap_or(0))
    }
}

#[async_trait]
impl ConfigSource for InMemoryStore {
    async fn load_overrides(&self) -> Result<Option<CreditsConfigRecord>> {
        let config = self
            .inner
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn period() -> BillingPeriod {
        BillingPeriod::containing(Utc.with_ymd_and_hms(2026, 8, 4, 9, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_create_is_insert_if_absent() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();

        let row = store.create_monthly_balance(user, period(), 50).await.unwrap();
        assert_eq!(row.usage_count, 50);

        let err = store.create_monthly_balance(user, period(), 50).await.unwrap_err();
        assert!(matches!(err, DbError::DuplicatePeriod { .. }));
        assert_eq!(store.monthly_row_count(user), 1);
    }

    #[tokio::test]
    async fn test_compare_and_decrement_refuses_unaffordable() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let row = store.create_monthly_balance(user, period(), 5).await.unwrap();

        let outcome = store.compare_and_decrement(row.id, 15).await.unwrap();
        assert_eq!(outcome, CasOutcome::Insufficient { balance: 5 });

        // Nothing changed: the same 5 credits are still spendable.
        let outcome = store.compare_and_decrement(row.id, 5).await.unwrap();
        assert_eq!(outcome, CasOutcome::Applied { remaining: 0 });
    }

    #[tokio::test]
    async fn test_decrement_to_exactly_zero() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let row = store.create_monthly_balance(user, period(), 10).await.unwrap();

        let outcome = store.compare_and_decrement(row.id, 10).await.unwrap();
        assert_eq!(outcome, CasOutcome::Applied { remaining: 0 });
    }

    #[tokio::test]
    async fn test_top_up_is_upward_only() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let row = store.create_monthly_balance(user, period(), 30).await.unwrap();

        store.top_up(row.id, 200).await.unwrap();
        let balance = store.monthly_balance(user, period()).await.unwrap().unwrap();
        assert_eq!(balance.usage_count, 200);

        // A lower target must not claw anything back.
        store.top_up(row.id, 10).await.unwrap();
        let balance = store.monthly_balance(user, period()).await.unwrap().unwrap();
        assert_eq!(balance.usage_count, 200);
    }

    #[tokio::test]
    async fn test_lot_amount_must_be_positive() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();

        let err = store.grant_lot(user, 0, None).unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));

        store.grant_lot(user, 25, Some("pix-9931".to_string())).unwrap();
        assert_eq!(store.sum_purchased_lots(user).await.unwrap(), 25);
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_decrements_admit_one_winner() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let row = store.create_monthly_balance(user, period(), 5).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            let id = row.id;
            tasks.push(tokio::spawn(async move {
                store.compare_and_decrement(id, 5).await.unwrap()
            }));
        }

        let outcomes = futures::future::join_all(tasks).await;
        let applied = outcomes
            .iter()
            .filter(|o| matches!(o.as_ref().unwrap(), CasOutcome::Applied { .. }))
            .count();
        assert_eq!(applied, 1);

        let balance = store.monthly_balance(user, period()).await.unwrap().unwrap();
        assert_eq!(balance.usage_count, 0);
    }
}
