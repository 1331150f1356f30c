//! Credit ledger orchestration.
//!
//! [`CreditLedger`] ties the period calculator, the plan resolver, the
//! configuration and the store together into the two operations callers see:
//! [`CreditLedger::balance`] and [`CreditLedger::deduct`].
//!
//! The ledger itself is stateless between calls. Everything that has to be
//! serialized (the conditional decrement, the insert-if-absent period row,
//! the monotonic top-up) is serialized by the store, so any number of
//! request handlers can share one ledger or build their own.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::{ConfigResolver, CreditsConfig};
use crate::db::errors::DbError;
use crate::db::models::balances::MonthlyBalance;
use crate::errors::{Error, Result};
use crate::metrics;
use crate::period::BillingPeriod;
use crate::plans::PlanResolver;
use crate::store::{CasOutcome, ConfigSource, LedgerStore};
use crate::types::{ActionId, UserId, abbrev_uuid};

/// Snapshot of a user's spendable credits for the current period.
///
/// `total` blends the monthly balance with the purchased cushion for
/// display. The per-action cost table rides along so a caller can render
/// affordability without a second round trip.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceView {
    pub total: i64,
    pub monthly: i64,
    pub purchased: i64,
    pub period: BillingPeriod,
    pub cost_by_action: HashMap<ActionId, i64>,
}

/// Result of a successful deduction.
#[derive(Debug, Clone, Serialize)]
pub struct DeductReceipt {
    pub action: ActionId,
    pub cost: i64,
    /// Monthly credits remaining after the deduction.
    pub balance: i64,
    pub period: BillingPeriod,
}

pub struct CreditLedger<S, P> {
    store: S,
    plans: P,
    config: ConfigResolver<S>,
}

impl<S, P> CreditLedger<S, P>
where
    S: LedgerStore + ConfigSource + Clone,
    P: PlanResolver,
{
    pub fn new(store: S, plans: P) -> Self {
        let config = ConfigResolver::new(store.clone());
        Self {
            store,
            plans,
            config,
        }
    }

    /// Use `base` underneath the stored overrides instead of the hard-coded
    /// defaults (for embedders that load a static config file).
    pub fn with_base_config(store: S, plans: P, base: CreditsConfig) -> Self {
        let config = ConfigResolver::with_base(store.clone(), base);
        Self {
            store,
            plans,
            config,
        }
    }

    /// The user's balance for the current period, creating the period row on
    /// first contact and reconciling it upward against the plan's current
    /// allowance.
    pub async fn balance(&self, user: UserId) -> Result<BalanceView> {
        self.balance_at(user, Utc::now()).await
    }

    #[instrument(skip(self, now), fields(user = %abbrev_uuid(&user)), err)]
    pub async fn balance_at(&self, user: UserId, now: DateTime<Utc>) -> Result<BalanceView> {
        let period = BillingPeriod::containing(now);
        let config = self.config.load().await;
        let allowance = self.current_allowance(user, &config).await?;
        let row = self.fetch_or_create(user, period, allowance).await?;

        // Upward-only reconciliation, evaluated on every read: an allowance
        // raised after period creation lands here. A stored balance at or
        // above the allowance is left alone.
        let monthly = if allowance > row.usage_count {
            self.store.top_up(row.id, allowance).await?;
            metrics::record_reconciliation_top_up();
            debug!(
                user = %abbrev_uuid(&user),
                from = row.usage_count,
                to = allowance,
                "reconciled monthly balance to current allowance"
            );
            allowance
        } else {
            row.usage_count
        };

        let purchased = self.store.sum_purchased_lots(user).await?;
        Ok(BalanceView {
            total: monthly + purchased,
            monthly,
            purchased,
            period,
            cost_by_action: config.cost_table(),
        })
    }

    /// Spend credits on one action.
    ///
    /// `amount` overrides the configured cost when it is positive; zero or
    /// negative overrides fall back to the table. Draws exclusively from the
    /// monthly balance; purchased lots are a display cushion and are never
    /// drawn down here.
    pub async fn deduct(
        &self,
        user: UserId,
        action: ActionId,
        amount: Option<i64>,
    ) -> Result<DeductReceipt> {
        self.deduct_at(user, action, amount, Utc::now()).await
    }

    // No `err` on the instrument: an insufficient balance is an expected
    // outcome and must not show up in logs as a failure.
    #[instrument(skip(self, now), fields(user = %abbrev_uuid(&user), action = %action))]
    pub async fn deduct_at(
        &self,
        user: UserId,
        action: ActionId,
        amount: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<DeductReceipt> {
        let period = BillingPeriod::containing(now);
        let config = self.config.load().await;
        let cost = amount.filter(|a| *a > 0).unwrap_or_else(|| config.cost_of(action));

        // Lazy creation only. Deduction never reconciles: granting credits
        // mid-deduction would let a stale allowance mask a real shortfall.
        let allowance = self.current_allowance(user, &config).await?;
        let row = self.fetch_or_create(user, period, allowance).await?;

        match self.store.compare_and_decrement(row.id, cost).await? {
            CasOutcome::Applied { remaining } => {
                metrics::record_deduction(action.as_str(), cost);
                debug!(cost, remaining, "deducted credits");
                Ok(DeductReceipt {
                    action,
                    cost,
                    balance: remaining,
                    period,
                })
            }
            CasOutcome::Insufficient { balance } => {
                metrics::record_deduction_rejected();
                debug!(cost, balance, "deduction refused, insufficient credits");
                Err(Error::InsufficientCredits {
                    balance,
                    required: cost,
                })
            }
        }
    }

    async fn current_allowance(&self, user: UserId, config: &CreditsConfig) -> Result<i64> {
        let plan = self.plans.effective_plan(user).await.map_err(Error::Plan)?;
        Ok(config.allowance_for(plan.as_ref()))
    }

    /// Fetch the period row, creating it lazily on first contact. The loser
    /// of a concurrent creation race re-reads the winner's row; the race is
    /// absorbed here and never surfaced.
    async fn fetch_or_create(
        &self,
        user: UserId,
        period: BillingPeriod,
        initial_amount: i64,
    ) -> Result<MonthlyBalance> {
        if let Some(row) = self.store.monthly_balance(user, period).await? {
            return Ok(row);
        }
        match self
            .store
            .create_monthly_balance(user, period, initial_amount)
            .await
        {
            Ok(row) => Ok(row),
            Err(DbError::DuplicatePeriod { .. }) => {
                warn!(
                    user = %abbrev_uuid(&user),
                    %period,
                    "lost monthly row creation race, re-reading"
                );
                self.store
                    .monthly_balance(user, period)
                    .await?
                    .ok_or(Error::Database(DbError::NotFound))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::config::CreditsConfigRecord;
    use crate::plans::FixedPlanResolver;
    use crate::store::InMemoryStore;
    use crate::types::PlanId;
    use chrono::TimeZone;
    use std::sync::Arc;
    use uuid::Uuid;

    type TestLedger = CreditLedger<InMemoryStore, Arc<FixedPlanResolver>>;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 4, 10, 0, 0).unwrap()
    }

    fn setup() -> (TestLedger, InMemoryStore, Arc<FixedPlanResolver>, UserId) {
        let store = InMemoryStore::new();
        let plans = Arc::new(FixedPlanResolver::new());
        let ledger = CreditLedger::new(store.clone(), plans.clone());
        (ledger, store, plans, Uuid::new_v4())
    }

    fn allowance_override(plan: &str, allowance: i64) -> CreditsConfigRecord {
        CreditsConfigRecord {
            monthly_allowance_by_plan: [(plan.to_string(), allowance)].into(),
            cost_by_action: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_new_user_opens_at_plan_allowance() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));

        let view = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(view.total, 50);
        assert_eq!(view.monthly, 50);
        assert_eq!(view.purchased, 0);
        assert_eq!(view.period, BillingPeriod::containing(now()));
        assert_eq!(view.cost_by_action[&ActionId::Video], 10);
        assert_eq!(store.monthly_row_count(user), 1);
    }

    #[tokio::test]
    async fn test_repeated_reads_are_idempotent() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));

        let first = ledger.balance_at(user, now()).await.unwrap();
        let second = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(first.total, second.total);
        assert_eq!(store.monthly_row_count(user), 1);
    }

    #[tokio::test]
    async fn test_deduct_reduces_monthly_balance() {
        let (ledger, _store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));

        let receipt = ledger.deduct_at(user, ActionId::Video, None, now()).await.unwrap();
        assert_eq!(receipt.cost, 10);
        assert_eq!(receipt.balance, 40);
    }

    #[tokio::test]
    async fn test_insufficient_credits_reports_balance_and_required() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));
        store.put_config(allowance_override("gogh_essencial", 5));

        let action: ActionId = "roteiro".parse().unwrap();
        let err = ledger.deduct_at(user, action, None, now()).await.unwrap_err();
        match err {
            Error::InsufficientCredits { balance, required } => {
                assert_eq!(balance, 5);
                assert_eq!(required, 15);
            }
            other => panic!("expected InsufficientCredits, got {other:?}"),
        }

        // The refused deduction changed nothing.
        let period = BillingPeriod::containing(now());
        let row = store.monthly_balance(user, period).await.unwrap().unwrap();
        assert_eq!(row.usage_count, 5);
    }

    #[tokio::test]
    async fn test_reconciliation_raises_to_exactly_the_new_allowance() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));
        store.put_config(allowance_override("gogh_essencial", 30));

        let view = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(view.monthly, 30);

        // Admin raises the plan's allowance after the row exists.
        store.put_config(allowance_override("gogh_essencial", 200));
        let view = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(view.monthly, 200);

        let period = BillingPeriod::containing(now());
        let row = store.monthly_balance(user, period).await.unwrap().unwrap();
        assert_eq!(row.usage_count, 200);
    }

    #[tokio::test]
    async fn test_reconciliation_is_set_not_add() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));
        store.put_config(allowance_override("gogh_essencial", 30));

        ledger.balance_at(user, now()).await.unwrap();
        ledger
            .deduct_at(user, ActionId::Video, None, now())
            .await
            .unwrap();

        store.put_config(allowance_override("gogh_essencial", 200));
        let view = ledger.balance_at(user, now()).await.unwrap();
        // Exactly the allowance, not allowance + remainder.
        assert_eq!(view.monthly, 200);
    }

    #[tokio::test]
    async fn test_reconciliation_never_lowers() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));
        store.put_config(allowance_override("gogh_essencial", 200));

        let view = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(view.monthly, 200);

        // Allowance drops; the stored balance must not be clawed back.
        store.put_config(allowance_override("gogh_essencial", 50));
        let view = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(view.monthly, 200);
    }

    #[tokio::test]
    async fn test_deduct_does_not_reconcile() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));
        store.put_config(allowance_override("gogh_essencial", 5));

        // Row opens at 5.
        ledger.balance_at(user, now()).await.unwrap();

        // Allowance is raised, but deduct must not grant the new credits
        // mid-transaction: the stored 5 cannot afford a cost of 15.
        store.put_config(allowance_override("gogh_essencial", 200));
        let err = ledger
            .deduct_at(user, ActionId::Script, None, now())
            .await
            .unwrap_err();
        assert!(err.is_insufficient_credits());
    }

    #[tokio::test]
    async fn test_purchased_lots_are_display_only() {
        let (ledger, store, _plans, user) = setup();
        store.grant_lot(user, 25, Some("pix-1204".to_string())).unwrap();

        // No plan: monthly balance opens at 0, purchased cushion shows in
        // the total.
        let view = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(view.total, 25);
        assert_eq!(view.monthly, 0);
        assert_eq!(view.purchased, 25);

        // Monthly-only spend policy: the cushion is not spendable.
        let err = ledger
            .deduct_at(user, ActionId::Video, None, now())
            .await
            .unwrap_err();
        match err {
            Error::InsufficientCredits { balance, required } => {
                assert_eq!(balance, 0);
                assert_eq!(required, 10);
            }
            other => panic!("expected InsufficientCredits, got {other:?}"),
        }

        // And deduction attempts never touch the lots.
        assert_eq!(store.sum_purchased_lots(user).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_lots_survive_successful_deductions() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));
        store.grant_lot(user, 40, None).unwrap();

        for _ in 0..3 {
            ledger
                .deduct_at(user, ActionId::Photo, None, now())
                .await
                .unwrap();
        }
        assert_eq!(store.sum_purchased_lots(user).await.unwrap(), 40);

        let view = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(view.purchased, 40);
    }

    #[tokio::test]
    async fn test_explicit_amount_overrides_cost_when_positive() {
        let (ledger, _store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));

        let receipt = ledger
            .deduct_at(user, ActionId::Video, Some(7), now())
            .await
            .unwrap();
        assert_eq!(receipt.cost, 7);
        assert_eq!(receipt.balance, 43);

        // Zero and negative overrides fall back to the table.
        let receipt = ledger
            .deduct_at(user, ActionId::Video, Some(0), now())
            .await
            .unwrap();
        assert_eq!(receipt.cost, 10);
        let receipt = ledger
            .deduct_at(user, ActionId::Video, Some(-4), now())
            .await
            .unwrap();
        assert_eq!(receipt.cost, 10);
    }

    #[tokio::test]
    async fn test_deduct_creates_the_period_row_lazily() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));

        // First contact in the period is a deduction, not a read.
        let receipt = ledger
            .deduct_at(user, ActionId::Video, None, now())
            .await
            .unwrap();
        assert_eq!(receipt.balance, 40);
        assert_eq!(store.monthly_row_count(user), 1);
    }

    #[tokio::test]
    async fn test_unknown_plan_grants_nothing() {
        let (ledger, _store, plans, user) = setup();
        plans.assign(user, PlanId::from("mystery_tier"));

        let view = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(view.monthly, 0);
    }

    #[tokio::test]
    async fn test_new_period_is_a_new_row() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));

        ledger
            .deduct_at(user, ActionId::Vangogh, None, now())
            .await
            .unwrap();

        // The next month starts fresh at the allowance; the old row is
        // superseded, not mutated.
        let next_month = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let view = ledger.balance_at(user, next_month).await.unwrap();
        assert_eq!(view.monthly, 50);
        assert_eq!(store.monthly_row_count(user), 2);

        let august = BillingPeriod::containing(now());
        let row = store.monthly_balance(user, august).await.unwrap().unwrap();
        assert_eq!(row.usage_count, 30);
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_deductions_admit_exactly_one_winner() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));
        store.put_config(allowance_override("gogh_essencial", 5));

        // Materialize the row at 5 before racing.
        ledger.balance_at(user, now()).await.unwrap();

        let ledger = Arc::new(ledger);
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger.deduct_at(user, ActionId::Photo, Some(5), now()).await
            }));
        }

        let outcomes = futures::future::join_all(tasks).await;
        let (mut wins, mut refusals) = (0, 0);
        for outcome in outcomes {
            match outcome.unwrap() {
                Ok(receipt) => {
                    assert_eq!(receipt.balance, 0);
                    wins += 1;
                }
                Err(Error::InsufficientCredits { balance, required }) => {
                    assert_eq!(balance, 0);
                    assert_eq!(required, 5);
                    refusals += 1;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((wins, refusals), (1, 1));

        // Never negative at rest.
        let period = BillingPeriod::containing(now());
        let row = store.monthly_balance(user, period).await.unwrap().unwrap();
        assert_eq!(row.usage_count, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_first_reads_create_one_row() {
        let (ledger, store, plans, user) = setup();
        plans.assign(user, PlanId::from("gogh_essencial"));

        let ledger = Arc::new(ledger);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(
                async move { ledger.balance_at(user, now()).await },
            ));
        }

        for outcome in futures::future::join_all(tasks).await {
            let view = outcome.unwrap().unwrap();
            assert_eq!(view.total, 50);
        }
        assert_eq!(store.monthly_row_count(user), 1);
    }

    #[tokio::test]
    async fn test_pre_existing_row_wins_over_allowance() {
        let (ledger, store, _plans, user) = setup();
        let period = BillingPeriod::containing(now());
        store.create_monthly_balance(user, period, 42).await.unwrap();

        // No plan means allowance 0, which never lowers the stored 42.
        let view = ledger.balance_at(user, now()).await.unwrap();
        assert_eq!(view.monthly, 42);
    }

    struct FailingPlanResolver;

    #[async_trait::async_trait]
    impl PlanResolver for FailingPlanResolver {
        async fn effective_plan(&self, _user: UserId) -> anyhow::Result<Option<PlanId>> {
            Err(anyhow::anyhow!("subscription service timed out"))
        }
    }

    #[tokio::test]
    async fn test_plan_resolver_failure_is_an_infrastructure_error() {
        let store = InMemoryStore::new();
        let ledger = CreditLedger::new(store, FailingPlanResolver);
        let err = ledger.balance_at(Uuid::new_v4(), now()).await.unwrap_err();
        assert!(matches!(err, Error::Plan(_)));
        assert!(!err.is_insufficient_credits());
    }
}
