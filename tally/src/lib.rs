//! # tally: Metered Credit Accounting Ledger
//!
//! `tally` tracks a per-user, per-billing-period allowance of AI action
//! credits, blends it with non-expiring purchased credit lots for display,
//! prices heterogeneous actions, and guarantees that concurrent consumption
//! never drives a balance negative.
//!
//! ## Overview
//!
//! Products that meter AI usage face a small but sharp accounting problem:
//! two browser tabs clicking "generate" at the same time must not both spend
//! the last credits, a user whose plan was upgraded mid-month must see the
//! new allowance without losing what they already spent elsewhere, and the
//! first request of a new month must open the month exactly once however
//! many requests race for it. This crate is that accounting component and
//! nothing else: authentication, plan business rules, payments and HTTP
//! framing all stay outside and talk to the ledger through narrow seams.
//!
//! ### What It Does
//!
//! [`CreditLedger`] exposes two operations. [`CreditLedger::balance`]
//! lazily opens the calendar-month balance row at the plan's allowance,
//! reconciles it upward if an administrator raised the allowance after the
//! row was created, and returns the monthly and purchased totals together
//! with the per-action price table. [`CreditLedger::deduct`] resolves the
//! cost of an action and spends it from the monthly balance through a
//! single atomic compare-and-decrement; an unaffordable action comes back
//! as a typed [`Error::InsufficientCredits`] carrying the observed balance
//! and the required cost, distinct from any infrastructure failure.
//!
//! ## Architecture
//!
//! The ledger itself is stateless and holds no locks across calls; it is
//! built to be invoked from a horizontally-scaled request tier where all
//! coordination happens in storage. The **store layer** ([`store`]) defines
//! the [`LedgerStore`] seam whose one load-bearing operation is the
//! conditional decrement: check and mutation must be a single serialized
//! step per balance row. [`PostgresStore`] implements it as one conditional
//! `UPDATE` through the repositories in [`db`]; [`InMemoryStore`] gives the
//! same guarantee on in-process entry locks for tests and embedded use.
//!
//! The **configuration layer** ([`config`]) resolves per-action costs and
//! per-plan allowances from hard-coded defaults, an optional static file
//! with environment overrides, and a stored singleton record, in that
//! order. Lookups never fail; absent configuration is the defaults path.
//!
//! The **plan seam** ([`plans`]) is consumed, never implemented, here:
//! which plan a user is effectively on is subscription business logic, and
//! the ledger only turns its answer into an opening allowance.
//!
//! ## Usage
//!
//! ```no_run
//! use tally::{ActionId, CreditLedger, FixedPlanResolver, PlanId, PostgresStore};
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgresql://localhost/tally").await?;
//! store.run_migrations().await?;
//!
//! let plans = FixedPlanResolver::new();
//! let user = Uuid::new_v4();
//! plans.assign(user, PlanId::from("gogh_essencial"));
//!
//! let ledger = CreditLedger::new(store, plans);
//! let view = ledger.balance(user).await?;
//! println!("{} credits available", view.total);
//!
//! let action: ActionId = "video".parse()?;
//! let receipt = ledger.deduct(user, action, None).await?;
//! println!("{} credits left this month", receipt.balance);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod metrics;
pub mod period;
pub mod plans;
pub mod store;
pub mod types;

pub use config::{ConfigResolver, CreditsConfig};
pub use errors::{Error, Result};
pub use ledger::{BalanceView, CreditLedger, DeductReceipt};
pub use period::BillingPeriod;
pub use plans::{FixedPlanResolver, PlanResolver};
pub use store::{CasOutcome, ConfigSource, InMemoryStore, LedgerStore, PostgresStore};
pub use types::{ActionId, BalanceId, PlanId, UserId};
