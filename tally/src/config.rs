//! Credits configuration: per-action costs and per-plan monthly allowances.
//!
//! Configuration resolves in three layers, lowest priority first:
//!
//! 1. **Hard-coded defaults** - lookups never fail; an entry missing from
//!    every layer falls back here.
//! 2. **Static file + environment** - a YAML file merged with `TALLY_`
//!    prefixed environment variables, for embedders that configure
//!    statically. Nested values use double underscores, e.g.
//!    `TALLY_COST_BY_ACTION__VIDEO=12`.
//! 3. **The stored record** - the singleton row in configuration storage,
//!    merged entry by entry over the base on every load by
//!    [`ConfigResolver`].
//!
//! Absence of configuration is never an error condition for this subsystem;
//! it is the "use defaults" path.

use std::collections::HashMap;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::models::config::CreditsConfigRecord;
use crate::store::ConfigSource;
use crate::types::{ActionId, PlanId};

/// Hard-coded fallback cost per action.
pub fn default_cost(action: ActionId) -> i64 {
    match action {
        ActionId::Photo => 5,
        ActionId::Video => 10,
        ActionId::Script => 15,
        ActionId::Prompts => 1,
        ActionId::Vangogh => 20,
    }
}

/// Hard-coded fallback allowance per plan. A plan outside this table grants
/// no monthly credits.
pub fn default_allowance(plan: &PlanId) -> Option<i64> {
    match plan.as_str() {
        "gogh_essencial" => Some(50),
        "gogh_profissional" => Some(200),
        "gogh_estudio" => Some(500),
        _ => None,
    }
}

fn default_costs() -> HashMap<ActionId, i64> {
    ActionId::ALL
        .iter()
        .map(|&action| (action, default_cost(action)))
        .collect()
}

fn default_allowances() -> HashMap<PlanId, i64> {
    ["gogh_essencial", "gogh_profissional", "gogh_estudio"]
        .iter()
        .filter_map(|&plan| {
            let plan = PlanId::from(plan);
            default_allowance(&plan).map(|allowance| (plan, allowance))
        })
        .collect()
}

/// The effective cost and allowance tables.
///
/// Values are whole credits and non-negative. Both maps may be sparse;
/// [`CreditsConfig::cost_of`] and [`CreditsConfig::allowance_for`] fall back
/// to the hard-coded defaults per entry rather than failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreditsConfig {
    pub monthly_allowance_by_plan: HashMap<PlanId, i64>,
    pub cost_by_action: HashMap<ActionId, i64>,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            monthly_allowance_by_plan: default_allowances(),
            cost_by_action: default_costs(),
        }
    }
}

impl CreditsConfig {
    /// Load the static configuration from a YAML file with `TALLY_`
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    pub fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("TALLY_").split("__"))
    }

    /// Cost of one action in credits. Never fails.
    pub fn cost_of(&self, action: ActionId) -> i64 {
        self.cost_by_action
            .get(&action)
            .copied()
            .unwrap_or_else(|| default_cost(action))
    }

    /// Monthly allowance for an optional plan. No plan, or a plan with no
    /// entry in any layer, grants 0.
    pub fn allowance_for(&self, plan: Option<&PlanId>) -> i64 {
        let Some(plan) = plan else { return 0 };
        self.monthly_allowance_by_plan
            .get(plan)
            .copied()
            .or_else(|| default_allowance(plan))
            .unwrap_or(0)
    }

    /// The full per-action cost table, with fallbacks applied. Returned to
    /// balance callers so they can render affordability without a second
    /// round trip.
    pub fn cost_table(&self) -> HashMap<ActionId, i64> {
        ActionId::ALL
            .iter()
            .map(|&action| (action, self.cost_of(action)))
            .collect()
    }

    /// Merge a stored record over this config, entry by entry.
    ///
    /// Action keys are validated here: this is the boundary where the open
    /// string enumeration in storage meets the closed [`ActionId`] set.
    /// Unknown keys and negative values are dropped with a warning, never
    /// treated as errors.
    pub fn apply_record(&mut self, record: &CreditsConfigRecord) {
        for (plan, &allowance) in &record.monthly_allowance_by_plan {
            if allowance < 0 {
                warn!(plan = %plan, allowance, "dropping negative allowance from stored credits config");
                continue;
            }
            self.monthly_allowance_by_plan
                .insert(PlanId::new(plan.clone()), allowance);
        }
        for (action, &cost) in &record.cost_by_action {
            match action.parse::<ActionId>() {
                Ok(action_id) if cost >= 0 => {
                    self.cost_by_action.insert(action_id, cost);
                }
                Ok(_) => {
                    warn!(action = %action, cost, "dropping negative cost from stored credits config");
                }
                Err(_) => {
                    warn!(action = %action, "dropping unknown action key from stored credits config");
                }
            }
        }
    }
}

/// Resolves the effective configuration for one ledger operation: the stored
/// overrides merged over a base (defaults, unless the embedder loaded a
/// static file).
///
/// Loaded fresh per operation and threaded through it, so a single balance
/// or deduct call always sees one consistent snapshot. A storage failure
/// degrades to the base with a warning; config lookups never fail the
/// caller.
#[derive(Debug, Clone)]
pub struct ConfigResolver<C> {
    source: C,
    base: CreditsConfig,
}

impl<C: ConfigSource> ConfigResolver<C> {
    pub fn new(source: C) -> Self {
        Self::with_base(source, CreditsConfig::default())
    }

    pub fn with_base(source: C, base: CreditsConfig) -> Self {
        Self { source, base }
    }

    pub async fn load(&self) -> CreditsConfig {
        let mut config = self.base.clone();
        match self.source.load_overrides().await {
            Ok(Some(record)) => config.apply_record(&record),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "failed to load stored credits config, falling back to base");
            }
        }
        config
    }
}
