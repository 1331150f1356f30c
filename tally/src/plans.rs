//! The plan resolution seam.
//!
//! Which plan a user is effectively on is subscription business logic that
//! lives outside this crate (active paid subscription first, then the legacy
//! plan-type mapping, then a credit-bearing service subscription). The ledger
//! only consumes the result and never re-implements those rules.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::types::{PlanId, UserId};

/// Resolves the currently effective plan for a user.
///
/// `Ok(None)` means the user has no credit-bearing plan; the ledger then
/// opens their monthly balance at 0. An `Err` is an infrastructure failure
/// of the resolver itself, not "no plan".
#[async_trait]
pub trait PlanResolver: Send + Sync {
    async fn effective_plan(&self, user: UserId) -> anyhow::Result<Option<PlanId>>;
}

/// Fixed user-to-plan mapping.
///
/// Stands in for the real subscription system in tests and single-tenant
/// embeddings. The default instance resolves every user to no plan.
#[derive(Debug, Default)]
pub struct FixedPlanResolver {
    plans: DashMap<UserId, PlanId>,
}

impl FixedPlanResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a plan to a user, replacing any previous assignment.
    pub fn assign(&self, user: UserId, plan: PlanId) {
        self.plans.insert(user, plan);
    }

    /// Remove a user's plan assignment.
    pub fn clear(&self, user: UserId) {
        self.plans.remove(&user);
    }
}

#[async_trait]
impl PlanResolver for FixedPlanResolver {
    async fn effective_plan(&self, user: UserId) -> anyhow::Result<Option<PlanId>> {
        Ok(self.plans.get(&user).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl<P: PlanResolver + ?Sized> PlanResolver for std::sync::Arc<P> {
    async fn effective_plan(&self, user: UserId) -> anyhow::Result<Option<PlanId>> {
        (**self).effective_plan(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_fixed_resolver_round_trip() {
        let resolver = FixedPlanResolver::new();
        let user = Uuid::new_v4();

        assert_eq!(resolver.effective_plan(user).await.unwrap(), None);

        resolver.assign(user, PlanId::from("gogh_essencial"));
        assert_eq!(
            resolver.effective_plan(user).await.unwrap(),
            Some(PlanId::from("gogh_essencial"))
        );

        resolver.clear(user);
        assert_eq!(resolver.effective_plan(user).await.unwrap(), None);
    }
}
