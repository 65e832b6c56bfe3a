//! Entitlement resolution
//!
//! Answers the question: "may this user touch this module right now?"
//!
//! ## Design Principles
//!
//! 1. **Single Source of Truth**: every module-gated operation consults
//!    this resolver; no call site re-derives plan comparisons
//! 2. **Deterministic**: pure functions over (subscription, module), no I/O
//! 3. **Catalog-driven**: plan ordering and synonym equivalence come from
//!    the catalog's rank function, never from string comparisons

use karvico_shared::{Module, Plan, Subscription};
use serde::Serialize;
use std::sync::Arc;

use crate::catalog::PlanCatalog;

/// The allow/deny decision for a (subscription, module) pair.
///
/// On denial, `required_plan` names the lowest plan that would grant
/// access, so the caller can render an actionable upgrade prompt instead
/// of a generic failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessDecision {
    pub module: Module,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_plan: Option<Plan>,
}

/// The single entitlement authority
#[derive(Clone)]
pub struct EntitlementResolver {
    catalog: Arc<PlanCatalog>,
}

impl EntitlementResolver {
    pub fn new(catalog: Arc<PlanCatalog>) -> Self {
        Self { catalog }
    }

    /// True iff the subscription may access the module.
    ///
    /// Rank-0 modules are available to every authenticated caller no
    /// matter what the subscription says. Everything else requires an
    /// active status and a sufficient plan rank. The subscription is
    /// expected to be normalized (see the state loader); this function
    /// performs no I/O and no further normalization.
    pub fn can_access(&self, subscription: &Subscription, module: Module) -> bool {
        if self.catalog.is_always_free(module) {
            return true;
        }
        subscription.is_active()
            && self.catalog.rank_of(subscription.plan) >= self.catalog.min_rank_for(module)
    }

    /// The full decision, including the minimum plan on denial
    pub fn check_access(&self, subscription: &Subscription, module: Module) -> AccessDecision {
        let allowed = self.can_access(subscription, module);
        AccessDecision {
            module,
            allowed,
            required_plan: if allowed {
                None
            } else {
                Some(self.catalog.required_plan_for(module))
            },
        }
    }

    /// All modules the subscription can currently reach
    pub fn accessible_modules(&self, subscription: &Subscription) -> Vec<Module> {
        Module::ALL
            .into_iter()
            .filter(|module| self.can_access(subscription, *module))
            .collect()
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }
}
