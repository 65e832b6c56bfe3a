//! Plan catalog
//!
//! Static description of the plan ladder: the rank of every tier, the
//! minimum rank each product module requires, and the mapping from Stripe
//! price identifiers to plans. Entitlements are cumulative, so the full
//! module set per plan is precomputed here at construction time and the
//! rank ordering is validated before the service starts taking requests.
//!
//! This catalog is the single source of truth for plan ordering and
//! synonym equivalence. Nothing else in the workspace compares plan names.

use karvico_shared::{Module, Plan};
use std::collections::{BTreeSet, HashMap};

use crate::client::PriceIds;
use crate::error::{BillingError, BillingResult};

/// Rank per canonical plan, lowest first
const PLAN_RANKS: [(Plan, u8); 4] = [
    (Plan::Free, 0),
    (Plan::Silver, 1),
    (Plan::Pro, 2),
    (Plan::Enterprise, 3),
];

/// Minimum plan rank per module. Rank-0 modules are available to every
/// authenticated user regardless of subscription state.
const MODULE_RANKS: [(Module, u8); 9] = [
    (Module::Dashboard, 0),
    (Module::MembersArea, 0),
    (Module::Crm, 1),
    (Module::Scheduling, 1),
    (Module::Courses, 1),
    (Module::AiAnalytics, 2),
    (Module::FinancialReports, 2),
    (Module::Automations, 2),
    (Module::WhiteLabel, 3),
];

/// The plan catalog, built once at startup
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    ranks: HashMap<Plan, u8>,
    min_ranks: HashMap<Module, u8>,
    modules_by_plan: HashMap<Plan, BTreeSet<Module>>,
    price_to_plan: HashMap<String, Plan>,
    default_paid_plan: Plan,
}

impl PlanCatalog {
    /// Build the catalog from the built-in plan and module tables plus the
    /// deployment's price identifiers.
    pub fn new(price_ids: &PriceIds) -> BillingResult<Self> {
        Self::from_tables(&PLAN_RANKS, &MODULE_RANKS, price_ids)
    }

    /// Build a catalog from explicit tables. Fails fast when the rank
    /// ordering is not total or a module requires a rank no plan reaches.
    pub fn from_tables(
        plans: &[(Plan, u8)],
        modules: &[(Module, u8)],
        price_ids: &PriceIds,
    ) -> BillingResult<Self> {
        let mut ranks = HashMap::new();
        for (plan, rank) in plans {
            if ranks.insert(*plan, *rank).is_some() {
                return Err(BillingError::Config(format!(
                    "plan {} listed twice in rank table",
                    plan
                )));
            }
        }
        for plan in Plan::ALL {
            if !ranks.contains_key(&plan) {
                return Err(BillingError::Config(format!(
                    "plan {} missing from rank table",
                    plan
                )));
            }
        }
        let mut seen_ranks: Vec<u8> = ranks.values().copied().collect();
        seen_ranks.sort_unstable();
        seen_ranks.dedup();
        if seen_ranks.len() != ranks.len() {
            return Err(BillingError::Config(
                "plan rank ordering is ambiguous: two plans share a rank".to_string(),
            ));
        }

        let max_rank = seen_ranks.last().copied().unwrap_or(0);

        let mut min_ranks = HashMap::new();
        for (module, min_rank) in modules {
            if min_ranks.insert(*module, *min_rank).is_some() {
                return Err(BillingError::Config(format!(
                    "module {} listed twice in module table",
                    module
                )));
            }
            if *min_rank > max_rank {
                return Err(BillingError::Config(format!(
                    "module {} requires rank {} but the highest plan rank is {}",
                    module, min_rank, max_rank
                )));
            }
        }

        // Precompute the cumulative module set per plan
        let mut modules_by_plan: HashMap<Plan, BTreeSet<Module>> = HashMap::new();
        for (plan, rank) in &ranks {
            let set = min_ranks
                .iter()
                .filter(|(_, min_rank)| **min_rank <= *rank)
                .map(|(module, _)| *module)
                .collect();
            modules_by_plan.insert(*plan, set);
        }

        // Monotonicity: a higher rank must never unlock fewer modules
        let mut by_rank: Vec<(u8, &BTreeSet<Module>)> = ranks
            .iter()
            .filter_map(|(plan, rank)| modules_by_plan.get(plan).map(|set| (*rank, set)))
            .collect();
        by_rank.sort_by_key(|(rank, _)| *rank);
        for pair in by_rank.windows(2) {
            let (lower, higher) = (&pair[0], &pair[1]);
            if !lower.1.is_subset(higher.1) {
                return Err(BillingError::Config(format!(
                    "entitlements are not monotonic between ranks {} and {}",
                    lower.0, higher.0
                )));
            }
        }

        let default_paid_plan = ranks
            .iter()
            .filter(|(_, rank)| **rank > 0)
            .min_by_key(|(_, rank)| **rank)
            .map(|(plan, _)| *plan)
            .ok_or_else(|| {
                BillingError::Config("rank table contains no paid plan".to_string())
            })?;

        let mut price_to_plan = HashMap::new();
        if let Some(id) = &price_ids.silver {
            price_to_plan.insert(id.clone(), Plan::Silver);
        }
        if let Some(id) = &price_ids.pro {
            price_to_plan.insert(id.clone(), Plan::Pro);
        }

        Ok(Self {
            ranks,
            min_ranks,
            modules_by_plan,
            price_to_plan,
            default_paid_plan,
        })
    }

    /// Rank of a plan in the ladder
    pub fn rank_of(&self, plan: Plan) -> u8 {
        // Construction guarantees every canonical plan has a rank
        self.ranks.get(&plan).copied().unwrap_or(0)
    }

    /// Full cumulative module set for a plan
    pub fn modules_for(&self, plan: Plan) -> BTreeSet<Module> {
        self.modules_by_plan.get(&plan).cloned().unwrap_or_default()
    }

    /// Minimum rank a module requires
    pub fn min_rank_for(&self, module: Module) -> u8 {
        self.min_ranks.get(&module).copied().unwrap_or(0)
    }

    /// Whether a module is available to every authenticated user
    pub fn is_always_free(&self, module: Module) -> bool {
        self.min_rank_for(module) == 0
    }

    /// The lowest plan whose rank satisfies a module's requirement. Drives
    /// the "upgrade required" response.
    pub fn required_plan_for(&self, module: Module) -> Plan {
        let needed = self.min_rank_for(module);
        self.ranks
            .iter()
            .filter(|(_, rank)| **rank >= needed)
            .min_by_key(|(_, rank)| **rank)
            .map(|(plan, _)| *plan)
            // Unreachable after construction-time validation
            .unwrap_or(Plan::Enterprise)
    }

    /// Resolve a Stripe price id to a plan.
    ///
    /// Unknown price ids resolve to the lowest paid tier instead of
    /// failing: a paying customer with a misconfigured price map should
    /// never be bounced back to free, and the warning leaves a trail for
    /// the operator.
    pub fn plan_for_price_id(&self, price_id: &str) -> Plan {
        match self.price_to_plan.get(price_id) {
            Some(plan) => *plan,
            None => {
                tracing::warn!(
                    price_id = %price_id,
                    default_plan = %self.default_paid_plan,
                    "Unknown Stripe price id, defaulting to lowest paid tier"
                );
                self.default_paid_plan
            }
        }
    }

    /// The lowest paid tier (the unknown-price-id default)
    pub fn default_paid_plan(&self) -> Plan {
        self.default_paid_plan
    }

    /// Whether this deployment has a price configured for the plan
    pub fn is_purchasable(&self, plan: Plan) -> bool {
        self.price_to_plan.values().any(|p| *p == plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_ids() -> PriceIds {
        PriceIds {
            silver: Some("price_silver_123".to_string()),
            pro: Some("price_pro_123".to_string()),
        }
    }

    #[test]
    fn duplicate_rank_is_a_configuration_error() {
        let plans = [
            (Plan::Free, 0),
            (Plan::Silver, 1),
            (Plan::Pro, 1),
            (Plan::Enterprise, 3),
        ];
        let err = PlanCatalog::from_tables(&plans, &MODULE_RANKS, &price_ids()).unwrap_err();
        assert!(matches!(err, BillingError::Config(msg) if msg.contains("ambiguous")));
    }

    #[test]
    fn module_above_every_plan_is_a_configuration_error() {
        let modules = [(Module::WhiteLabel, 9)];
        let err = PlanCatalog::from_tables(&PLAN_RANKS, &modules, &price_ids()).unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[test]
    fn missing_plan_is_a_configuration_error() {
        let plans = [(Plan::Free, 0), (Plan::Silver, 1), (Plan::Pro, 2)];
        let err = PlanCatalog::from_tables(&plans, &MODULE_RANKS, &price_ids()).unwrap_err();
        assert!(matches!(err, BillingError::Config(msg) if msg.contains("enterprise")));
    }

    #[test]
    fn default_catalog_builds() {
        let catalog = PlanCatalog::new(&price_ids()).unwrap();
        assert_eq!(catalog.rank_of(Plan::Free), 0);
        assert_eq!(catalog.rank_of(Plan::Enterprise), 3);
        assert_eq!(catalog.default_paid_plan(), Plan::Silver);
    }
}
