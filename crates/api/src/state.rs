//! Application state

use karvico_billing::{
    BillingService, EntitlementResolver, PlanCatalog, PriceIds, SubscriptionService,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::ai::InsightsService;
use crate::auth::{AuthState, JwtManager};
use crate::config::Config;

/// Session token lifetime
const JWT_EXPIRY_HOURS: i64 = 24;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    /// Plan ladder and module requirements; never depends on Stripe
    pub catalog: Arc<PlanCatalog>,
    /// The single entitlement authority consulted by every gated route
    pub entitlements: EntitlementResolver,
    /// Canonical subscription read path
    pub subscriptions: SubscriptionService,
    /// Stripe-backed checkout and webhook reconciliation; None when Stripe
    /// credentials are absent (entitlement checks keep working regardless)
    pub billing: Option<Arc<BillingService>>,
    /// Generative-AI provider for the analytics module
    pub insights: InsightsService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let jwt_manager = JwtManager::new(&config.jwt_secret, JWT_EXPIRY_HOURS);

        // Catalog construction validates the rank ordering; a broken table
        // stops the server here instead of misgating requests later
        let catalog = Arc::new(PlanCatalog::new(&PriceIds::from_env())?);
        let entitlements = EntitlementResolver::new(catalog.clone());
        let subscriptions = SubscriptionService::new(pool.clone());

        let billing = match BillingService::from_env(pool.clone()) {
            Ok(svc) => {
                tracing::info!("Stripe billing service initialized");
                Some(Arc::new(svc))
            }
            Err(e) if config.demo_mode => {
                tracing::info!("Stripe billing not configured (demo mode): {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Stripe billing not configured: {}", e);
                None
            }
        };

        let insights = InsightsService::from_env();
        if insights.is_enabled() {
            tracing::info!("AI insights provider configured");
        } else {
            tracing::warn!("AI insights not configured (missing KARVICO_AI_API_KEY)");
        }

        Ok(Self {
            pool,
            config,
            jwt_manager,
            catalog,
            entitlements,
            subscriptions,
            billing,
            insights,
        })
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
        }
    }
}
