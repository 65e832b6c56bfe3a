// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Karvico Billing Module
//!
//! Stripe-backed subscription entitlements for the Karvico dashboard.
//!
//! ## Features
//!
//! - **Plan Catalog**: tier ladder, cumulative module sets, price-id mapping
//! - **Subscription State**: canonical fail-open-to-free read path
//! - **Entitlement Resolution**: the single allow/deny authority
//! - **Checkout**: subscription-mode checkout session creation
//! - **Webhooks**: idempotent reconciliation of Stripe billing events

pub mod catalog;
pub mod checkout;
pub mod client;
pub mod entitlement;
pub mod error;
pub mod subscription;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Catalog
pub use catalog::PlanCatalog;

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Entitlement
pub use entitlement::{AccessDecision, EntitlementResolver};

// Error
pub use error::{BillingError, BillingResult};

// Subscription
pub use subscription::SubscriptionService;

// Webhooks
pub use webhooks::{PaymentFailurePolicy, WebhookHandler};

use sqlx::PgPool;
use std::sync::Arc;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub catalog: Arc<PlanCatalog>,
    pub entitlements: EntitlementResolver,
    pub subscriptions: SubscriptionService,
    pub checkout: CheckoutService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a billing service from environment variables.
    ///
    /// Fails fast on missing/placeholder Stripe credentials or an invalid
    /// plan catalog; neither is recoverable at request time.
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        let policy = PaymentFailurePolicy::from_env();
        Self::new(stripe, pool, policy)
    }

    /// Create a billing service with an explicit client and policy
    pub fn new(
        stripe: StripeClient,
        pool: PgPool,
        payment_failure_policy: PaymentFailurePolicy,
    ) -> BillingResult<Self> {
        let catalog = Arc::new(PlanCatalog::new(&stripe.config().price_ids)?);

        Ok(Self {
            entitlements: EntitlementResolver::new(catalog.clone()),
            subscriptions: SubscriptionService::new(pool.clone()),
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool, catalog.clone(), payment_failure_policy),
            catalog,
        })
    }
}
