//! Checkout session creation
//!
//! Builds subscription-mode Stripe checkout sessions for the self-service
//! tiers. The session and the subscription it creates both carry the user
//! id in metadata, which is what lets the webhook reconciler attribute
//! billing events back to a Karvico account.

use karvico_shared::Plan;
use sqlx::PgPool;
use std::collections::HashMap;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CreateCustomer, Customer, CustomerId,
};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::subscription::SubscriptionService;

/// Opaque checkout session reference handed to the client for redirect
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

/// Checkout session service
pub struct CheckoutService {
    stripe: StripeClient,
    subscriptions: SubscriptionService,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            stripe,
            subscriptions: SubscriptionService::new(pool),
        }
    }

    /// Create a checkout session for a purchasable plan.
    ///
    /// Reuses the stored Stripe customer when the user already has one so
    /// repeat purchases land on the same billing profile. Free has nothing
    /// to buy and Enterprise is sales-led; both are rejected up front.
    pub async fn create_subscription_checkout(
        &self,
        user_id: Uuid,
        email: &str,
        plan: Plan,
    ) -> BillingResult<CheckoutResponse> {
        let price_id = match self.stripe.config().price_id_for_plan(plan) {
            Some(id) => id.to_string(),
            None => {
                return Err(match plan {
                    Plan::Free | Plan::Enterprise => BillingError::InvalidPlan(format!(
                        "plan {} is not purchasable through checkout",
                        plan
                    )),
                    _ => BillingError::Config(format!(
                        "no Stripe price configured for plan {}",
                        plan
                    )),
                })
            }
        };

        let customer_id = self.get_or_create_customer(user_id, email).await?;

        let metadata = HashMap::from([
            ("user_id".to_string(), user_id.to_string()),
            ("plan".to_string(), plan.to_string()),
        ]);

        let config = self.stripe.config();
        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(customer_id);
        params.success_url = Some(&config.success_url);
        params.cancel_url = Some(&config.cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(metadata.clone());
        // Mirror the metadata onto the subscription itself so subscription
        // lifecycle events are attributable without a session lookup
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(metadata),
            ..Default::default()
        });

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn get_or_create_customer(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> BillingResult<CustomerId> {
        if let Some(existing) = self.subscriptions.stripe_customer_id(user_id).await? {
            return existing
                .parse::<CustomerId>()
                .map_err(|e| BillingError::StripeApi(format!("Invalid stored customer id: {}", e)));
        }

        let metadata = HashMap::from([("user_id".to_string(), user_id.to_string())]);
        let mut params = CreateCustomer::new();
        params.email = Some(email);
        params.metadata = Some(metadata);

        let customer = Customer::create(self.stripe.inner(), params).await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{PriceIds, StripeConfig};

    fn service(price_ids: PriceIds) -> CheckoutService {
        let config = StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test123".to_string(),
            price_ids,
            success_url: "http://localhost:3000/?success=true".to_string(),
            cancel_url: "http://localhost:3000/?canceled=true".to_string(),
        };
        // connect_lazy never touches the network; the tests below fail
        // before any query runs
        let pool = PgPool::connect_lazy("postgres://localhost/karvico_test").unwrap();
        CheckoutService::new(StripeClient::new(config), pool)
    }

    #[tokio::test]
    async fn free_plan_is_not_purchasable() {
        let svc = service(PriceIds::default());
        let err = svc
            .create_subscription_checkout(Uuid::new_v4(), "user@example.com", Plan::Free)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn enterprise_plan_is_sales_led() {
        let svc = service(PriceIds::default());
        let err = svc
            .create_subscription_checkout(Uuid::new_v4(), "user@example.com", Plan::Enterprise)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn missing_price_id_fails_closed_with_a_config_error() {
        let svc = service(PriceIds::default());
        let err = svc
            .create_subscription_checkout(Uuid::new_v4(), "user@example.com", Plan::Pro)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Config(msg) if msg.contains("pro")));
    }
}
