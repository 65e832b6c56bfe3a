//! Stripe client construction and configuration
//!
//! All Stripe credentials and price identifiers are resolved here, once, at
//! startup. Missing or placeholder values fail construction with a
//! configuration error instead of surfacing later as mysterious API
//! failures mid-request.

use karvico_shared::Plan;
use std::sync::Arc;

use crate::error::{BillingError, BillingResult};

/// Stripe price identifiers per purchasable plan.
///
/// Free has no price and Enterprise is sales-led, so only the two
/// self-service tiers appear here. A missing price id leaves the plan
/// unpurchasable but does not prevent startup.
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub silver: Option<String>,
    pub pro: Option<String>,
}

impl PriceIds {
    pub fn from_env() -> Self {
        Self {
            silver: env_price("STRIPE_PRICE_SILVER"),
            pro: env_price("STRIPE_PRICE_PRO"),
        }
    }
}

/// Stripe configuration for the billing service
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_ids: PriceIds,
    /// Where the processor redirects after a completed checkout
    pub success_url: String,
    /// Where the processor redirects after an abandoned checkout
    pub cancel_url: String,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// Fails closed: an absent or placeholder `STRIPE_SECRET_KEY` or
    /// `STRIPE_WEBHOOK_SECRET` is a configuration error, never a silently
    /// degraded client.
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY").unwrap_or_default();
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        let app_url =
            std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let config = Self {
            secret_key,
            webhook_secret,
            price_ids: PriceIds::from_env(),
            success_url: format!("{}/?success=true&session_id={{CHECKOUT_SESSION_ID}}", app_url),
            cancel_url: format!("{}/?canceled=true", app_url),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject missing or placeholder credentials
    pub fn validate(&self) -> BillingResult<()> {
        if is_placeholder(&self.secret_key) {
            return Err(BillingError::Config(
                "STRIPE_SECRET_KEY is missing or a placeholder".to_string(),
            ));
        }
        if is_placeholder(&self.webhook_secret) {
            return Err(BillingError::Config(
                "STRIPE_WEBHOOK_SECRET is missing or a placeholder".to_string(),
            ));
        }
        Ok(())
    }

    /// Price id for a purchasable plan
    pub fn price_id_for_plan(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::Silver => self.price_ids.silver.as_deref(),
            Plan::Pro => self.price_ids.pro.as_deref(),
            Plan::Free | Plan::Enterprise => None,
        }
    }
}

fn env_price(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !is_placeholder(&v) => Some(v),
        Ok(v) => {
            tracing::warn!(var = key, value = %v, "Ignoring placeholder Stripe price id");
            None
        }
        Err(_) => None,
    }
}

/// Placeholder detection for credentials copied from .env.example files
fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.contains("placeholder") || v.starts_with("your_") || v.starts_with("<")
}

/// Shared Stripe client with its configuration
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// The underlying async-stripe client
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(secret: &str, webhook: &str) -> StripeConfig {
        StripeConfig {
            secret_key: secret.to_string(),
            webhook_secret: webhook.to_string(),
            price_ids: PriceIds::default(),
            success_url: "http://localhost:3000/?success=true".to_string(),
            cancel_url: "http://localhost:3000/?canceled=true".to_string(),
        }
    }

    #[test]
    fn placeholder_secret_key_fails_validation() {
        let config = config_with("price_silver_placeholder", "whsec_real");
        assert!(matches!(
            config.validate(),
            Err(BillingError::Config(msg)) if msg.contains("STRIPE_SECRET_KEY")
        ));
    }

    #[test]
    fn empty_webhook_secret_fails_validation() {
        let config = config_with("sk_test_123", "");
        assert!(matches!(
            config.validate(),
            Err(BillingError::Config(msg)) if msg.contains("STRIPE_WEBHOOK_SECRET")
        ));
    }

    #[test]
    fn real_looking_credentials_pass_validation() {
        let config = config_with("sk_test_123", "whsec_test123");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn free_and_enterprise_have_no_price_id() {
        let mut config = config_with("sk_test_123", "whsec_test123");
        config.price_ids.silver = Some("price_silver_123".to_string());
        config.price_ids.pro = Some("price_pro_123".to_string());

        assert!(config.price_id_for_plan(Plan::Free).is_none());
        assert!(config.price_id_for_plan(Plan::Enterprise).is_none());
        assert_eq!(config.price_id_for_plan(Plan::Silver), Some("price_silver_123"));
        assert_eq!(config.price_id_for_plan(Plan::Pro), Some("price_pro_123"));
    }
}
