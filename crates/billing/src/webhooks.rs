//! Stripe webhook handling
//!
//! The reconciler is the sole writer of subscription state. Each delivery
//! is verified against the webhook secret before anything is parsed, then
//! applied as a keyed upsert so redeliveries converge instead of
//! duplicating. Two concurrent deliveries for the same user resolve
//! last-write-wins on whichever upsert commits last; no stronger ordering
//! is provided.

use hmac::{Hmac, Mac};
use karvico_shared::Plan;
use sha2::Sha256;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use stripe::{Event, EventObject, EventType, Invoice, Subscription, SubscriptionId, Webhook};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::subscription::SubscriptionService;

type HmacSha256 = Hmac<Sha256>;

/// Fallback billing period when an event carries no usable period end
pub(crate) const BILLING_PERIOD: Duration = Duration::days(30);

/// Maximum age of a webhook signature timestamp
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// What to do when the processor reports a failed invoice payment.
///
/// The default keeps the subscription untouched (Stripe retries the charge
/// on its own schedule); `DemoteToFree` drops the account to the free tier
/// immediately. This is a deployment choice, not a hardcoded behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentFailurePolicy {
    /// Record the failure and wait for the processor to retry
    #[default]
    LogOnly,
    /// Demote the subscription to the free tier on first failure
    DemoteToFree,
}

impl PaymentFailurePolicy {
    /// Read `KARVICO_PAYMENT_FAILURE_POLICY` (`log-only` | `demote-to-free`)
    pub fn from_env() -> Self {
        match std::env::var("KARVICO_PAYMENT_FAILURE_POLICY") {
            Ok(v) => v.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    value = %v,
                    "Unrecognized KARVICO_PAYMENT_FAILURE_POLICY, using log-only"
                );
                Self::LogOnly
            }),
            Err(_) => Self::LogOnly,
        }
    }
}

impl FromStr for PaymentFailurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log-only" | "log_only" => Ok(Self::LogOnly),
            "demote-to-free" | "demote_to_free" => Ok(Self::DemoteToFree),
            _ => Err(()),
        }
    }
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    catalog: Arc<PlanCatalog>,
    subscriptions: SubscriptionService,
    payment_failure_policy: PaymentFailurePolicy,
}

impl WebhookHandler {
    pub fn new(
        stripe: StripeClient,
        pool: PgPool,
        catalog: Arc<PlanCatalog>,
        payment_failure_policy: PaymentFailurePolicy,
    ) -> Self {
        Self {
            stripe,
            catalog,
            subscriptions: SubscriptionService::new(pool),
            payment_failure_policy,
        }
    }

    /// Verify and parse a Stripe webhook event.
    ///
    /// Uses the library verification first and falls back to manual
    /// signature verification, which keeps working when Stripe ships an
    /// API version newer than the one async-stripe was generated against.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        verify_signature(payload, signature, webhook_secret)?;

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification succeeded"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event.
    ///
    /// Errors returned from here make the HTTP layer answer non-200, which
    /// Stripe interprets as "redeliver later". Unrecognized event types are
    /// acknowledged, not errors.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event).await?;
            }
            EventType::CustomerSubscriptionCreated => {
                self.handle_subscription_created(event).await?;
            }
            EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_updated(event).await?;
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(event).await?;
            }
            EventType::InvoicePaymentSucceeded => {
                self.handle_invoice_payment_succeeded(event).await?;
            }
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event).await?;
            }
            _ => {
                tracing::debug!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Ignoring unhandled Stripe event type"
                );
            }
        }

        Ok(())
    }

    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected CheckoutSession".to_string(),
                ))
            }
        };

        let user_id = session
            .metadata
            .as_ref()
            .and_then(|m| m.get("user_id"))
            .and_then(|id| Uuid::parse_str(id).ok());
        let Some(user_id) = user_id else {
            // Redelivery will not grow a user_id, so acknowledge and move on
            tracing::warn!(
                session_id = %session.id,
                "Checkout session completed without user_id metadata, cannot attribute"
            );
            return Ok(());
        };

        let customer_id = session.customer.as_ref().map(expandable_customer_id);

        match &session.subscription {
            Some(sub_ref) => {
                let subscription = self.retrieve_subscription(&sub_ref.id().to_string()).await?;
                let plan = self.plan_for_subscription(&subscription);
                let expires_at = period_end_of(&subscription);

                self.subscriptions
                    .upsert_from_checkout(
                        user_id,
                        plan,
                        customer_id.as_deref(),
                        Some(subscription.id.as_str()),
                        expires_at,
                    )
                    .await?;

                tracing::info!(
                    user_id = %user_id,
                    plan = %plan,
                    subscription_id = %subscription.id,
                    "Checkout completed, subscription activated"
                );
            }
            None => {
                // One-off sessions (or CLI test events) carry no
                // subscription object; fall back to the plan recorded in
                // metadata and a default billing period
                let plan = session
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("plan"))
                    .and_then(|p| p.parse().ok())
                    .unwrap_or_else(|| self.catalog.default_paid_plan());
                let expires_at = OffsetDateTime::now_utc() + BILLING_PERIOD;

                self.subscriptions
                    .upsert_from_checkout(user_id, plan, customer_id.as_deref(), None, expires_at)
                    .await?;

                tracing::info!(
                    user_id = %user_id,
                    plan = %plan,
                    "Checkout completed without subscription object, activated from metadata"
                );
            }
        }

        Ok(())
    }

    async fn handle_subscription_created(&self, event: Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;

        let user_id = subscription
            .metadata
            .get("user_id")
            .and_then(|id| Uuid::parse_str(id).ok());
        let Some(user_id) = user_id else {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Subscription created without user_id metadata, cannot attribute"
            );
            return Ok(());
        };

        let plan = self.plan_for_subscription(&subscription);
        let expires_at = period_end_of(&subscription);
        let customer_id = expandable_customer_id(&subscription.customer);

        self.subscriptions
            .upsert_from_checkout(
                user_id,
                plan,
                Some(&customer_id),
                Some(subscription.id.as_str()),
                expires_at,
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan,
            subscription_id = %subscription.id,
            "Subscription created"
        );

        Ok(())
    }

    async fn handle_subscription_updated(&self, event: Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;
        let expires_at = period_end_of(&subscription);

        let matched = self
            .subscriptions
            .refresh_period(subscription.id.as_str(), expires_at)
            .await?;

        if matched {
            tracing::info!(
                subscription_id = %subscription.id,
                expires_at = %expires_at,
                "Subscription period refreshed"
            );
        } else {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Subscription updated for unknown billing-subscription id"
            );
        }

        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;

        let matched = self
            .subscriptions
            .cancel_by_stripe_subscription(subscription.id.as_str())
            .await?;

        if matched {
            tracing::info!(
                subscription_id = %subscription.id,
                "Subscription cancelled, demoted to free tier"
            );
        } else {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Subscription deleted for unknown billing-subscription id"
            );
        }

        Ok(())
    }

    async fn handle_invoice_payment_succeeded(&self, event: Event) -> BillingResult<()> {
        let invoice = extract_invoice(event)?;

        let Some(sub_ref) = &invoice.subscription else {
            tracing::debug!(
                invoice_id = %invoice.id,
                "Invoice payment succeeded without a subscription reference"
            );
            return Ok(());
        };

        // Re-fetch so the stored period end reflects the renewal the
        // payment just bought, not a stale value from the invoice
        let subscription = self.retrieve_subscription(&sub_ref.id().to_string()).await?;
        let expires_at = period_end_of(&subscription);

        let user_id = subscription
            .metadata
            .get("user_id")
            .and_then(|id| Uuid::parse_str(id).ok());

        match user_id {
            // Full reconcile when the subscription is attributable; this
            // also repairs a record whose created event was lost
            Some(user_id) => {
                let plan = self.plan_for_subscription(&subscription);
                let customer_id = expandable_customer_id(&subscription.customer);
                self.subscriptions
                    .upsert_from_checkout(
                        user_id,
                        plan,
                        Some(&customer_id),
                        Some(subscription.id.as_str()),
                        expires_at,
                    )
                    .await?;
            }
            None => {
                self.subscriptions
                    .refresh_period(subscription.id.as_str(), expires_at)
                    .await?;
            }
        }

        tracing::info!(
            invoice_id = %invoice.id,
            subscription_id = %subscription.id,
            expires_at = %expires_at,
            "Invoice paid, subscription period reconciled"
        );

        Ok(())
    }

    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let invoice = extract_invoice(event)?;

        let subscription_id = invoice
            .subscription
            .as_ref()
            .map(|sub_ref| sub_ref.id().to_string());
        let Some(subscription_id) = subscription_id else {
            tracing::warn!(
                invoice_id = %invoice.id,
                "Invoice payment failed without a subscription reference"
            );
            return Ok(());
        };

        match self.payment_failure_policy {
            PaymentFailurePolicy::LogOnly => {
                self.subscriptions
                    .record_payment_failure(&subscription_id)
                    .await?;
                tracing::warn!(
                    invoice_id = %invoice.id,
                    subscription_id = %subscription_id,
                    "Invoice payment failed, awaiting processor retry"
                );
            }
            PaymentFailurePolicy::DemoteToFree => {
                self.subscriptions
                    .demote_to_free_by_stripe_subscription(&subscription_id)
                    .await?;
                tracing::warn!(
                    invoice_id = %invoice.id,
                    subscription_id = %subscription_id,
                    "Invoice payment failed, subscription demoted to free tier"
                );
            }
        }

        Ok(())
    }

    /// Infer the plan from the subscription's first line item price.
    ///
    /// The price map is authoritative; the plan recorded in metadata at
    /// checkout is only a fallback for subscriptions with no visible items.
    fn plan_for_subscription(&self, subscription: &Subscription) -> Plan {
        if let Some(price_id) = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
        {
            return self.catalog.plan_for_price_id(price_id);
        }

        subscription
            .metadata
            .get("plan")
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(|| self.catalog.default_paid_plan())
    }

    async fn retrieve_subscription(&self, raw_id: &str) -> BillingResult<Subscription> {
        let id: SubscriptionId = raw_id
            .parse()
            .map_err(|_| BillingError::SubscriptionNotFound(raw_id.to_string()))?;
        Ok(Subscription::retrieve(self.stripe.inner(), &id, &[]).await?)
    }
}

fn extract_subscription(event: Event) -> BillingResult<Subscription> {
    match event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Subscription".to_string(),
        )),
    }
}

fn extract_invoice(event: Event) -> BillingResult<Invoice> {
    match event.data.object {
        EventObject::Invoice(invoice) => Ok(invoice),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Invoice".to_string(),
        )),
    }
}

fn expandable_customer_id(customer: &stripe::Expandable<stripe::Customer>) -> String {
    match customer {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(customer) => customer.id.to_string(),
    }
}

fn period_end_of(subscription: &Subscription) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(subscription.current_period_end)
        .unwrap_or_else(|_| OffsetDateTime::now_utc() + BILLING_PERIOD)
}

/// Manual Stripe signature verification.
///
/// Parses the `t=timestamp,v1=signature` header, rejects stale timestamps,
/// and compares an HMAC-SHA256 over `"{timestamp}.{payload}"` against the
/// `v1` value. Every failure collapses to `WebhookSignatureInvalid`; the
/// caller never learns which part failed.
pub(crate) fn verify_signature(
    payload: &str,
    signature: &str,
    webhook_secret: &str,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::error!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::error!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| {
            tracing::error!("System time error: {}", e);
            BillingError::WebhookSignatureInvalid
        })?
        .as_secs() as i64;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::error!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // The secret's "whsec_" prefix is not part of the key material
    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook secret key");
        BillingError::WebhookSignatureInvalid
    })?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::error!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}
