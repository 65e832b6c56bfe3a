//! Billing error types

use thiserror::Error;

/// Errors produced by the billing crate.
///
/// `Config` is surfaced at construction time and never downgraded into a
/// fake success; `WebhookSignatureInvalid` is the only non-retryable webhook
/// failure. Database and Stripe errors during reconciliation propagate so
/// the HTTP layer answers non-200 and the processor redelivers.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing configuration error: {0}")]
    Config(String),

    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("unsupported webhook payload: {0}")]
    WebhookEventNotSupported(String),

    #[error("plan cannot be used for this operation: {0}")]
    InvalidPlan(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("stripe api error: {0}")]
    StripeApi(String),

    #[error("internal billing error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        Self::StripeApi(e.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
