//! Subscription state
//!
//! The canonical read path used by request-time authorization, plus the
//! keyed writes the webhook reconciler applies. The loader is the only
//! reader, the reconciler the only writer; both go through this service.

use karvico_shared::{Plan, Subscription, SubscriptionStatus};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Stored subscription row exactly as persisted.
///
/// Plan and status stay strings at this level so that a corrupt or legacy
/// value normalizes to a safe default instead of failing the row decode
/// and taking the whole read down with it.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct SubscriptionRow {
    pub user_id: Uuid,
    pub plan: String,
    pub status: String,
    pub expires_at: Option<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

/// Fold a stored row into canonical subscription state.
///
/// Unrecognized plan identifiers become `Free` (never a paid tier) and
/// unrecognized statuses become `Inactive`; the expiration invariant is
/// applied last.
pub(crate) fn normalize_row(row: SubscriptionRow, now: OffsetDateTime) -> Subscription {
    let plan = row.plan.parse::<Plan>().unwrap_or_else(|_| {
        tracing::warn!(
            user_id = %row.user_id,
            stored_plan = %row.plan,
            "Unrecognized stored plan identifier, normalizing to free"
        );
        Plan::Free
    });
    let status = row
        .status
        .parse::<SubscriptionStatus>()
        .unwrap_or_else(|_| {
            tracing::warn!(
                user_id = %row.user_id,
                stored_status = %row.status,
                "Unrecognized stored subscription status, normalizing to inactive"
            );
            SubscriptionStatus::Inactive
        });

    Subscription {
        user_id: row.user_id,
        plan,
        status,
        expires_at: row.expires_at,
        stripe_customer_id: row.stripe_customer_id,
        stripe_subscription_id: row.stripe_subscription_id,
    }
    .normalized(now)
}

/// Read and write access to subscription records
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the caller's canonical subscription state.
    ///
    /// Infallible by contract: a missing row, an unreachable store, or a
    /// corrupt value all resolve to the free-tier default. This never
    /// grants a paid tier on failure and never panics; one read, no
    /// writes.
    pub async fn load(&self, user_id: Uuid) -> Subscription {
        let row: Result<Option<SubscriptionRow>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT user_id, plan, status, expires_at,
                   stripe_customer_id, stripe_subscription_id
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => normalize_row(row, OffsetDateTime::now_utc()),
            Ok(None) => {
                tracing::debug!(user_id = %user_id, "No subscription record, defaulting to free tier");
                Subscription::default_for(user_id)
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Subscription store unavailable, failing open to free tier"
                );
                Subscription::default_for(user_id)
            }
        }
    }

    /// The stored Stripe customer id for a user, if any (used to reuse the
    /// customer across checkout sessions)
    pub async fn stripe_customer_id(&self, user_id: Uuid) -> BillingResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(id,)| id))
    }

    /// Upsert the subscription after a completed checkout or a subscription
    /// created event. Keyed by user id, so webhook redeliveries converge on
    /// the same final state.
    pub async fn upsert_from_checkout(
        &self,
        user_id: Uuid,
        plan: Plan,
        stripe_customer_id: Option<&str>,
        stripe_subscription_id: Option<&str>,
        expires_at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan, status, expires_at,
                stripe_customer_id, stripe_subscription_id, created_at, updated_at
            ) VALUES ($1, $2, $3, 'active', $4, $5, $6, NOW(), NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                plan = EXCLUDED.plan,
                status = 'active',
                expires_at = EXCLUDED.expires_at,
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, subscriptions.stripe_customer_id),
                stripe_subscription_id = COALESCE(EXCLUDED.stripe_subscription_id, subscriptions.stripe_subscription_id),
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(plan.as_str())
        .bind(expires_at)
        .bind(stripe_customer_id)
        .bind(stripe_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Refresh the billing period from a subscription updated event.
    ///
    /// Status is recomputed from the new expiration (a lapsed record whose
    /// period was renewed becomes active again); a cancellation is never
    /// resurrected this way. Returns false when no record matches the
    /// billing-subscription id.
    pub async fn refresh_period(
        &self,
        stripe_subscription_id: &str,
        period_end: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET expires_at = $2,
                status = CASE
                    WHEN status = 'cancelled' THEN status
                    WHEN $2 > NOW() THEN 'active'
                    ELSE 'inactive'
                END,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a subscription deleted event: demote to free, mark cancelled.
    /// The record is kept; cancellation is a state, not a deletion.
    pub async fn cancel_by_stripe_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan = 'free',
                status = 'cancelled',
                expires_at = NULL,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed payment without touching plan or status
    pub async fn record_payment_failure(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET last_payment_failed_at = NOW(), updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Demote a subscription to the free tier after repeated payment
    /// failure (only when the deployment opted into that policy)
    pub async fn demote_to_free_by_stripe_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan = 'free',
                status = 'inactive',
                last_payment_failed_at = NOW(),
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
