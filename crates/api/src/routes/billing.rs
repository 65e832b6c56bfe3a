//! Billing routes for Stripe integration

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use karvico_shared::{Module, Plan, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Request to create a checkout session
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub plan: Plan,
}

/// Response from creating a checkout session
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

/// Current subscription info for the caller
#[derive(Debug, Serialize)]
pub struct SubscriptionInfo {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Modules the caller can currently reach
    pub modules: Vec<Module>,
}

/// One entry in the public plan listing
#[derive(Debug, Serialize)]
pub struct PlanInfo {
    pub plan: Plan,
    pub rank: u8,
    /// Whether this deployment sells the plan through checkout
    pub purchasable: bool,
    pub modules: Vec<Module>,
}

/// Public catalog listing
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<PlanInfo>> {
    let catalog = &state.catalog;
    let plans = Plan::ALL
        .into_iter()
        .map(|plan| PlanInfo {
            plan,
            rank: catalog.rank_of(plan),
            purchasable: catalog.is_purchasable(plan),
            modules: catalog.modules_for(plan).into_iter().collect(),
        })
        .collect();
    Json(plans)
}

/// Get the caller's subscription and accessible modules
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    let subscription = state.subscriptions.load(auth_user.user_id).await;
    let modules = state.entitlements.accessible_modules(&subscription);

    let expires_at = subscription
        .expires_at
        .and_then(|t| t.format(&Rfc3339).ok());

    Ok(Json(SubscriptionInfo {
        plan: subscription.plan,
        status: subscription.status,
        expires_at,
        modules,
    }))
}

/// Create a checkout session for a plan upgrade
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let email = auth_user.email.as_deref().unwrap_or("");
    let session = billing
        .checkout
        .create_subscription_checkout(auth_user.user_id, email, req.plan)
        .await?;

    tracing::info!(
        user_id = %auth_user.user_id,
        plan = %req.plan,
        session_id = %session.session_id,
        "Checkout session created"
    );

    Ok(Json(CheckoutResponse {
        session_id: session.session_id,
        url: session.url,
    }))
}

/// Handle Stripe webhook events
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    // Reject the whole delivery before any parsing side effects
    let event = billing.webhooks.verify_event(&body, signature).map_err(|e| {
        tracing::warn!(error = ?e, "Stripe webhook signature verification failed");
        ApiError::BadRequest("Invalid webhook signature".to_string())
    })?;

    tracing::info!(
        event_type = %event.type_,
        event_id = %event.id,
        "Stripe webhook event verified"
    );

    // A processing failure answers non-200 so the processor redelivers
    billing.webhooks.handle_event(event).await.map_err(|e| {
        tracing::error!(error = %e, "Webhook handling error");
        ApiError::Internal(format!("Webhook handling error: {}", e))
    })?;

    Ok(StatusCode::OK)
}
