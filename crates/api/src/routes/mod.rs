//! HTTP routes

pub mod billing;
pub mod insights;
pub mod modules;

use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::json;

use crate::auth::require_auth;
use crate::state::AppState;

/// Build the application router.
///
/// The webhook and the plan listing are public (the webhook authenticates
/// through its signature, not a session); everything else requires a valid
/// bearer token before any entitlement logic runs.
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let public = Router::new()
        .route("/health", get(health))
        .route("/api/billing/plans", get(billing::list_plans))
        .route("/api/stripe/webhook", post(billing::webhook));

    let protected = Router::new()
        .route("/api/billing/subscription", get(billing::get_subscription))
        .route("/api/billing/checkout", post(billing::create_checkout))
        .route(
            "/api/crm/leads",
            get(modules::list_leads).post(modules::create_lead),
        )
        .route(
            "/api/meetings",
            get(modules::list_meetings).post(modules::create_meeting),
        )
        .route("/api/courses", get(modules::list_courses))
        .route("/api/insights/funnel", post(insights::funnel_analysis))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
