//! AI-assisted analytics routes
//!
//! Calls the generative-AI provider with a summary of the caller's CRM
//! data. Gated on the AI analytics module before the provider is invoked.

use axum::extract::{Extension, State};
use axum::Json;
use karvico_shared::{Module, Plan};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FunnelAnalysisRequest {
    /// Lookback window; defaults to the last 30 days
    pub period_days: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct StageCount {
    pub stage: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct FunnelAnalysisResponse {
    pub period_days: i32,
    pub stages: Vec<StageCount>,
    pub analysis: String,
}

/// Summarize the caller's sales funnel through the AI provider
pub async fn funnel_analysis(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<FunnelAnalysisRequest>,
) -> ApiResult<Json<FunnelAnalysisResponse>> {
    // Entitlement gate first; the provider is never called for callers
    // below the required plan
    let subscription = state.subscriptions.load(auth_user.user_id).await;
    let decision = state
        .entitlements
        .check_access(&subscription, Module::AiAnalytics);
    if !decision.allowed {
        return Err(ApiError::UpgradeRequired {
            module: Module::AiAnalytics,
            required_plan: decision.required_plan.unwrap_or(Plan::Pro),
        });
    }

    if !state.insights.is_enabled() {
        return Err(ApiError::ServiceUnavailable);
    }

    let period_days = req.period_days.unwrap_or(30).clamp(1, 365);

    let stages: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT stage, COUNT(*) AS count
        FROM leads
        WHERE user_id = $1
          AND created_at >= NOW() - make_interval(days => $2)
        GROUP BY stage
        ORDER BY count DESC
        "#,
    )
    .bind(auth_user.user_id)
    .bind(period_days)
    .fetch_all(&state.pool)
    .await?;

    let summary = if stages.is_empty() {
        "no leads in the period".to_string()
    } else {
        stages
            .iter()
            .map(|(stage, count)| format!("{}: {}", stage, count))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let prompt = format!(
        "You are a sales analyst for a small business dashboard. \
         Lead counts by funnel stage over the last {} days: {}. \
         Give a short, concrete assessment of this funnel and one \
         suggestion to improve conversion.",
        period_days, summary
    );

    let analysis = state
        .insights
        .complete(&prompt)
        .await
        .map_err(|e| ApiError::Internal(format!("AI provider error: {}", e)))?;

    Ok(Json(FunnelAnalysisResponse {
        period_days,
        stages: stages
            .into_iter()
            .map(|(stage, count)| StageCount { stage, count })
            .collect(),
        analysis,
    }))
}
