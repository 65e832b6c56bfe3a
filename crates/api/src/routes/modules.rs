//! Module-gated resource routes
//!
//! CRM leads, scheduling, and course hosting. Every handler authorizes
//! through the entitlement resolver before touching its table; these
//! routes never re-derive plan comparisons themselves.

use axum::extract::{Extension, State};
use axum::Json;
use karvico_shared::{Module, Plan, Subscription};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Load the caller's subscription and enforce the module gate
async fn authorize(
    state: &AppState,
    user: &AuthUser,
    module: Module,
) -> ApiResult<Subscription> {
    let subscription = state.subscriptions.load(user.user_id).await;
    let decision = state.entitlements.check_access(&subscription, module);
    if !decision.allowed {
        tracing::debug!(
            user_id = %user.user_id,
            module = %module,
            plan = %subscription.plan,
            "Entitlement denied"
        );
        return Err(ApiError::UpgradeRequired {
            module,
            required_plan: decision.required_plan.unwrap_or(Plan::Enterprise),
        });
    }
    Ok(subscription)
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

// =============================================================================
// CRM leads
// =============================================================================

#[derive(Debug, FromRow)]
struct LeadRow {
    id: Uuid,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    stage: String,
    value_cents: i64,
    created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub stage: String,
    pub value_cents: i64,
    pub created_at: String,
}

impl From<LeadRow> for Lead {
    fn from(row: LeadRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            stage: row.stage,
            value_cents: row.value_cents,
            created_at: rfc3339(row.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLeadRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default = "default_stage")]
    pub stage: String,
    #[serde(default)]
    pub value_cents: i64,
}

fn default_stage() -> String {
    "new".to_string()
}

pub async fn list_leads(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Lead>>> {
    authorize(&state, &auth_user, Module::Crm).await?;

    let rows: Vec<LeadRow> = sqlx::query_as(
        r#"
        SELECT id, name, email, phone, stage, value_cents, created_at
        FROM leads
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT 200
        "#,
    )
    .bind(auth_user.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(Lead::from).collect()))
}

pub async fn create_lead(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateLeadRequest>,
) -> ApiResult<Json<Lead>> {
    authorize(&state, &auth_user, Module::Crm).await?;

    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("lead name must not be empty".to_string()));
    }

    let row: LeadRow = sqlx::query_as(
        r#"
        INSERT INTO leads (user_id, name, email, phone, stage, value_cents)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, name, email, phone, stage, value_cents, created_at
        "#,
    )
    .bind(auth_user.user_id)
    .bind(req.name.trim())
    .bind(&req.email)
    .bind(&req.phone)
    .bind(&req.stage)
    .bind(req.value_cents)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(Lead::from(row)))
}

// =============================================================================
// Scheduling
// =============================================================================

#[derive(Debug, FromRow)]
struct MeetingRow {
    id: Uuid,
    title: String,
    attendee_email: Option<String>,
    starts_at: OffsetDateTime,
    ends_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct Meeting {
    pub id: Uuid,
    pub title: String,
    pub attendee_email: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
}

impl From<MeetingRow> for Meeting {
    fn from(row: MeetingRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            attendee_email: row.attendee_email,
            starts_at: rfc3339(row.starts_at),
            ends_at: rfc3339(row.ends_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub title: String,
    pub attendee_email: Option<String>,
    /// RFC 3339 timestamps
    pub starts_at: String,
    pub ends_at: String,
}

pub async fn list_meetings(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Meeting>>> {
    authorize(&state, &auth_user, Module::Scheduling).await?;

    let rows: Vec<MeetingRow> = sqlx::query_as(
        r#"
        SELECT id, title, attendee_email, starts_at, ends_at
        FROM meetings
        WHERE user_id = $1 AND starts_at >= NOW()
        ORDER BY starts_at
        LIMIT 200
        "#,
    )
    .bind(auth_user.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(Meeting::from).collect()))
}

pub async fn create_meeting(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateMeetingRequest>,
) -> ApiResult<Json<Meeting>> {
    authorize(&state, &auth_user, Module::Scheduling).await?;

    let starts_at = OffsetDateTime::parse(&req.starts_at, &Rfc3339)
        .map_err(|_| ApiError::BadRequest("starts_at must be an RFC 3339 timestamp".to_string()))?;
    let ends_at = OffsetDateTime::parse(&req.ends_at, &Rfc3339)
        .map_err(|_| ApiError::BadRequest("ends_at must be an RFC 3339 timestamp".to_string()))?;

    if ends_at <= starts_at {
        return Err(ApiError::BadRequest(
            "meeting must end after it starts".to_string(),
        ));
    }

    let row: MeetingRow = sqlx::query_as(
        r#"
        INSERT INTO meetings (user_id, title, attendee_email, starts_at, ends_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, title, attendee_email, starts_at, ends_at
        "#,
    )
    .bind(auth_user.user_id)
    .bind(&req.title)
    .bind(&req.attendee_email)
    .bind(starts_at)
    .bind(ends_at)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(Meeting::from(row)))
}

// =============================================================================
// Courses
// =============================================================================

#[derive(Debug, FromRow)]
struct CourseRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    published: bool,
    created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub published: bool,
    pub created_at: String,
}

impl From<CourseRow> for Course {
    fn from(row: CourseRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            published: row.published,
            created_at: rfc3339(row.created_at),
        }
    }
}

pub async fn list_courses(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Course>>> {
    authorize(&state, &auth_user, Module::Courses).await?;

    let rows: Vec<CourseRow> = sqlx::query_as(
        r#"
        SELECT id, title, description, published, created_at
        FROM courses
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT 200
        "#,
    )
    .bind(auth_user.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(Course::from).collect()))
}
