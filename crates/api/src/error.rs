//! API error types and HTTP mappings

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use karvico_billing::BillingError;
use karvico_shared::{Module, Plan};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by request handlers.
///
/// `UpgradeRequired` is the entitlement denial: it names the module and the
/// minimum plan so the client can render an actionable upgrade prompt
/// rather than a generic failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("module {module} requires the {required_plan} plan or higher")]
    UpgradeRequired { module: Module, required_plan: Plan },

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized", "message": self.to_string() }),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "bad_request", "message": msg }),
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "message": msg }),
            ),
            ApiError::UpgradeRequired {
                module,
                required_plan,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({
                    "error": "upgrade_required",
                    "message": self.to_string(),
                    "module": module,
                    "required_plan": required_plan,
                }),
            ),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "service_unavailable", "message": self.to_string() }),
            ),
            // Internal details stay in the logs, not in the response
            ApiError::Database(msg) | ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error", "message": "internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Database(e.to_string())
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("Invalid webhook signature".to_string())
            }
            BillingError::InvalidPlan(msg) => ApiError::BadRequest(msg),
            BillingError::Config(msg) => {
                tracing::error!(error = %msg, "Billing configuration error");
                ApiError::ServiceUnavailable
            }
            BillingError::SubscriptionNotFound(id) => {
                ApiError::NotFound(format!("subscription {}", id))
            }
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::StripeApi(msg) | BillingError::Internal(msg) => ApiError::Internal(msg),
            BillingError::WebhookEventNotSupported(msg) => ApiError::BadRequest(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upgrade_required_names_module_and_plan() {
        let response = ApiError::UpgradeRequired {
            module: Module::Crm,
            required_plan: Plan::Silver,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "upgrade_required");
        assert_eq!(body["module"], "crm");
        assert_eq!(body["required_plan"], "silver");
        assert!(body["message"].as_str().unwrap().contains("silver"));
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let response = ApiError::Database("connection refused on 10.0.0.5".to_string())
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "internal server error");
    }

    #[test]
    fn signature_failures_map_to_bad_request() {
        let err: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
