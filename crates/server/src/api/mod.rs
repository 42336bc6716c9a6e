//! JSON HTTP surface under `/api/v1`.
//!
//! Handlers stay thin: they pull a correlation id from the request, call the
//! application services and map [`ApplicationError`] onto a status code plus
//! an [`ErrorBody`].

pub mod approvals;
pub mod companies;
pub mod expenses;
pub mod notifications;
pub mod rules;
pub mod users;

use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use reimburse_core::errors::ApplicationError;
use reimburse_db::NotificationRepository;

use crate::services::{DirectoryService, ExpenseService};

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const MAX_CORRELATION_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct ApiState {
    pub directory: Arc<DirectoryService>,
    pub expenses: Arc<ExpenseService>,
    pub notifications: Arc<dyn NotificationRepository>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);
pub type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/companies", post(companies::create_company))
        .route("/api/v1/companies/{id}", get(companies::get_company))
        .route("/api/v1/users", post(users::create_user).get(users::list_users))
        .route("/api/v1/users/{id}", get(users::get_user))
        .route("/api/v1/rules", post(rules::create_rule).get(rules::list_rules))
        .route(
            "/api/v1/rules/{id}",
            get(rules::get_rule).put(rules::update_rule).delete(rules::delete_rule),
        )
        .route("/api/v1/rules/{id}/preview", post(rules::preview_rule))
        .route("/api/v1/expenses", post(expenses::create_expense).get(expenses::list_expenses))
        .route(
            "/api/v1/expenses/{id}",
            get(expenses::get_expense).put(expenses::update_expense).delete(expenses::delete_expense),
        )
        .route("/api/v1/expenses/{id}/submit", post(approvals::submit_expense))
        .route("/api/v1/expenses/{id}/approve", post(approvals::approve_expense))
        .route("/api/v1/expenses/{id}/reject", post(approvals::reject_expense))
        .route("/api/v1/approvals/queue", get(approvals::approval_queue))
        .route("/api/v1/notifications", get(notifications::list_notifications))
        .route("/api/v1/notifications/{id}/read", post(notifications::mark_read))
        .with_state(state)
}

/// Caller-supplied `x-correlation-id`, or a fresh one.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_CORRELATION_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()))
}

pub fn error_response(failure: ApplicationError, correlation_id: &str) -> ApiError {
    let interface = failure.into_interface(correlation_id);
    let status = StatusCode::from_u16(interface.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = %correlation_id,
            status = status.as_u16(),
            error = %interface.message(),
            "request failed"
        );
    } else {
        warn!(
            event_name = "api.request.rejected",
            correlation_id = %correlation_id,
            status = status.as_u16(),
            error = %interface.message(),
            "request rejected"
        );
    }

    (
        status,
        Json(ErrorBody {
            error: interface.user_message().to_string(),
            detail: interface.message().to_string(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}


#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{HeaderMap, HeaderValue, Request, StatusCode},
    };
    use tower::ServiceExt;

    use reimburse_core::errors::ApplicationError;

    use super::{correlation_id, error_response, router, testing, ErrorBody, CORRELATION_HEADER};

    #[test]
    fn correlation_id_prefers_the_request_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_HEADER, HeaderValue::from_static("  trace-42 "));
        assert_eq!(correlation_id(&headers), "trace-42");

        let generated = correlation_id(&HeaderMap::new());
        assert!(generated.starts_with("req-"));
    }

    #[test]
    fn error_response_carries_status_and_correlation() {
        let (status, body) =
            error_response(ApplicationError::not_found("expense", "exp-9"), "trace-7");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0.correlation_id, "trace-7");
        assert_eq!(body.0.detail, "expense `exp-9` not found");
        assert_eq!(body.0.error, "The requested resource does not exist.");
    }

    #[tokio::test]
    async fn router_reports_missing_expenses_as_json_404() {
        let app = router(testing::state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/expenses/exp-missing")
                    .header(CORRELATION_HEADER, "trace-router")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body: ErrorBody = serde_json::from_slice(&bytes).expect("error body");
        assert_eq!(body.correlation_id, "trace-router");
    }

    #[tokio::test]
    async fn router_creates_companies_from_json() {
        let app = router(testing::state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/companies")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"name":"Acme","country":"IN","default_currency":"inr"}"#,
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let company: serde_json::Value = serde_json::from_slice(&bytes).expect("company");
        assert_eq!(company["default_currency"], "INR");
    }
}
