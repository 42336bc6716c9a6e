use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use tracing::info;

use reimburse_core::domain::company::CompanyId;
use reimburse_core::domain::notification::{Notification, NotificationId};
use reimburse_core::domain::user::UserId;
use reimburse_core::errors::ApplicationError;

use super::{correlation_id, error_response, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    pub user_id: String,
    #[serde(default)]
    pub company_id: Option<String>,
}

/// Newest first.
pub async fn list_notifications(
    State(state): State<ApiState>,
    Query(query): Query<InboxQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Notification>>> {
    let correlation_id = correlation_id(&headers);
    let company_id = query.company_id.map(CompanyId);
    state
        .notifications
        .list_for_user(&UserId(query.user_id), company_id.as_ref())
        .await
        .map(Json)
        .map_err(|failure| error_response(failure.into(), &correlation_id))
}

pub async fn mark_read(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let correlation_id = correlation_id(&headers);
    let found = state
        .notifications
        .mark_read(&NotificationId(id.clone()))
        .await
        .map_err(|failure| error_response(failure.into(), &correlation_id))?;
    if !found {
        return Err(error_response(ApplicationError::not_found("notification", id), &correlation_id));
    }

    info!(
        event_name = "notification.read",
        correlation_id = %correlation_id,
        notification_id = %id,
        "notification marked read"
    );
    Ok(StatusCode::NO_CONTENT)
}
