//! Workflow endpoints: submit, approve, reject and the approver queue.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use reimburse_core::domain::expense::{Expense, ExpenseId};
use reimburse_core::domain::user::UserId;
use reimburse_core::workflow::TransitionOutcome;

use super::{correlation_id, error_response, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub approver_id: UserId,
    #[serde(default)]
    pub comment: Option<String>,
}

/// A missing comment reaches the workflow as empty and is refused there.
#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub approver_id: UserId,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub approver_id: String,
}

pub async fn submit_expense(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<TransitionOutcome>> {
    let correlation_id = correlation_id(&headers);
    state
        .expenses
        .submit(&ExpenseId(id), &correlation_id)
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn approve_expense(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ApproveRequest>,
) -> ApiResult<Json<TransitionOutcome>> {
    let correlation_id = correlation_id(&headers);
    state
        .expenses
        .approve(&ExpenseId(id), body.approver_id, body.comment, &correlation_id)
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn reject_expense(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RejectRequest>,
) -> ApiResult<Json<TransitionOutcome>> {
    let correlation_id = correlation_id(&headers);
    state
        .expenses
        .reject(&ExpenseId(id), body.approver_id, body.comment, &correlation_id)
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn approval_queue(
    State(state): State<ApiState>,
    Query(query): Query<QueueQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Expense>>> {
    let correlation_id = correlation_id(&headers);
    state
        .expenses
        .approval_queue(&UserId(query.approver_id))
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}
