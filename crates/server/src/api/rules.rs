use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use reimburse_core::approvals::ApproverAction;
use reimburse_core::domain::company::CompanyId;
use reimburse_core::domain::rule::{ApprovalRule, RuleId};

use super::{correlation_id, error_response, ApiResult, ApiState};
use crate::services::{NewRule, RuleDraft, RulePreview};

#[derive(Debug, Deserialize)]
pub struct RuleListQuery {
    pub company_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub actions: Vec<ApproverAction>,
}

pub async fn create_rule(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewRule>,
) -> ApiResult<(StatusCode, Json<ApprovalRule>)> {
    let correlation_id = correlation_id(&headers);
    let rule = state
        .directory
        .create_rule(body, &correlation_id)
        .await
        .map_err(|failure| error_response(failure, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn list_rules(
    State(state): State<ApiState>,
    Query(query): Query<RuleListQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ApprovalRule>>> {
    let correlation_id = correlation_id(&headers);
    state
        .directory
        .rules(&CompanyId(query.company_id))
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn get_rule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ApprovalRule>> {
    let correlation_id = correlation_id(&headers);
    state
        .directory
        .rule(&RuleId(id))
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn update_rule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RuleDraft>,
) -> ApiResult<Json<ApprovalRule>> {
    let correlation_id = correlation_id(&headers);
    state
        .directory
        .update_rule(&RuleId(id), body, &correlation_id)
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn delete_rule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let correlation_id = correlation_id(&headers);
    state
        .directory
        .delete_rule(&RuleId(id), &correlation_id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|failure| error_response(failure, &correlation_id))
}

/// Runs the evaluator for a stored rule over caller-supplied actions.
pub async fn preview_rule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PreviewRequest>,
) -> ApiResult<Json<RulePreview>> {
    let correlation_id = correlation_id(&headers);
    state
        .directory
        .preview_rule(&RuleId(id), &body.actions)
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}
