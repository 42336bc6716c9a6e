use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use reimburse_core::domain::company::CompanyId;
use reimburse_core::domain::user::{User, UserId};

use super::{correlation_id, error_response, ApiResult, ApiState};
use crate::services::NewUser;

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub company_id: String,
}

pub async fn create_user(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let correlation_id = correlation_id(&headers);
    let user = state
        .directory
        .create_user(body, &correlation_id)
        .await
        .map_err(|failure| error_response(failure, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn list_users(
    State(state): State<ApiState>,
    Query(query): Query<UserListQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<User>>> {
    let correlation_id = correlation_id(&headers);
    state
        .directory
        .users(&CompanyId(query.company_id))
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn get_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<User>> {
    let correlation_id = correlation_id(&headers);
    state
        .directory
        .user(&UserId(id))
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}
