use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use reimburse_core::domain::company::{Company, CompanyId};

use super::{correlation_id, error_response, ApiResult, ApiState};
use crate::services::NewCompany;

pub async fn create_company(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewCompany>,
) -> ApiResult<(StatusCode, Json<Company>)> {
    let correlation_id = correlation_id(&headers);
    let company = state
        .directory
        .create_company(body, &correlation_id)
        .await
        .map_err(|failure| error_response(failure, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(company)))
}

pub async fn get_company(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Company>> {
    let correlation_id = correlation_id(&headers);
    state
        .directory
        .company(&CompanyId(id))
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}
