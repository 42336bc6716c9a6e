use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use reimburse_core::domain::company::CompanyId;
use reimburse_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use reimburse_core::domain::user::UserId;
use reimburse_db::ExpenseFilter;

use super::{correlation_id, error_response, ApiResult, ApiState};
use crate::services::{ExpenseUpdate, NewExpense};

#[derive(Debug, Deserialize)]
pub struct ExpenseListQuery {
    pub company_id: String,
    #[serde(default)]
    pub status: Option<ExpenseStatus>,
    #[serde(default)]
    pub submitter_id: Option<String>,
}

impl From<ExpenseListQuery> for ExpenseFilter {
    fn from(query: ExpenseListQuery) -> Self {
        Self {
            company_id: CompanyId(query.company_id),
            status: query.status,
            submitter_id: query.submitter_id.map(UserId),
        }
    }
}

pub async fn create_expense(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewExpense>,
) -> ApiResult<(StatusCode, Json<Expense>)> {
    let correlation_id = correlation_id(&headers);
    let expense = state
        .expenses
        .create(body, &correlation_id)
        .await
        .map_err(|failure| error_response(failure, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn list_expenses(
    State(state): State<ApiState>,
    Query(query): Query<ExpenseListQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Expense>>> {
    let correlation_id = correlation_id(&headers);
    state
        .expenses
        .list(&ExpenseFilter::from(query))
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn get_expense(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Expense>> {
    let correlation_id = correlation_id(&headers);
    state
        .expenses
        .get(&ExpenseId(id))
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn update_expense(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ExpenseUpdate>,
) -> ApiResult<Json<Expense>> {
    let correlation_id = correlation_id(&headers);
    state
        .expenses
        .update_details(&ExpenseId(id), body, &correlation_id)
        .await
        .map(Json)
        .map_err(|failure| error_response(failure, &correlation_id))
}

pub async fn delete_expense(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let correlation_id = correlation_id(&headers);
    state
        .expenses
        .delete(&ExpenseId(id), &correlation_id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|failure| error_response(failure, &correlation_id))
}
