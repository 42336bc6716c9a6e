//! `/health`: database reachability, schema currency and the active rate source.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use reimburse_core::config::CurrencyConfig;
use reimburse_db::{migrations, ping, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    currency_provider: &'static str,
}

impl HealthState {
    pub fn new(db_pool: DbPool, currency: &CurrencyConfig) -> Self {
        Self { db_pool, currency_provider: currency.provider.as_str() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchemaStatus {
    pub status: Readiness,
    pub applied: usize,
    pub known: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: Readiness,
    pub database: Readiness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_error: Option<String>,
    pub schema: Option<SchemaStatus>,
    pub currency_provider: &'static str,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// 503 unless the database answers and every embedded migration is applied.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let (database, database_error, schema) = match ping(&state.db_pool).await {
        Ok(()) => (Readiness::Ready, None, Some(schema_status(&state.db_pool).await)),
        Err(error) => (Readiness::Degraded, Some(error.to_string()), None),
    };

    let ready = database == Readiness::Ready
        && schema.as_ref().is_some_and(|schema| schema.status == Readiness::Ready);
    let report = HealthReport {
        status: if ready { Readiness::Ready } else { Readiness::Degraded },
        database,
        database_error,
        schema,
        currency_provider: state.currency_provider,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(report))
}

async fn schema_status(pool: &DbPool) -> SchemaStatus {
    let known = migrations::MIGRATOR.iter().count();
    let applied =
        migrations::applied_versions(pool).await.map(|versions| versions.len()).unwrap_or(0);
    let status = if applied >= known { Readiness::Ready } else { Readiness::Degraded };
    SchemaStatus { status, applied, known }
}
