use std::sync::Arc;

use reimburse_core::audit::TracingAuditSink;
use reimburse_core::config::AppConfig;
use reimburse_core::errors::ApplicationError;
use reimburse_core::workflow::ExpenseWorkflow;
use reimburse_db::{connect_with_config, migrations, DbPool, Repositories};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;
use crate::currency::build_converter;
use crate::services::{DirectoryService, ExpenseService, InboxDispatcher};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("currency converter setup failed: {0}")]
    Currency(#[source] ApplicationError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        currency_provider = config.currency.provider.as_str(),
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let converter = build_converter(&config.currency).map_err(BootstrapError::Currency)?;
    let repositories = Repositories::sql(db_pool.clone());
    let expenses = ExpenseService::new(
        repositories.clone(),
        ExpenseWorkflow::new(config.workflow.evaluate_rules_on_action),
        converter,
        Arc::new(InboxDispatcher::new(repositories.notifications.clone())),
        Arc::new(TracingAuditSink),
    );
    let api = ApiState {
        directory: Arc::new(DirectoryService::new(repositories.clone())),
        expenses: Arc::new(expenses),
        notifications: repositories.notifications,
    };

    Ok(Application { config, db_pool, api })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use reimburse_core::config::AppConfig;
    use rust_decimal::Decimal;

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};
    use crate::services::NewCompany;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_services() {
        let app = bootstrap_with_config(memory_config()).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('companies', 'users', 'approval_rules', 'expenses', 'notifications')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 5);

        let company = app
            .api
            .directory
            .create_company(
                NewCompany {
                    name: "Acme".to_string(),
                    country: "IN".to_string(),
                    default_currency: "INR".to_string(),
                },
                "test",
            )
            .await
            .expect("company persisted through sql repositories");
        let fetched = app.api.directory.company(&company.id).await.expect("company");
        assert_eq!(fetched.name, "Acme");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_malformed_static_rates() {
        let mut config = memory_config();
        config.currency.static_rates =
            BTreeMap::from([("USD-INR".to_string(), Decimal::new(8310, 2))]);

        let error = bootstrap_with_config(config).await.err().expect("invalid rate key");
        assert!(matches!(error, BootstrapError::Currency(_)));
        assert!(error.to_string().contains("USD-INR"));
    }

    #[tokio::test]
    async fn unreachable_database_is_a_connect_error() {
        let mut config = memory_config();
        config.database.url = "sqlite:///nonexistent-dir/reimburse.db".to_string();
        config.database.timeout_secs = 1;

        let error = bootstrap_with_config(config).await.err().expect("missing directory");
        assert!(matches!(error, BootstrapError::DatabaseConnect(_)));
    }
}
