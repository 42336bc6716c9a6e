use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use reimburse_core::domain::company::{Company, CompanyId};
use reimburse_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use reimburse_core::domain::notification::{Notification, NotificationId};
use reimburse_core::domain::rule::{ApprovalRule, RuleId};
use reimburse_core::domain::user::{User, UserId};
use reimburse_core::errors::ApplicationError;

use crate::DbPool;

pub mod company;
pub mod expense;
pub mod memory;
pub mod notification;
pub mod rule;
pub mod user;

pub use company::SqlCompanyRepository;
pub use expense::SqlExpenseRepository;
pub use memory::{
    InMemoryCompanyRepository, InMemoryExpenseRepository, InMemoryNotificationRepository,
    InMemoryRuleRepository, InMemoryUserRepository,
};
pub use notification::SqlNotificationRepository;
pub use rule::SqlRuleRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("expense `{id}` was modified concurrently (expected revision {expected_revision})")]
    Conflict { id: String, expected_revision: u64 },
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { .. } => ApplicationError::Conflict(value.to_string()),
            RepositoryError::Database(_) | RepositoryError::Decode(_) => {
                ApplicationError::Persistence(value.to_string())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpenseFilter {
    pub company_id: CompanyId,
    pub status: Option<ExpenseStatus>,
    pub submitter_id: Option<UserId>,
}

impl ExpenseFilter {
    pub fn for_company(company_id: CompanyId) -> Self {
        Self { company_id, status: None, submitter_id: None }
    }

    pub fn matches(&self, expense: &Expense) -> bool {
        expense.company_id == self.company_id
            && self.status.map_or(true, |status| expense.status == status)
            && self
                .submitter_id
                .as_ref()
                .map_or(true, |submitter| &expense.submitter_id == submitter)
    }
}

#[async_trait]
pub trait CompanyRepository: Send + Sync {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError>;
    async fn save(&self, company: Company) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn list_by_company(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError>;
    async fn save(&self, user: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, RepositoryError>;
    /// Newest first.
    async fn list_by_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError>;
    async fn list_active_by_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError>;
    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &RuleId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError>;
    /// Newest first.
    async fn list(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>, RepositoryError>;
    /// Expenses whose current timeline step belongs to `approver_id`, oldest first.
    async fn list_awaiting_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<Expense>, RepositoryError>;
    async fn insert(&self, expense: Expense) -> Result<(), RepositoryError>;
    /// Writes `expense` only if the stored revision still equals `expected_revision`.
    async fn update(&self, expense: Expense, expected_revision: u64)
        -> Result<(), RepositoryError>;
    async fn delete(&self, id: &ExpenseId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn save(&self, notification: Notification) -> Result<(), RepositoryError>;
    async fn list_for_user(
        &self,
        user_id: &UserId,
        company_id: Option<&CompanyId>,
    ) -> Result<Vec<Notification>, RepositoryError>;
    async fn mark_read(&self, id: &NotificationId) -> Result<bool, RepositoryError>;
}

/// Every persistence port the application needs, behind one handle.
#[derive(Clone)]
pub struct Repositories {
    pub companies: Arc<dyn CompanyRepository>,
    pub users: Arc<dyn UserRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub expenses: Arc<dyn ExpenseRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            companies: Arc::new(SqlCompanyRepository::new(pool.clone())),
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            rules: Arc::new(SqlRuleRepository::new(pool.clone())),
            expenses: Arc::new(SqlExpenseRepository::new(pool.clone())),
            notifications: Arc::new(SqlNotificationRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            companies: Arc::new(InMemoryCompanyRepository::default()),
            users: Arc::new(InMemoryUserRepository::default()),
            rules: Arc::new(InMemoryRuleRepository::default()),
            expenses: Arc::new(InMemoryExpenseRepository::default()),
            notifications: Arc::new(InMemoryNotificationRepository::default()),
        }
    }
}

pub(crate) fn decode_error(error: impl ToString) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    raw.parse::<Decimal>().map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(
    column: &str,
    value: &T,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}
