use std::collections::HashMap;

use tokio::sync::RwLock;

use reimburse_core::domain::company::{Company, CompanyId};
use reimburse_core::domain::expense::{Expense, ExpenseId};
use reimburse_core::domain::notification::{Notification, NotificationId};
use reimburse_core::domain::rule::{ApprovalRule, RuleId};
use reimburse_core::domain::user::{User, UserId};

use super::{
    CompanyRepository, ExpenseFilter, ExpenseRepository, NotificationRepository, RepositoryError,
    RuleRepository, UserRepository,
};

#[derive(Default)]
pub struct InMemoryCompanyRepository {
    companies: RwLock<HashMap<String, Company>>,
}

#[async_trait::async_trait]
impl CompanyRepository for InMemoryCompanyRepository {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let companies = self.companies.read().await;
        Ok(companies.get(&id.0).cloned())
    }

    async fn save(&self, company: Company) -> Result<(), RepositoryError> {
        let mut companies = self.companies.write().await;
        companies.insert(company.id.0.clone(), company);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn list_by_company(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut listed: Vec<User> =
            users.values().filter(|user| &user.company_id == company_id).cloned().collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(listed)
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<HashMap<String, ApprovalRule>>,
}

impl InMemoryRuleRepository {
    async fn list_where(&self, company_id: &CompanyId, active_only: bool) -> Vec<ApprovalRule> {
        let rules = self.rules.read().await;
        let mut listed: Vec<ApprovalRule> = rules
            .values()
            .filter(|rule| &rule.company_id == company_id && (!active_only || rule.is_active))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        listed
    }
}

#[async_trait::async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules.get(&id.0).cloned())
    }

    async fn list_by_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        Ok(self.list_where(company_id, false).await)
    }

    async fn list_active_by_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        Ok(self.list_where(company_id, true).await)
    }

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        rules.insert(rule.id.0.clone(), rule);
        Ok(())
    }

    async fn delete(&self, id: &RuleId) -> Result<bool, RepositoryError> {
        let mut rules = self.rules.write().await;
        Ok(rules.remove(&id.0).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryExpenseRepository {
    expenses: RwLock<HashMap<String, Expense>>,
}

#[async_trait::async_trait]
impl ExpenseRepository for InMemoryExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let expenses = self.expenses.read().await;
        Ok(expenses.get(&id.0).cloned())
    }

    async fn list(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>, RepositoryError> {
        let expenses = self.expenses.read().await;
        let mut listed: Vec<Expense> =
            expenses.values().filter(|expense| filter.matches(expense)).cloned().collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(listed)
    }

    async fn list_awaiting_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let expenses = self.expenses.read().await;
        let mut listed: Vec<Expense> = expenses
            .values()
            .filter(|expense| expense.current_approver() == Some(approver_id))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(listed)
    }

    async fn insert(&self, expense: Expense) -> Result<(), RepositoryError> {
        let mut expenses = self.expenses.write().await;
        if expenses.contains_key(&expense.id.0) {
            return Err(RepositoryError::Decode(format!("expense `{}` already exists", expense.id)));
        }
        expenses.insert(expense.id.0.clone(), expense);
        Ok(())
    }

    async fn update(
        &self,
        expense: Expense,
        expected_revision: u64,
    ) -> Result<(), RepositoryError> {
        let mut expenses = self.expenses.write().await;
        match expenses.get(&expense.id.0) {
            Some(stored) if stored.revision == expected_revision => {
                expenses.insert(expense.id.0.clone(), expense);
                Ok(())
            }
            _ => Err(RepositoryError::Conflict { id: expense.id.0, expected_revision }),
        }
    }

    async fn delete(&self, id: &ExpenseId) -> Result<bool, RepositoryError> {
        let mut expenses = self.expenses.write().await;
        Ok(expenses.remove(&id.0).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    notifications: RwLock<HashMap<String, Notification>>,
}

#[async_trait::async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn save(&self, notification: Notification) -> Result<(), RepositoryError> {
        let mut notifications = self.notifications.write().await;
        notifications.insert(notification.id.0.clone(), notification);
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        company_id: Option<&CompanyId>,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let notifications = self.notifications.read().await;
        let mut listed: Vec<Notification> = notifications
            .values()
            .filter(|notification| &notification.user_id == user_id)
            .filter(|notification| company_id.map_or(true, |id| &notification.company_id == id))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(listed)
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<bool, RepositoryError> {
        let mut notifications = self.notifications.write().await;
        match notifications.get_mut(&id.0) {
            Some(notification) => {
                notification.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
