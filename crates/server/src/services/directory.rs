//! Companies, users and approval rules: the reference data the expense
//! workflow reads.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use reimburse_core::approvals::{evaluate_rule, ApproverAction, RuleDecision};
use reimburse_core::domain::company::{Company, CompanyId};
use reimburse_core::domain::rule::{ApprovalRule, RuleId, RulePolicy, RuleScope};
use reimburse_core::domain::user::{User, UserId, UserRole};
use reimburse_core::errors::{ApplicationError, DomainError};
use reimburse_db::Repositories;

#[derive(Clone, Debug, Deserialize)]
pub struct NewCompany {
    pub name: String,
    #[serde(default)]
    pub country: String,
    pub default_currency: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub company_id: CompanyId,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    #[serde(default)]
    pub manager_id: Option<UserId>,
    #[serde(default)]
    pub is_manager_approver: bool,
}

/// Editable part of an approval rule.
#[derive(Clone, Debug, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    pub policy: RulePolicy,
    #[serde(default)]
    pub approval_sequence: Vec<UserId>,
    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewRule {
    pub company_id: CompanyId,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(flatten)]
    pub draft: RuleDraft,
}

fn default_active() -> bool {
    true
}

#[derive(Clone, Debug, Serialize)]
pub struct RulePreview {
    pub rule_id: RuleId,
    pub total_approvers: usize,
    pub outcome: &'static str,
    pub decision: RuleDecision,
}

#[derive(Clone)]
pub struct DirectoryService {
    repositories: Repositories,
}

impl DirectoryService {
    pub fn new(repositories: Repositories) -> Self {
        Self { repositories }
    }

    pub async fn create_company(
        &self,
        input: NewCompany,
        correlation_id: &str,
    ) -> Result<Company, ApplicationError> {
        let company = Company::new(
            CompanyId(format!("co-{}", Uuid::new_v4())),
            input.name,
            input.country,
            &input.default_currency,
            Utc::now(),
        )?;
        self.repositories.companies.save(company.clone()).await?;

        info!(
            event_name = "directory.company.created",
            correlation_id = %correlation_id,
            company_id = %company.id.0,
            default_currency = %company.default_currency,
            "company created"
        );
        Ok(company)
    }

    pub async fn company(&self, id: &CompanyId) -> Result<Company, ApplicationError> {
        self.repositories
            .companies
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("company", id.0.clone()))
    }

    pub async fn create_user(
        &self,
        input: NewUser,
        correlation_id: &str,
    ) -> Result<User, ApplicationError> {
        self.company(&input.company_id).await?;
        if let Some(manager_id) = &input.manager_id {
            let manager = self.user(manager_id).await?;
            if manager.company_id != input.company_id {
                return Err(DomainError::Validation(format!(
                    "manager `{manager_id}` belongs to another company"
                ))
                .into());
            }
        }

        let user = User {
            id: UserId(format!("u-{}", Uuid::new_v4())),
            company_id: input.company_id,
            name: input.name.trim().to_string(),
            email: input.email.trim().to_ascii_lowercase(),
            role: input.role,
            manager_id: input.manager_id,
            is_manager_approver: input.is_manager_approver,
            created_at: Utc::now(),
        };
        user.validate()?;
        self.repositories.users.save(user.clone()).await?;

        info!(
            event_name = "directory.user.created",
            correlation_id = %correlation_id,
            company_id = %user.company_id.0,
            user_id = %user.id,
            role = user.role.as_str(),
            "user created"
        );
        Ok(user)
    }

    pub async fn user(&self, id: &UserId) -> Result<User, ApplicationError> {
        self.repositories
            .users
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", id.0.clone()))
    }

    pub async fn users(&self, company_id: &CompanyId) -> Result<Vec<User>, ApplicationError> {
        Ok(self.repositories.users.list_by_company(company_id).await?)
    }

    pub async fn create_rule(
        &self,
        input: NewRule,
        correlation_id: &str,
    ) -> Result<ApprovalRule, ApplicationError> {
        self.company(&input.company_id).await?;
        let now = Utc::now();
        let rule = ApprovalRule {
            id: RuleId(format!("rule-{}", Uuid::new_v4())),
            company_id: input.company_id,
            name: input.draft.name.trim().to_string(),
            policy: input.draft.policy,
            approval_sequence: input.draft.approval_sequence,
            scope: input.draft.scope,
            is_active: input.draft.is_active,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
        };
        self.check_rule(&rule).await?;
        self.repositories.rules.save(rule.clone()).await?;

        info!(
            event_name = "directory.rule.created",
            correlation_id = %correlation_id,
            company_id = %rule.company_id.0,
            rule_id = %rule.id.0,
            rule_type = rule.policy.kind(),
            "approval rule created"
        );
        Ok(rule)
    }

    pub async fn update_rule(
        &self,
        id: &RuleId,
        draft: RuleDraft,
        correlation_id: &str,
    ) -> Result<ApprovalRule, ApplicationError> {
        let mut rule = self.rule(id).await?;
        rule.name = draft.name.trim().to_string();
        rule.policy = draft.policy;
        rule.approval_sequence = draft.approval_sequence;
        rule.scope = draft.scope;
        rule.is_active = draft.is_active;
        rule.updated_at = Utc::now();
        self.check_rule(&rule).await?;
        self.repositories.rules.save(rule.clone()).await?;

        info!(
            event_name = "directory.rule.updated",
            correlation_id = %correlation_id,
            rule_id = %rule.id.0,
            rule_type = rule.policy.kind(),
            is_active = rule.is_active,
            "approval rule updated"
        );
        Ok(rule)
    }

    pub async fn rule(&self, id: &RuleId) -> Result<ApprovalRule, ApplicationError> {
        self.repositories
            .rules
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("approval rule", id.0.clone()))
    }

    pub async fn rules(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, ApplicationError> {
        Ok(self.repositories.rules.list_by_company(company_id).await?)
    }

    /// Expenses already submitted keep the policy snapshot taken at submission.
    pub async fn delete_rule(
        &self,
        id: &RuleId,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        if !self.repositories.rules.delete(id).await? {
            return Err(ApplicationError::not_found("approval rule", id.0.clone()));
        }
        info!(
            event_name = "directory.rule.deleted",
            correlation_id = %correlation_id,
            rule_id = %id.0,
            "approval rule deleted"
        );
        Ok(())
    }

    pub async fn preview_rule(
        &self,
        id: &RuleId,
        actions: &[ApproverAction],
    ) -> Result<RulePreview, ApplicationError> {
        let rule = self.rule(id).await?;
        let decision = evaluate_rule(&rule, actions);
        Ok(RulePreview {
            rule_id: rule.id,
            total_approvers: rule.approval_sequence.len(),
            outcome: decision.outcome(),
            decision,
        })
    }

    /// Validates the rule and checks that every approver it names works for the company.
    async fn check_rule(&self, rule: &ApprovalRule) -> Result<(), ApplicationError> {
        rule.validate()?;

        let members: HashSet<UserId> = self
            .repositories
            .users
            .list_by_company(&rule.company_id)
            .await?
            .into_iter()
            .map(|user| user.id)
            .collect();
        let unknown = rule
            .approval_sequence
            .iter()
            .chain(rule.policy.specific_approver_ids())
            .find(|approver| !members.contains(*approver));
        if let Some(approver) = unknown {
            return Err(DomainError::Validation(format!(
                "approver `{approver}` is not a user of company `{}`",
                rule.company_id.0
            ))
            .into());
        }
        Ok(())
    }
}
