//! Application service behind the expense endpoints.
//!
//! Every state change goes through [`ExpenseWorkflow`]; this module loads the
//! collaborators the workflow needs, performs the side effects named in the
//! resulting [`TransitionOutcome`] and persists with a revision check.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use reimburse_core::approvals::build_approver_sequence;
use reimburse_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use reimburse_core::currency::CurrencyConverter;
use reimburse_core::domain::company::CompanyId;
use reimburse_core::domain::expense::{
    ApprovalStep, Expense, ExpenseDetails, ExpenseId, ExpenseStatus,
};
use reimburse_core::domain::notification::{
    Notification, NotificationDispatcher, NotificationKind,
};
use reimburse_core::domain::rule::{select_active_rule, RuleId, RulePolicy};
use reimburse_core::domain::user::UserId;
use reimburse_core::errors::{ApplicationError, DomainError};
use reimburse_core::workflow::{ExpenseWorkflow, TransitionOutcome, WorkflowAction, WorkflowCommand};
use reimburse_db::{ExpenseFilter, Repositories, RepositoryError};

#[derive(Clone, Debug, Deserialize)]
pub struct NewExpense {
    pub company_id: CompanyId,
    pub submitter_id: UserId,
    #[serde(flatten)]
    pub details: ExpenseDetails,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExpenseUpdate {
    /// Revision the caller last read; a mismatch fails with a conflict.
    #[serde(default)]
    pub expected_revision: Option<u64>,
    #[serde(flatten)]
    pub details: ExpenseDetails,
}

struct ApproverPlan {
    approvers: Vec<ApprovalStep>,
    rule_id: Option<RuleId>,
    policy: Option<RulePolicy>,
}

pub struct ExpenseService {
    repositories: Repositories,
    workflow: ExpenseWorkflow,
    converter: Arc<dyn CurrencyConverter>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
}

impl ExpenseService {
    pub fn new(
        repositories: Repositories,
        workflow: ExpenseWorkflow,
        converter: Arc<dyn CurrencyConverter>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { repositories, workflow, converter, dispatcher, audit }
    }

    pub async fn create(
        &self,
        input: NewExpense,
        correlation_id: &str,
    ) -> Result<Expense, ApplicationError> {
        self.repositories
            .companies
            .find_by_id(&input.company_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("company", input.company_id.0.clone()))?;
        let submitter = self
            .repositories
            .users
            .find_by_id(&input.submitter_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", input.submitter_id.0.clone()))?;
        if submitter.company_id != input.company_id {
            return Err(DomainError::Validation(format!(
                "submitter `{}` does not belong to company `{}`",
                submitter.id, input.company_id.0
            ))
            .into());
        }

        let expense = Expense::draft(
            ExpenseId(format!("exp-{}", Uuid::new_v4())),
            input.company_id,
            input.submitter_id,
            input.details,
            Utc::now(),
        )?;
        self.repositories.expenses.insert(expense.clone()).await?;

        self.audit.emit(
            AuditEvent::new(
                Some(expense.id.clone()),
                correlation_id,
                "expense.created",
                AuditCategory::Ingress,
                expense.submitter_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("amount", expense.amount.to_string())
            .with_metadata("currency", expense.currency.clone()),
        );
        info!(
            event_name = "expense.created",
            correlation_id = %correlation_id,
            expense_id = %expense.id,
            company_id = %expense.company_id.0,
            amount = %expense.amount,
            currency = %expense.currency,
            "expense draft created"
        );
        Ok(expense)
    }

    pub async fn get(&self, id: &ExpenseId) -> Result<Expense, ApplicationError> {
        self.repositories
            .expenses
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("expense", id.0.clone()))
    }

    pub async fn list(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>, ApplicationError> {
        Ok(self.repositories.expenses.list(filter).await?)
    }

    /// Expenses currently waiting on `approver_id`, oldest first.
    pub async fn approval_queue(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<Expense>, ApplicationError> {
        Ok(self.repositories.expenses.list_awaiting_approver(approver_id).await?)
    }

    pub async fn update_details(
        &self,
        id: &ExpenseId,
        update: ExpenseUpdate,
        correlation_id: &str,
    ) -> Result<Expense, ApplicationError> {
        let mut expense = self.get(id).await?;
        let stored_revision = expense.revision;
        if let Some(expected) = update.expected_revision {
            if expected != stored_revision {
                warn!(
                    event_name = "expense.update.stale_revision",
                    correlation_id = %correlation_id,
                    expense_id = %expense.id,
                    expected_revision = expected,
                    stored_revision,
                    "expense edit based on a stale revision"
                );
                return Err(RepositoryError::Conflict {
                    id: expense.id.0.clone(),
                    expected_revision: expected,
                }
                .into());
            }
        }

        expense.update_details(update.details, Utc::now())?;
        self.store(&expense, stored_revision, correlation_id).await?;

        info!(
            event_name = "expense.updated",
            correlation_id = %correlation_id,
            expense_id = %expense.id,
            revision = expense.revision,
            "expense draft updated"
        );
        Ok(expense)
    }

    /// Drafts and closed expenses can be deleted; in-flight ones cannot.
    pub async fn delete(&self, id: &ExpenseId, correlation_id: &str) -> Result<(), ApplicationError> {
        let expense = self.get(id).await?;
        if expense.status.is_awaiting_action() {
            return Err(ApplicationError::Conflict(format!(
                "expense {} is {} and cannot be deleted while awaiting approval",
                expense.id, expense.status
            )));
        }
        if !self.repositories.expenses.delete(id).await? {
            return Err(ApplicationError::not_found("expense", id.0.clone()));
        }

        info!(
            event_name = "expense.deleted",
            correlation_id = %correlation_id,
            expense_id = %expense.id,
            status = %expense.status,
            "expense deleted"
        );
        Ok(())
    }

    pub async fn submit(
        &self,
        id: &ExpenseId,
        correlation_id: &str,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let expense = self.get(id).await?;
        let plan = if expense.status == ExpenseStatus::Draft {
            self.plan_approvers(&expense, correlation_id).await?
        } else {
            ApproverPlan { approvers: Vec::new(), rule_id: None, policy: None }
        };

        let actor = expense.submitter_id.0.clone();
        let command = WorkflowCommand::Submit {
            approvers: plan.approvers,
            rule_id: plan.rule_id,
            policy: plan.policy,
        };
        self.transition(expense, command, actor, correlation_id).await
    }

    pub async fn approve(
        &self,
        id: &ExpenseId,
        approver_id: UserId,
        comment: Option<String>,
        correlation_id: &str,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let expense = self.get(id).await?;
        let actor = approver_id.0.clone();
        let command = WorkflowCommand::Approve { approver_id, comment };
        self.transition(expense, command, actor, correlation_id).await
    }

    pub async fn reject(
        &self,
        id: &ExpenseId,
        approver_id: UserId,
        comment: String,
        correlation_id: &str,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let expense = self.get(id).await?;
        let actor = approver_id.0.clone();
        let command = WorkflowCommand::Reject { approver_id, comment };
        self.transition(expense, command, actor, correlation_id).await
    }

    async fn plan_approvers(
        &self,
        expense: &Expense,
        correlation_id: &str,
    ) -> Result<ApproverPlan, ApplicationError> {
        let submitter =
            self.repositories.users.find_by_id(&expense.submitter_id).await?.ok_or_else(|| {
                ApplicationError::not_found("user", expense.submitter_id.0.clone())
            })?;
        let company_users = self.repositories.users.list_by_company(&expense.company_id).await?;
        let rules = self.repositories.rules.list_active_by_company(&expense.company_id).await?;
        let rule =
            select_active_rule(&rules, &expense.company_id, &expense.category, expense.amount);

        let sequence = build_approver_sequence(&submitter, &company_users, rule)?;
        info!(
            event_name = "expense.approvers.planned",
            correlation_id = %correlation_id,
            expense_id = %expense.id,
            rule_id = rule.map(|rule| rule.id.0.as_str()).unwrap_or("none"),
            approver_count = sequence.len(),
            "approver sequence assembled"
        );

        Ok(ApproverPlan {
            approvers: sequence.iter().map(|approver| approver.to_step()).collect(),
            rule_id: rule.map(|rule| rule.id.clone()),
            policy: rule.map(|rule| rule.policy.clone()),
        })
    }

    async fn transition(
        &self,
        expense: Expense,
        command: WorkflowCommand,
        actor: String,
        correlation_id: &str,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let event = command.event();
        let context = AuditContext::new(Some(expense.id.clone()), correlation_id, actor);
        let mut outcome = match self.workflow.apply_with_audit(
            &expense,
            command,
            Utc::now(),
            self.audit.as_ref(),
            &context,
        ) {
            Ok(outcome) => outcome,
            Err(rejection) => {
                warn!(
                    event_name = "expense.workflow.rejected",
                    correlation_id = %correlation_id,
                    expense_id = %expense.id,
                    event = event.as_str(),
                    status = %expense.status,
                    actor = %context.actor,
                    error = %rejection,
                    "workflow transition rejected"
                );
                return Err(rejection.into());
            }
        };

        if outcome.actions.contains(&WorkflowAction::ConvertCurrency) {
            self.convert(&mut outcome.expense, correlation_id).await?;
        }

        self.store(&outcome.expense, expense.revision, correlation_id).await?;

        let event_name =
            format!("expense.workflow.{}", outcome.event_type().trim_start_matches("expense."));
        info!(
            event_name = %event_name,
            correlation_id = %correlation_id,
            expense_id = %outcome.expense.id,
            from = %outcome.from,
            to = %outcome.to,
            revision = outcome.expense.revision,
            decision = outcome.decision.as_ref().map(|d| d.explanation.as_str()).unwrap_or(""),
            "expense transition committed"
        );

        self.notify(&outcome, correlation_id).await;
        Ok(outcome)
    }

    /// Fills in the company-currency amount; same-currency expenses are left as is.
    async fn convert(&self, expense: &mut Expense, correlation_id: &str) -> Result<(), ApplicationError> {
        let company =
            self.repositories.companies.find_by_id(&expense.company_id).await?.ok_or_else(
                || ApplicationError::not_found("company", expense.company_id.0.clone()),
            )?;
        if company.default_currency == expense.currency {
            return Ok(());
        }

        let conversion = match self
            .converter
            .convert(expense.amount, &expense.currency, &company.default_currency)
            .await
        {
            Ok(conversion) => conversion,
            Err(failure) => {
                error!(
                    event_name = "expense.currency.failed",
                    correlation_id = %correlation_id,
                    expense_id = %expense.id,
                    from = %expense.currency,
                    to = %company.default_currency,
                    error = %failure,
                    "currency conversion failed; approval not persisted"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(expense.id.clone()),
                        correlation_id,
                        "expense.currency_conversion_failed",
                        AuditCategory::Currency,
                        "system",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", failure.to_string()),
                );
                return Err(failure);
            }
        };

        expense.converted_amount = Some(conversion.converted_amount);
        expense.conversion_rate = Some(conversion.rate);
        self.audit.emit(
            AuditEvent::new(
                Some(expense.id.clone()),
                correlation_id,
                "expense.currency_converted",
                AuditCategory::Currency,
                "system",
                AuditOutcome::Success,
            )
            .with_metadata("from", expense.currency.clone())
            .with_metadata("to", company.default_currency)
            .with_metadata("rate", conversion.rate.to_string())
            .with_metadata("converted_amount", conversion.converted_amount.to_string()),
        );
        Ok(())
    }

    async fn store(
        &self,
        expense: &Expense,
        expected_revision: u64,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        match self.repositories.expenses.update(expense.clone(), expected_revision).await {
            Ok(()) => Ok(()),
            Err(conflict @ RepositoryError::Conflict { .. }) => {
                warn!(
                    event_name = "expense.persist.conflict",
                    correlation_id = %correlation_id,
                    expense_id = %expense.id,
                    expected_revision,
                    "expense changed concurrently; nothing written"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(expense.id.clone()),
                        correlation_id,
                        "expense.persist_conflict",
                        AuditCategory::Persistence,
                        "system",
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("expected_revision", expected_revision.to_string()),
                );
                Err(conflict.into())
            }
            Err(failure) => {
                error!(
                    event_name = "expense.persist.failed",
                    correlation_id = %correlation_id,
                    expense_id = %expense.id,
                    error = %failure,
                    "failed to persist expense"
                );
                Err(failure.into())
            }
        }
    }

    /// Dispatch failures are logged; the transition is already committed.
    async fn notify(&self, outcome: &TransitionOutcome, correlation_id: &str) {
        let expense = &outcome.expense;
        for action in &outcome.actions {
            let (recipient, kind) = match action {
                WorkflowAction::NotifyApprover { approver_id } => {
                    (approver_id.clone(), NotificationKind::ApprovalRequest)
                }
                WorkflowAction::NotifySubmitter { kind } => (expense.submitter_id.clone(), *kind),
                WorkflowAction::ConvertCurrency => continue,
            };
            let notification = Notification::new(
                expense.company_id.clone(),
                recipient,
                kind,
                expense.id.clone(),
                Utc::now(),
            );
            let recipient = notification.user_id.0.clone();
            if let Err(failure) = self.dispatcher.dispatch(notification).await {
                warn!(
                    event_name = "notification.dispatch_failed",
                    correlation_id = %correlation_id,
                    expense_id = %expense.id,
                    user_id = %recipient,
                    kind = kind.as_str(),
                    error = %failure,
                    "notification dispatch failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use reimburse_core::audit::{AuditCategory, AuditOutcome, InMemoryAuditSink};
    use reimburse_core::currency::StaticRateConverter;
    use reimburse_core::domain::company::{Company, CompanyId};
    use reimburse_core::domain::expense::{
        ApprovalStatus, Expense, ExpenseDetails, ExpenseId, ExpenseStatus,
    };
    use reimburse_core::domain::notification::{InMemoryNotificationDispatcher, NotificationKind};
    use reimburse_core::domain::rule::{ApprovalRule, RuleId, RulePolicy, RuleScope};
    use reimburse_core::domain::user::{User, UserId, UserRole};
    use reimburse_core::errors::{ApplicationError, DomainError};
    use reimburse_core::workflow::{ExpenseWorkflow, WorkflowError};
    use reimburse_db::Repositories;

    use super::{ExpenseService, ExpenseUpdate, NewExpense};

    struct Harness {
        service: ExpenseService,
        repositories: Repositories,
        dispatcher: InMemoryNotificationDispatcher,
        audit: InMemoryAuditSink,
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid timestamp")
    }

    fn company_id() -> CompanyId {
        CompanyId("co-1".to_string())
    }

    fn uid(id: &str) -> UserId {
        UserId(id.to_string())
    }

    fn user(id: &str, role: UserRole, manager: Option<&str>, offset: i64) -> User {
        User {
            id: uid(id),
            company_id: company_id(),
            name: id.trim_start_matches("u-").to_string(),
            email: format!("{id}@acme.test"),
            role,
            manager_id: manager.map(uid),
            is_manager_approver: manager.is_some(),
            created_at: base_time() + Duration::seconds(offset),
        }
    }

    fn staff() -> Vec<User> {
        vec![
            user("u-emp", UserRole::Employee, Some("u-mgr"), 0),
            user("u-mgr", UserRole::Manager, None, 1),
            user("u-fin", UserRole::Finance, None, 2),
            user("u-dir", UserRole::Director, None, 3),
        ]
    }

    fn rule(policy: RulePolicy, sequence: &[&str]) -> ApprovalRule {
        ApprovalRule {
            id: RuleId("rule-1".to_string()),
            company_id: company_id(),
            name: "Travel".to_string(),
            policy,
            approval_sequence: sequence.iter().map(|id| uid(id)).collect(),
            scope: RuleScope::default(),
            is_active: true,
            created_by: None,
            created_at: base_time(),
            updated_at: base_time(),
        }
    }

    async fn harness(users: Vec<User>, rules: Vec<ApprovalRule>) -> Harness {
        let repositories = Repositories::in_memory();
        let company = Company::new(company_id(), "Acme", "IN", "INR", base_time()).expect("company");
        repositories.companies.save(company).await.expect("save company");
        for user in users {
            repositories.users.save(user).await.expect("save user");
        }
        for rule in rules {
            repositories.rules.save(rule).await.expect("save rule");
        }

        let dispatcher = InMemoryNotificationDispatcher::default();
        let audit = InMemoryAuditSink::default();
        let converter = StaticRateConverter::new().with_rate("USD", "INR", Decimal::new(8310, 2));
        let service = ExpenseService::new(
            repositories.clone(),
            ExpenseWorkflow::default(),
            Arc::new(converter),
            Arc::new(dispatcher.clone()),
            Arc::new(audit.clone()),
        );
        Harness { service, repositories, dispatcher, audit }
    }

    fn details(amount: Decimal, currency: &str) -> ExpenseDetails {
        ExpenseDetails {
            category: "travel".to_string(),
            description: "Client visit".to_string(),
            expense_date: NaiveDate::from_ymd_opt(2026, 2, 27).expect("date"),
            amount,
            currency: currency.to_string(),
            lines: Vec::new(),
        }
    }

    async fn draft(harness: &Harness, amount: Decimal, currency: &str) -> Expense {
        harness
            .service
            .create(
                NewExpense {
                    company_id: company_id(),
                    submitter_id: uid("u-emp"),
                    details: details(amount, currency),
                },
                "test",
            )
            .await
            .expect("create draft")
    }

    async fn stored(harness: &Harness, id: &ExpenseId) -> Expense {
        harness.repositories.expenses.find_by_id(id).await.expect("load").expect("stored expense")
    }

    #[tokio::test]
    async fn fallback_chain_runs_to_approval_and_notifies_each_step() {
        let harness = harness(staff(), Vec::new()).await;
        let expense = draft(&harness, Decimal::new(450000, 2), "INR").await;

        let submitted = harness.service.submit(&expense.id, "c-1").await.expect("submit");
        assert_eq!(submitted.to, ExpenseStatus::Submitted);
        let chain: Vec<&str> = submitted
            .expense
            .approval_timeline
            .iter()
            .map(|step| step.approver_id.0.as_str())
            .collect();
        assert_eq!(chain, vec!["u-mgr", "u-fin", "u-dir"]);

        let first = harness
            .service
            .approve(&expense.id, uid("u-mgr"), Some("ok".to_string()), "c-2")
            .await
            .expect("manager approves");
        assert_eq!(first.to, ExpenseStatus::Pending);
        harness.service.approve(&expense.id, uid("u-fin"), None, "c-3").await.expect("finance");
        let last =
            harness.service.approve(&expense.id, uid("u-dir"), None, "c-4").await.expect("director");
        assert_eq!(last.to, ExpenseStatus::Approved);

        let expense = stored(&harness, &expense.id).await;
        assert_eq!(expense.status, ExpenseStatus::Approved);
        assert_eq!(expense.revision, 4);
        assert_eq!(expense.converted_amount, None);

        let sent: Vec<(String, NotificationKind)> = harness
            .dispatcher
            .sent()
            .into_iter()
            .map(|notification| (notification.user_id.0, notification.kind))
            .collect();
        assert_eq!(
            sent,
            vec![
                ("u-mgr".to_string(), NotificationKind::ApprovalRequest),
                ("u-fin".to_string(), NotificationKind::ApprovalRequest),
                ("u-dir".to_string(), NotificationKind::ApprovalRequest),
                ("u-emp".to_string(), NotificationKind::Approved),
            ]
        );
    }

    #[tokio::test]
    async fn specific_approver_closes_early_and_converts_to_company_currency() {
        let mut users = staff();
        users[0].is_manager_approver = false;
        let policy = RulePolicy::SpecificApprover { approver_ids: vec![uid("u-fin")] };
        let harness = harness(users, vec![rule(policy, &["u-mgr", "u-fin", "u-dir"])]).await;
        let expense = draft(&harness, Decimal::new(10000, 2), "usd").await;

        let submitted = harness.service.submit(&expense.id, "c-1").await.expect("submit");
        assert_eq!(submitted.expense.rule_id, Some(RuleId("rule-1".to_string())));
        harness.service.approve(&expense.id, uid("u-mgr"), None, "c-2").await.expect("manager");
        let outcome =
            harness.service.approve(&expense.id, uid("u-fin"), None, "c-3").await.expect("finance");
        assert_eq!(outcome.to, ExpenseStatus::Approved);

        let expense = stored(&harness, &expense.id).await;
        assert_eq!(expense.converted_amount, Some(Decimal::new(831000, 2)));
        assert_eq!(expense.conversion_rate, Some(Decimal::new(8310, 2)));
        assert_eq!(expense.approval_timeline[2].status, ApprovalStatus::Pending);
        assert!(harness
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "expense.currency_converted"
                && event.category == AuditCategory::Currency));
    }

    #[tokio::test]
    async fn failed_conversion_leaves_the_expense_awaiting_approval() {
        let mut users = staff();
        users[0].is_manager_approver = false;
        let harness = harness(users, vec![rule(RulePolicy::Sequential, &["u-mgr"])]).await;
        let expense = draft(&harness, Decimal::new(5000, 2), "EUR").await;
        harness.service.submit(&expense.id, "c-1").await.expect("submit");

        let error = harness
            .service
            .approve(&expense.id, uid("u-mgr"), None, "c-2")
            .await
            .expect_err("no EUR rate configured");
        assert!(matches!(error, ApplicationError::Integration(ref m) if m.contains("EUR->INR")));

        let expense = stored(&harness, &expense.id).await;
        assert_eq!(expense.status, ExpenseStatus::Submitted);
        assert_eq!(expense.revision, 1);
        assert_eq!(expense.approval_timeline[0].status, ApprovalStatus::Pending);
        assert!(harness
            .dispatcher
            .sent()
            .iter()
            .all(|notification| notification.kind == NotificationKind::ApprovalRequest));
        assert!(harness.audit.events().iter().any(|event| event.outcome == AuditOutcome::Failed
            && event.category == AuditCategory::Currency));
    }

    #[tokio::test]
    async fn conversion_overflow_is_refused_without_persisting() {
        let mut users = staff();
        users[0].is_manager_approver = false;
        let harness = harness(users, vec![rule(RulePolicy::Sequential, &["u-mgr"])]).await;
        let amount = Decimal::from_i128_with_scale(10_i128.pow(28), 0);
        let expense = draft(&harness, amount, "USD").await;
        harness.service.submit(&expense.id, "c-1").await.expect("submit");

        let error = harness
            .service
            .approve(&expense.id, uid("u-mgr"), None, "c-2")
            .await
            .expect_err("converted amount out of range");
        assert!(matches!(error, ApplicationError::Integration(ref m) if m.contains("overflows")));

        let expense = stored(&harness, &expense.id).await;
        assert_eq!(expense.status, ExpenseStatus::Submitted);
        assert_eq!(expense.converted_amount, None);
        assert_eq!(expense.approval_timeline[0].status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn out_of_turn_approver_is_refused_and_audited() {
        let harness = harness(staff(), Vec::new()).await;
        let expense = draft(&harness, Decimal::new(1200, 0), "INR").await;
        harness.service.submit(&expense.id, "c-1").await.expect("submit");

        let error = harness
            .service
            .approve(&expense.id, uid("u-dir"), None, "c-2")
            .await
            .expect_err("director is not first");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Workflow(WorkflowError::NotCurrentApprover {
                ref current_approver,
                ..
            })) if current_approver.as_deref() == Some("u-mgr")
        ));

        let events = harness.audit.events();
        let last = events.last().expect("audit event");
        assert_eq!(last.event_type, "expense.transition_rejected");
        assert_eq!(last.outcome, AuditOutcome::Rejected);
        assert_eq!(last.correlation_id, "c-2");
        assert_eq!(stored(&harness, &expense.id).await.revision, 1);
    }

    #[tokio::test]
    async fn rejection_needs_a_comment_and_is_final() {
        let harness = harness(staff(), Vec::new()).await;
        let expense = draft(&harness, Decimal::new(800, 0), "INR").await;
        harness.service.submit(&expense.id, "c-1").await.expect("submit");

        let error = harness
            .service
            .reject(&expense.id, uid("u-mgr"), "   ".to_string(), "c-2")
            .await
            .expect_err("blank comment");
        assert_eq!(error, ApplicationError::from(WorkflowError::MissingRejectionComment));

        let outcome = harness
            .service
            .reject(&expense.id, uid("u-mgr"), "Not a business expense".to_string(), "c-3")
            .await
            .expect("reject");
        assert_eq!(outcome.to, ExpenseStatus::Rejected);
        assert_eq!(
            outcome.expense.approval_timeline[0].comment.as_deref(),
            Some("Not a business expense")
        );

        let sent = harness.dispatcher.sent();
        let last = sent.last().expect("notification");
        assert_eq!(last.user_id, uid("u-emp"));
        assert_eq!(last.kind, NotificationKind::Rejected);

        let error = harness
            .service
            .approve(&expense.id, uid("u-fin"), None, "c-4")
            .await
            .expect_err("closed expense");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Workflow(WorkflowError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn submitting_twice_is_an_invalid_transition() {
        let harness = harness(staff(), Vec::new()).await;
        let expense = draft(&harness, Decimal::new(800, 0), "INR").await;
        harness.service.submit(&expense.id, "c-1").await.expect("submit");

        let error = harness.service.submit(&expense.id, "c-2").await.expect_err("resubmit");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Workflow(WorkflowError::InvalidTransition {
                status: ExpenseStatus::Submitted,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn company_without_approvers_cannot_submit() {
        let harness = harness(vec![user("u-emp", UserRole::Employee, None, 0)], Vec::new()).await;
        let expense = draft(&harness, Decimal::new(800, 0), "INR").await;

        let error = harness.service.submit(&expense.id, "c-1").await.expect_err("no approvers");
        assert_eq!(error, ApplicationError::from(WorkflowError::EmptyApproverSequence));
        assert_eq!(stored(&harness, &expense.id).await.status, ExpenseStatus::Draft);
    }

    #[tokio::test]
    async fn stale_edit_is_a_conflict() {
        let harness = harness(staff(), Vec::new()).await;
        let expense = draft(&harness, Decimal::new(800, 0), "INR").await;

        let error = harness
            .service
            .update_details(
                &expense.id,
                ExpenseUpdate {
                    expected_revision: Some(5),
                    details: details(Decimal::new(900, 0), "INR"),
                },
                "c-1",
            )
            .await
            .expect_err("stale revision");
        assert!(matches!(error, ApplicationError::Conflict(_)));

        let updated = harness
            .service
            .update_details(
                &expense.id,
                ExpenseUpdate {
                    expected_revision: Some(0),
                    details: details(Decimal::new(900, 0), "INR"),
                },
                "c-2",
            )
            .await
            .expect("fresh revision");
        assert_eq!(updated.revision, 1);
        assert_eq!(stored(&harness, &expense.id).await.amount, Decimal::new(900, 0));
    }

    #[tokio::test]
    async fn in_flight_expenses_cannot_be_deleted() {
        let harness = harness(staff(), Vec::new()).await;
        let in_flight = draft(&harness, Decimal::new(800, 0), "INR").await;
        let scratch = draft(&harness, Decimal::new(100, 0), "INR").await;
        harness.service.submit(&in_flight.id, "c-1").await.expect("submit");

        let error = harness.service.delete(&in_flight.id, "c-2").await.expect_err("in flight");
        assert!(matches!(error, ApplicationError::Conflict(_)));

        harness.service.delete(&scratch.id, "c-3").await.expect("delete draft");
        let error = harness.service.get(&scratch.id).await.expect_err("gone");
        assert!(matches!(error, ApplicationError::NotFound { entity: "expense", .. }));
    }

    #[tokio::test]
    async fn approval_queue_follows_the_cursor() {
        let harness = harness(staff(), Vec::new()).await;
        let first = draft(&harness, Decimal::new(800, 0), "INR").await;
        let second = draft(&harness, Decimal::new(900, 0), "INR").await;
        harness.service.submit(&first.id, "c-1").await.expect("submit first");
        harness.service.submit(&second.id, "c-2").await.expect("submit second");

        assert_eq!(harness.service.approval_queue(&uid("u-mgr")).await.expect("queue").len(), 2);
        assert!(harness.service.approval_queue(&uid("u-fin")).await.expect("queue").is_empty());

        harness.service.approve(&first.id, uid("u-mgr"), None, "c-3").await.expect("approve");
        let finance = harness.service.approval_queue(&uid("u-fin")).await.expect("queue");
        assert_eq!(finance.len(), 1);
        assert_eq!(finance[0].id, first.id);
    }

    #[tokio::test]
    async fn create_rejects_unknown_submitters() {
        let harness = harness(staff(), Vec::new()).await;
        let error = harness
            .service
            .create(
                NewExpense {
                    company_id: company_id(),
                    submitter_id: uid("u-ghost"),
                    details: details(Decimal::new(800, 0), "INR"),
                },
                "c-1",
            )
            .await
            .expect_err("unknown submitter");
        assert!(matches!(error, ApplicationError::NotFound { entity: "user", .. }));
    }
}
