use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use reimburse_core::approvals::build_approver_sequence;
use reimburse_core::domain::company::{Company, CompanyId};
use reimburse_core::domain::expense::{Expense, ExpenseDetails, ExpenseId, ExpenseStatus};
use reimburse_core::domain::rule::{select_active_rule, ApprovalRule, RuleId, RulePolicy, RuleScope};
use reimburse_core::domain::user::{User, UserId, UserRole};
use reimburse_core::workflow::{ExpenseWorkflow, WorkflowCommand};
use reimburse_db::{
    connect_with_settings, migrations, CompanyRepository, ExpenseRepository, Repositories,
    RepositoryError, RuleRepository, UserRepository,
};

type WorkflowTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

fn company_id() -> CompanyId {
    CompanyId("co-acme".to_string())
}

fn user(id: &str, role: UserRole, manager: Option<&str>, offset_secs: i64) -> User {
    User {
        id: UserId(id.to_string()),
        company_id: company_id(),
        name: id.trim_start_matches("u-").to_string(),
        email: format!("{id}@acme.test"),
        role,
        manager_id: manager.map(|manager| UserId(manager.to_string())),
        is_manager_approver: manager.is_some(),
        created_at: Utc::now() + Duration::seconds(offset_secs),
    }
}

async fn seeded() -> WorkflowTestResult<Repositories> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.map_err(|e| e.to_string())?;
    migrations::run_pending(&pool).await.map_err(|e| e.to_string())?;
    let repos = Repositories::sql(pool);

    let company = Company::new(company_id(), "Acme", "IN", "INR", Utc::now())
        .map_err(|e| e.to_string())?;
    repos.companies.save(company).await.map_err(|e| e.to_string())?;

    for member in [
        user("u-mgr", UserRole::Manager, None, 0),
        user("u-fin", UserRole::Finance, None, 1),
        user("u-dir", UserRole::Director, None, 2),
        user("u-emp", UserRole::Employee, Some("u-mgr"), 3),
    ] {
        repos.users.save(member).await.map_err(|e| e.to_string())?;
    }

    let now = Utc::now();
    let rule = ApprovalRule {
        id: RuleId("r-travel".to_string()),
        company_id: company_id(),
        name: "Travel".to_string(),
        policy: RulePolicy::Sequential,
        approval_sequence: vec![UserId("u-fin".to_string()), UserId("u-dir".to_string())],
        scope: RuleScope { categories: vec!["travel".to_string()], ..RuleScope::default() },
        is_active: true,
        created_by: None,
        created_at: now,
        updated_at: now,
    };
    repos.rules.save(rule).await.map_err(|e| e.to_string())?;

    Ok(repos)
}

fn travel_draft() -> WorkflowTestResult<Expense> {
    Expense::draft(
        ExpenseId("exp-1".to_string()),
        company_id(),
        UserId("u-emp".to_string()),
        ExpenseDetails {
            category: "Travel".to_string(),
            description: "Client visit".to_string(),
            expense_date: NaiveDate::from_ymd_opt(2026, 3, 14).ok_or("date")?,
            amount: Decimal::new(4_200, 2),
            currency: "USD".to_string(),
            lines: Vec::new(),
        },
        Utc::now(),
    )
    .map_err(|e| e.to_string())
}

#[tokio::test]
async fn stored_rule_drives_the_approval_queue() -> WorkflowTestResult {
    let repos = seeded().await?;
    let workflow = ExpenseWorkflow::default();

    let draft = travel_draft()?;
    repos.expenses.insert(draft.clone()).await.map_err(|e| e.to_string())?;

    let rules = repos.rules.list_active_by_company(&company_id()).await.map_err(|e| e.to_string())?;
    let rule = select_active_rule(&rules, &company_id(), &draft.category, draft.amount);
    require!(rule.is_some(), "travel rule should be selected for {}", draft.category);

    let users = repos.users.list_by_company(&company_id()).await.map_err(|e| e.to_string())?;
    let submitter =
        users.iter().find(|u| u.id == draft.submitter_id).ok_or("submitter should be stored")?;
    let sequence = build_approver_sequence(submitter, &users, rule).map_err(|e| e.to_string())?;
    let order: Vec<&str> = sequence.iter().map(|approver| approver.user_id.0.as_str()).collect();
    require!(order == ["u-mgr", "u-fin", "u-dir"], "unexpected approver order {order:?}");

    let submitted = workflow
        .apply(
            &draft,
            WorkflowCommand::Submit {
                approvers: sequence.iter().map(|approver| approver.to_step()).collect(),
                rule_id: rule.map(|rule| rule.id.clone()),
                policy: rule.map(|rule| rule.policy.clone()),
            },
            Utc::now(),
        )
        .map_err(|e| e.to_string())?;
    repos
        .expenses
        .update(submitted.expense.clone(), draft.revision)
        .await
        .map_err(|e| e.to_string())?;

    let manager_queue = repos
        .expenses
        .list_awaiting_approver(&UserId("u-mgr".to_string()))
        .await
        .map_err(|e| e.to_string())?;
    require!(manager_queue.len() == 1, "manager should see one expense, got {}", manager_queue.len());

    let advanced = workflow
        .apply(
            &submitted.expense,
            WorkflowCommand::Approve { approver_id: UserId("u-mgr".to_string()), comment: None },
            Utc::now(),
        )
        .map_err(|e| e.to_string())?;
    require!(
        advanced.to == ExpenseStatus::Pending,
        "expense should wait on finance, got {}",
        advanced.to
    );
    repos
        .expenses
        .update(advanced.expense.clone(), submitted.expense.revision)
        .await
        .map_err(|e| e.to_string())?;

    let stored = repos
        .expenses
        .find_by_id(&draft.id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("expense should be stored")?;
    require!(
        stored.current_approver().map(|id| id.0.as_str()) == Some("u-fin"),
        "finance should hold the expense, got {:?}",
        stored.current_approver()
    );

    let finance_queue = repos
        .expenses
        .list_awaiting_approver(&UserId("u-fin".to_string()))
        .await
        .map_err(|e| e.to_string())?;
    require!(finance_queue.len() == 1, "finance should see the expense");

    // A writer still holding the submitted copy loses.
    let stale = repos.expenses.update(submitted.expense, draft.revision).await;
    require!(
        matches!(stale, Err(RepositoryError::Conflict { .. })),
        "stale write should conflict, got {stale:?}"
    );

    Ok(())
}
