use chrono::NaiveDate;
use sqlx::Row;

use reimburse_core::domain::company::CompanyId;
use reimburse_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use reimburse_core::domain::rule::{RuleId, RulePolicy};
use reimburse_core::domain::user::UserId;

use super::{
    decode_error, format_timestamp, from_json, parse_decimal, parse_timestamp, to_json,
    ExpenseFilter, ExpenseRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const EXPENSE_COLUMNS: &str = "id, company_id, submitter_id, category, description, expense_date,
     amount, currency, converted_amount, conversion_rate, lines, status, approval_timeline,
     current_approver_index, rule_id, policy, revision, created_at, updated_at";

/// Column values of an expense in the shape they are bound.
struct ExpenseRecord {
    expense_date: String,
    amount: String,
    converted_amount: Option<String>,
    conversion_rate: Option<String>,
    lines: String,
    approval_timeline: String,
    current_approver_index: i64,
    current_approver_id: Option<String>,
    policy: Option<String>,
    revision: i64,
    created_at: String,
    updated_at: String,
}

impl ExpenseRecord {
    fn encode(expense: &Expense) -> Result<Self, RepositoryError> {
        Ok(Self {
            expense_date: expense.expense_date.format("%Y-%m-%d").to_string(),
            amount: expense.amount.to_string(),
            converted_amount: expense.converted_amount.map(|value| value.to_string()),
            conversion_rate: expense.conversion_rate.map(|value| value.to_string()),
            lines: to_json("lines", &expense.lines)?,
            approval_timeline: to_json("approval_timeline", &expense.approval_timeline)?,
            current_approver_index: i64::try_from(expense.current_approver_index)
                .map_err(decode_error)?,
            current_approver_id: expense.current_approver().map(|id| id.0.clone()),
            policy: expense.policy.as_ref().map(|policy| to_json("policy", policy)).transpose()?,
            revision: revision_to_column(expense.revision)?,
            created_at: format_timestamp(&expense.created_at),
            updated_at: format_timestamp(&expense.updated_at),
        })
    }
}

fn revision_to_column(revision: u64) -> Result<i64, RepositoryError> {
    i64::try_from(revision)
        .map_err(|_| RepositoryError::Decode(format!("revision {revision} overflows")))
}

fn row_to_expense(row: &sqlx::sqlite::SqliteRow) -> Result<Expense, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let company_id: String = row.try_get("company_id").map_err(decode_error)?;
    let submitter_id: String = row.try_get("submitter_id").map_err(decode_error)?;
    let category: String = row.try_get("category").map_err(decode_error)?;
    let description: String = row.try_get("description").map_err(decode_error)?;
    let expense_date: String = row.try_get("expense_date").map_err(decode_error)?;
    let amount: String = row.try_get("amount").map_err(decode_error)?;
    let currency: String = row.try_get("currency").map_err(decode_error)?;
    let converted_amount: Option<String> =
        row.try_get("converted_amount").map_err(decode_error)?;
    let conversion_rate: Option<String> = row.try_get("conversion_rate").map_err(decode_error)?;
    let lines: String = row.try_get("lines").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let approval_timeline: String = row.try_get("approval_timeline").map_err(decode_error)?;
    let current_approver_index: i64 =
        row.try_get("current_approver_index").map_err(decode_error)?;
    let rule_id: Option<String> = row.try_get("rule_id").map_err(decode_error)?;
    let policy: Option<String> = row.try_get("policy").map_err(decode_error)?;
    let revision: i64 = row.try_get("revision").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(Expense {
        id: ExpenseId(id),
        company_id: CompanyId(company_id),
        submitter_id: UserId(submitter_id),
        category,
        description,
        expense_date: NaiveDate::parse_from_str(&expense_date, "%Y-%m-%d")
            .map_err(|e| RepositoryError::Decode(format!("expense_date: {e}")))?,
        amount: parse_decimal("amount", &amount)?,
        currency,
        converted_amount: converted_amount
            .as_deref()
            .map(|raw| parse_decimal("converted_amount", raw))
            .transpose()?,
        conversion_rate: conversion_rate
            .as_deref()
            .map(|raw| parse_decimal("conversion_rate", raw))
            .transpose()?,
        lines: from_json("lines", &lines)?,
        status: status.parse::<ExpenseStatus>().map_err(decode_error)?,
        approval_timeline: from_json("approval_timeline", &approval_timeline)?,
        current_approver_index: usize::try_from(current_approver_index).map_err(decode_error)?,
        rule_id: rule_id.map(RuleId),
        policy: policy.as_deref().map(|raw| from_json::<RulePolicy>("policy", raw)).transpose()?,
        revision: u64::try_from(revision).map_err(decode_error)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl ExpenseRepository for SqlExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_expense).transpose()
    }

    async fn list(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses
             WHERE company_id = ?
               AND (? IS NULL OR status = ?)
               AND (? IS NULL OR submitter_id = ?)
             ORDER BY created_at DESC, id ASC"
        ))
        .bind(&filter.company_id.0)
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.submitter_id.as_ref().map(|id| id.0.as_str()))
        .bind(filter.submitter_id.as_ref().map(|id| id.0.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_expense).collect()
    }

    async fn list_awaiting_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses
             WHERE current_approver_id = ? AND status IN ('submitted', 'pending')
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&approver_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_expense).collect()
    }

    async fn insert(&self, expense: Expense) -> Result<(), RepositoryError> {
        let record = ExpenseRecord::encode(&expense)?;

        sqlx::query(
            "INSERT INTO expenses (id, company_id, submitter_id, category, description,
                                   expense_date, amount, currency, converted_amount,
                                   conversion_rate, lines, status, approval_timeline,
                                   current_approver_index, current_approver_id, rule_id, policy,
                                   revision, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&expense.id.0)
        .bind(&expense.company_id.0)
        .bind(&expense.submitter_id.0)
        .bind(&expense.category)
        .bind(&expense.description)
        .bind(&record.expense_date)
        .bind(&record.amount)
        .bind(&expense.currency)
        .bind(&record.converted_amount)
        .bind(&record.conversion_rate)
        .bind(&record.lines)
        .bind(expense.status.as_str())
        .bind(&record.approval_timeline)
        .bind(record.current_approver_index)
        .bind(&record.current_approver_id)
        .bind(expense.rule_id.as_ref().map(|id| id.0.as_str()))
        .bind(&record.policy)
        .bind(record.revision)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(
        &self,
        expense: Expense,
        expected_revision: u64,
    ) -> Result<(), RepositoryError> {
        let record = ExpenseRecord::encode(&expense)?;

        let result = sqlx::query(
            "UPDATE expenses SET
                 category = ?,
                 description = ?,
                 expense_date = ?,
                 amount = ?,
                 currency = ?,
                 converted_amount = ?,
                 conversion_rate = ?,
                 lines = ?,
                 status = ?,
                 approval_timeline = ?,
                 current_approver_index = ?,
                 current_approver_id = ?,
                 rule_id = ?,
                 policy = ?,
                 revision = ?,
                 updated_at = ?
             WHERE id = ? AND revision = ?",
        )
        .bind(&expense.category)
        .bind(&expense.description)
        .bind(&record.expense_date)
        .bind(&record.amount)
        .bind(&expense.currency)
        .bind(&record.converted_amount)
        .bind(&record.conversion_rate)
        .bind(&record.lines)
        .bind(expense.status.as_str())
        .bind(&record.approval_timeline)
        .bind(record.current_approver_index)
        .bind(&record.current_approver_id)
        .bind(expense.rule_id.as_ref().map(|id| id.0.as_str()))
        .bind(&record.policy)
        .bind(record.revision)
        .bind(&record.updated_at)
        .bind(&expense.id.0)
        .bind(revision_to_column(expected_revision)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict { id: expense.id.0, expected_revision });
        }

        Ok(())
    }

    async fn delete(&self, id: &ExpenseId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM expenses WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
