use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::normalize_currency_code;
use crate::domain::company::CompanyId;
use crate::domain::rule::{RuleId, RulePolicy};
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Draft,
    Submitted,
    Pending,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// `submitted` and `pending` both mean the expense waits on its current approver.
    pub fn is_awaiting_action(&self) -> bool {
        matches!(self, Self::Submitted | Self::Pending)
    }
}

impl fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpenseStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "submitted" => Ok(Self::Submitted),
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(DomainError::Validation(format!("unsupported expense status `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// One approver's slot in an expense timeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub approver_id: UserId,
    pub approver_name: String,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
}

impl ApprovalStep {
    pub fn pending(approver_id: UserId, approver_name: impl Into<String>) -> Self {
        Self {
            approver_id,
            approver_name: approver_name.into(),
            status: ApprovalStatus::Pending,
            comment: None,
            acted_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLine {
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub tax: Decimal,
}

/// Submitter-editable fields of an expense.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseDetails {
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub expense_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub lines: Vec<ExpenseLine>,
}

impl ExpenseDetails {
    pub fn normalized(mut self) -> Result<Self, DomainError> {
        self.category = self.category.trim().to_string();
        self.description = self.description.trim().to_string();
        self.currency = normalize_currency_code(&self.currency).ok_or_else(|| {
            DomainError::Validation(format!("invalid currency code `{}`", self.currency))
        })?;

        if self.category.is_empty() {
            return Err(DomainError::Validation("expense category is required".to_string()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::Validation(format!(
                "expense amount must be positive, got {}",
                self.amount
            )));
        }
        for (index, line) in self.lines.iter().enumerate() {
            if line.description.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "expense line {index} requires a description"
                )));
            }
            if line.amount < Decimal::ZERO || line.tax < Decimal::ZERO {
                return Err(DomainError::Validation(format!(
                    "expense line {index} cannot carry negative amounts"
                )));
            }
        }

        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub company_id: CompanyId,
    pub submitter_id: UserId,
    pub category: String,
    pub description: String,
    pub expense_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub converted_amount: Option<Decimal>,
    pub conversion_rate: Option<Decimal>,
    pub lines: Vec<ExpenseLine>,
    pub status: ExpenseStatus,
    pub approval_timeline: Vec<ApprovalStep>,
    pub current_approver_index: usize,
    pub rule_id: Option<RuleId>,
    /// Policy of the rule consulted at submission, frozen for the life of the expense.
    pub policy: Option<RulePolicy>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    pub fn draft(
        id: ExpenseId,
        company_id: CompanyId,
        submitter_id: UserId,
        details: ExpenseDetails,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let details = details.normalized()?;
        Ok(Self {
            id,
            company_id,
            submitter_id,
            category: details.category,
            description: details.description,
            expense_date: details.expense_date,
            amount: details.amount,
            currency: details.currency,
            converted_amount: None,
            conversion_rate: None,
            lines: details.lines,
            status: ExpenseStatus::Draft,
            approval_timeline: Vec::new(),
            current_approver_index: 0,
            rule_id: None,
            policy: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces the editable fields; only drafts may be edited.
    pub fn update_details(
        &mut self,
        details: ExpenseDetails,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status != ExpenseStatus::Draft {
            return Err(DomainError::Validation(format!(
                "expense {} is {} and can no longer be edited",
                self.id, self.status
            )));
        }
        let details = details.normalized()?;
        self.category = details.category;
        self.description = details.description;
        self.expense_date = details.expense_date;
        self.amount = details.amount;
        self.currency = details.currency;
        self.lines = details.lines;
        self.revision += 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn current_step(&self) -> Option<&ApprovalStep> {
        if !self.status.is_awaiting_action() {
            return None;
        }
        self.approval_timeline.get(self.current_approver_index)
    }

    pub fn current_approver(&self) -> Option<&UserId> {
        self.current_step().map(|step| &step.approver_id)
    }

    pub fn lines_total(&self) -> Decimal {
        self.lines.iter().map(|line| line.amount + line.tax).sum()
    }

    pub fn details(&self) -> ExpenseDetails {
        ExpenseDetails {
            category: self.category.clone(),
            description: self.description.clone(),
            expense_date: self.expense_date,
            amount: self.amount,
            currency: self.currency.clone(),
            lines: self.lines.clone(),
        }
    }
}
