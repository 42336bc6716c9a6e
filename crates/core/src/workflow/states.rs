use std::fmt;

use serde::{Deserialize, Serialize};

use crate::approvals::RuleDecision;
use crate::domain::expense::{ApprovalStep, Expense, ExpenseStatus};
use crate::domain::notification::NotificationKind;
use crate::domain::rule::{RuleId, RulePolicy};
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    Submit,
    Approve,
    Reject,
}

impl WorkflowEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to [`crate::workflow::ExpenseWorkflow::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkflowCommand {
    Submit { approvers: Vec<ApprovalStep>, rule_id: Option<RuleId>, policy: Option<RulePolicy> },
    Approve { approver_id: UserId, comment: Option<String> },
    Reject { approver_id: UserId, comment: String },
}

impl WorkflowCommand {
    pub fn event(&self) -> WorkflowEvent {
        match self {
            Self::Submit { .. } => WorkflowEvent::Submit,
            Self::Approve { .. } => WorkflowEvent::Approve,
            Self::Reject { .. } => WorkflowEvent::Reject,
        }
    }
}

/// Side effects the caller owes after a transition is persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkflowAction {
    NotifyApprover { approver_id: UserId },
    NotifySubmitter { kind: NotificationKind },
    ConvertCurrency,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ExpenseStatus,
    pub to: ExpenseStatus,
    pub event: WorkflowEvent,
    pub expense: Expense,
    pub decision: Option<RuleDecision>,
    pub actions: Vec<WorkflowAction>,
}

impl TransitionOutcome {
    /// Audit event name for this transition.
    pub fn event_type(&self) -> &'static str {
        match (self.event, self.to) {
            (WorkflowEvent::Submit, _) => "expense.submitted",
            (_, ExpenseStatus::Approved) => "expense.approved",
            (_, ExpenseStatus::Rejected) => "expense.rejected",
            _ => "expense.advanced",
        }
    }
}
