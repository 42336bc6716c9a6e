use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::approvals::{evaluate_policy, ApproverAction, RuleDecision};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::expense::{ApprovalStatus, ApprovalStep, Expense, ExpenseStatus};
use crate::domain::notification::NotificationKind;
use crate::domain::rule::{RuleId, RulePolicy};
use crate::domain::user::UserId;
use crate::workflow::states::{TransitionOutcome, WorkflowAction, WorkflowCommand, WorkflowEvent};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("an expense cannot be submitted without approvers")]
    EmptyApproverSequence,
    #[error("`{approver_id}` is not the current approver of expense {expense_id}")]
    NotCurrentApprover { expense_id: String, approver_id: String, current_approver: Option<String> },
    #[error("a rejection requires a comment")]
    MissingRejectionComment,
    #[error("cannot {event} expense {expense_id} while it is {status}")]
    InvalidTransition { expense_id: String, status: ExpenseStatus, event: WorkflowEvent },
}

/// Expense lifecycle state machine.
///
/// Only the approver at the timeline cursor may act. After each approval the
/// frozen rule policy, when present, decides whether enough approvals have
/// accumulated to close the expense early.
#[derive(Clone, Debug)]
pub struct ExpenseWorkflow {
    evaluate_rules_on_action: bool,
}

impl Default for ExpenseWorkflow {
    fn default() -> Self {
        Self { evaluate_rules_on_action: true }
    }
}

impl ExpenseWorkflow {
    pub fn new(evaluate_rules_on_action: bool) -> Self {
        Self { evaluate_rules_on_action }
    }

    pub fn evaluates_rules_on_action(&self) -> bool {
        self.evaluate_rules_on_action
    }

    /// Applies `command` to a copy of `expense`; the input is never mutated.
    pub fn apply(
        &self,
        expense: &Expense,
        command: WorkflowCommand,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        match command {
            WorkflowCommand::Submit { approvers, rule_id, policy } => {
                self.submit(expense, approvers, rule_id, policy, now)
            }
            WorkflowCommand::Approve { approver_id, comment } => {
                self.approve(expense, &approver_id, comment, now)
            }
            WorkflowCommand::Reject { approver_id, comment } => {
                self.reject(expense, &approver_id, &comment, now)
            }
        }
    }

    pub fn apply_with_audit<S>(
        &self,
        expense: &Expense,
        command: WorkflowCommand,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        let event = command.event();
        let result = self.apply(expense, command, now);
        match &result {
            Ok(outcome) => {
                let mut audit_event = AuditEvent::new(
                    Some(expense.id.clone()),
                    audit.correlation_id.clone(),
                    outcome.event_type(),
                    AuditCategory::Workflow,
                    audit.actor.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str())
                .with_metadata("revision", outcome.expense.revision.to_string());
                if let Some(decision) = &outcome.decision {
                    audit_event = audit_event.with_metadata("decision", decision.explanation.clone());
                }
                sink.emit(audit_event);
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        Some(expense.id.clone()),
                        audit.correlation_id.clone(),
                        "expense.transition_rejected",
                        AuditCategory::Workflow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("event", event.as_str())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    pub fn submit(
        &self,
        expense: &Expense,
        approvers: Vec<ApprovalStep>,
        rule_id: Option<RuleId>,
        policy: Option<RulePolicy>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        if expense.status != ExpenseStatus::Draft {
            return Err(invalid_transition(expense, WorkflowEvent::Submit));
        }
        let Some(first) = approvers.first() else {
            return Err(WorkflowError::EmptyApproverSequence);
        };
        let first_approver = first.approver_id.clone();

        let mut next = expense.clone();
        next.approval_timeline = approvers
            .into_iter()
            .map(|step| ApprovalStep::pending(step.approver_id, step.approver_name))
            .collect();
        next.current_approver_index = 0;
        next.status = ExpenseStatus::Submitted;
        next.rule_id = rule_id;
        next.policy = policy;
        next.converted_amount = None;
        next.conversion_rate = None;

        Ok(commit(
            expense,
            next,
            WorkflowEvent::Submit,
            now,
            None,
            vec![WorkflowAction::NotifyApprover { approver_id: first_approver }],
        ))
    }

    pub fn approve(
        &self,
        expense: &Expense,
        approver_id: &UserId,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let index = authorize(expense, approver_id, WorkflowEvent::Approve)?;

        let mut next = expense.clone();
        record(&mut next.approval_timeline[index], ApprovalStatus::Approved, comment, now);

        let actions: Vec<ApproverAction> =
            next.approval_timeline.iter().map(ApproverAction::from).collect();
        let total = next.approval_timeline.len();
        let mut decision = match (&next.policy, self.evaluate_rules_on_action) {
            (Some(policy), true) => Some(evaluate_policy(policy, total, &actions)),
            _ => None,
        };
        let decided = decision.as_ref().is_some_and(|decision| decision.approved);
        let chain_exhausted = index + 1 >= total;

        if decided || chain_exhausted {
            if !decided {
                decision = Some(unanimity(total, &actions));
            }
            next.status = ExpenseStatus::Approved;
            return Ok(commit(
                expense,
                next,
                WorkflowEvent::Approve,
                now,
                decision,
                vec![
                    WorkflowAction::ConvertCurrency,
                    WorkflowAction::NotifySubmitter { kind: NotificationKind::Approved },
                ],
            ));
        }

        next.current_approver_index = index + 1;
        next.status = ExpenseStatus::Pending;
        let upcoming = next.approval_timeline[index + 1].approver_id.clone();
        Ok(commit(
            expense,
            next,
            WorkflowEvent::Approve,
            now,
            decision,
            vec![WorkflowAction::NotifyApprover { approver_id: upcoming }],
        ))
    }

    pub fn reject(
        &self,
        expense: &Expense,
        approver_id: &UserId,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let index = authorize(expense, approver_id, WorkflowEvent::Reject)?;
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(WorkflowError::MissingRejectionComment);
        }

        let mut next = expense.clone();
        record(
            &mut next.approval_timeline[index],
            ApprovalStatus::Rejected,
            Some(comment.to_string()),
            now,
        );
        next.status = ExpenseStatus::Rejected;

        let actions: Vec<ApproverAction> =
            next.approval_timeline.iter().map(ApproverAction::from).collect();
        let policy = next.policy.clone().unwrap_or(RulePolicy::Sequential);
        let decision = evaluate_policy(&policy, next.approval_timeline.len(), &actions);

        Ok(commit(
            expense,
            next,
            WorkflowEvent::Reject,
            now,
            Some(decision),
            vec![WorkflowAction::NotifySubmitter { kind: NotificationKind::Rejected }],
        ))
    }
}

/// Returns the cursor index when `approver_id` may act on `expense` now.
fn authorize(
    expense: &Expense,
    approver_id: &UserId,
    event: WorkflowEvent,
) -> Result<usize, WorkflowError> {
    if !expense.status.is_awaiting_action() {
        return Err(invalid_transition(expense, event));
    }

    let index = expense.current_approver_index;
    match expense.approval_timeline.get(index) {
        Some(step) if &step.approver_id == approver_id => Ok(index),
        step => Err(WorkflowError::NotCurrentApprover {
            expense_id: expense.id.0.clone(),
            approver_id: approver_id.0.clone(),
            current_approver: step.map(|step| step.approver_id.0.clone()),
        }),
    }
}

fn record(
    step: &mut ApprovalStep,
    status: ApprovalStatus,
    comment: Option<String>,
    now: DateTime<Utc>,
) {
    step.status = status;
    step.comment = comment.map(|comment| comment.trim().to_string()).filter(|c| !c.is_empty());
    step.acted_at = Some(now);
}

fn unanimity(total: usize, actions: &[ApproverAction]) -> RuleDecision {
    evaluate_policy(&RulePolicy::Sequential, total, actions)
}

fn commit(
    previous: &Expense,
    mut next: Expense,
    event: WorkflowEvent,
    now: DateTime<Utc>,
    decision: Option<RuleDecision>,
    actions: Vec<WorkflowAction>,
) -> TransitionOutcome {
    next.revision = previous.revision + 1;
    next.updated_at = now;
    TransitionOutcome {
        from: previous.status,
        to: next.status,
        event,
        expense: next,
        decision,
        actions,
    }
}

fn invalid_transition(expense: &Expense, event: WorkflowEvent) -> WorkflowError {
    WorkflowError::InvalidTransition {
        expense_id: expense.id.0.clone(),
        status: expense.status,
        event,
    }
}
