//! Approval-rule evaluation.
//!
//! [`evaluate_policy`] turns a rule policy and the approver actions recorded so
//! far into a [`RuleDecision`]. It is total: every input produces a decision,
//! misconfiguration included.

pub mod sequence;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::expense::{ApprovalStatus, ApprovalStep};
use crate::domain::rule::{ApprovalRule, RulePolicy};
use crate::domain::user::UserId;

pub use sequence::{build_approver_sequence, ApproverSource, SequencedApprover};

/// One recorded approver action, in the shape the evaluator consumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverAction {
    pub approver_id: UserId,
    pub status: ApprovalStatus,
}

impl From<&ApprovalStep> for ApproverAction {
    fn from(step: &ApprovalStep) -> Self {
        Self { approver_id: step.approver_id.clone(), status: step.status }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub required: usize,
    pub percentage: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBasis {
    /// At least one approver rejected.
    Veto,
    /// The rule has nobody to ask.
    NoApprovers,
    SpecificApprover,
    Threshold,
    Unanimity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDecision {
    pub approved: bool,
    pub basis: DecisionBasis,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl RuleDecision {
    fn approve(basis: DecisionBasis, explanation: impl Into<String>) -> Self {
        Self { approved: true, basis, explanation: explanation.into(), progress: None }
    }

    fn hold(basis: DecisionBasis, explanation: impl Into<String>) -> Self {
        Self { approved: false, basis, explanation: explanation.into(), progress: None }
    }

    fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_rejected(&self) -> bool {
        self.basis == DecisionBasis::Veto
    }

    /// Approved, rejected, or still waiting on approvers.
    pub fn outcome(&self) -> &'static str {
        if self.approved {
            "approved"
        } else if self.is_rejected() {
            "rejected"
        } else {
            "pending"
        }
    }
}

/// Evaluates a stored rule against actions, counting its configured sequence.
pub fn evaluate_rule(rule: &ApprovalRule, actions: &[ApproverAction]) -> RuleDecision {
    evaluate_policy(&rule.policy, rule.approval_sequence.len(), actions)
}

pub fn evaluate_policy(
    policy: &RulePolicy,
    total_approvers: usize,
    actions: &[ApproverAction],
) -> RuleDecision {
    let approved_count =
        actions.iter().filter(|action| action.status == ApprovalStatus::Approved).count();
    let rejected_count =
        actions.iter().filter(|action| action.status == ApprovalStatus::Rejected).count();

    if rejected_count > 0 {
        return RuleDecision::hold(DecisionBasis::Veto, "Expense rejected by one or more approvers");
    }

    if total_approvers == 0 {
        return RuleDecision::hold(DecisionBasis::NoApprovers, "No approvers configured");
    }

    match policy {
        RulePolicy::SpecificApprover { approver_ids } if !approver_ids.is_empty() => {
            if specific_approver_acted(approver_ids, actions) {
                return RuleDecision::approve(
                    DecisionBasis::SpecificApprover,
                    "Approved by specific authorized approver",
                );
            }
            return RuleDecision::hold(
                DecisionBasis::SpecificApprover,
                "Waiting for approval from specific approver(s)",
            );
        }
        RulePolicy::Percentage { threshold } => {
            return threshold_decision(*threshold, total_approvers, approved_count, "");
        }
        RulePolicy::Hybrid { threshold, approver_ids } => {
            if !approver_ids.is_empty() && specific_approver_acted(approver_ids, actions) {
                return RuleDecision::approve(
                    DecisionBasis::SpecificApprover,
                    "Approved by specific authorized approver (hybrid rule)",
                );
            }
            if let Some(threshold) = threshold {
                return threshold_decision(
                    *threshold,
                    total_approvers,
                    approved_count,
                    " or waiting for specific approver",
                );
            }
        }
        RulePolicy::Sequential | RulePolicy::SpecificApprover { .. } => {}
    }

    if approved_count == total_approvers {
        RuleDecision::approve(DecisionBasis::Unanimity, "All approvers approved")
    } else {
        RuleDecision::hold(
            DecisionBasis::Unanimity,
            format!("{approved_count}/{total_approvers} approvers approved"),
        )
    }
}

/// Approvals needed to reach `threshold` percent of `total`, rounded up.
pub fn required_approvals(total: usize, threshold: u8) -> usize {
    (total * usize::from(threshold)).div_ceil(100)
}

fn threshold_decision(
    threshold: u8,
    total_approvers: usize,
    approved_count: usize,
    pending_suffix: &str,
) -> RuleDecision {
    let required = required_approvals(total_approvers, threshold);
    let percentage = Decimal::from(approved_count as u64) * Decimal::ONE_HUNDRED
        / Decimal::from(total_approvers as u64);
    let progress = Progress {
        current: approved_count,
        required,
        percentage: percentage.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
    };

    if approved_count >= required {
        return RuleDecision::approve(
            DecisionBasis::Threshold,
            format!("Reached {threshold}% approval threshold ({approved_count}/{total_approvers})"),
        )
        .with_progress(progress);
    }

    let whole = percentage.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    RuleDecision::hold(
        DecisionBasis::Threshold,
        format!("{approved_count}/{required} approvals received ({whole}%){pending_suffix}"),
    )
    .with_progress(progress)
}

fn specific_approver_acted(approver_ids: &[UserId], actions: &[ApproverAction]) -> bool {
    actions.iter().any(|action| {
        action.status == ApprovalStatus::Approved && approver_ids.contains(&action.approver_id)
    })
}
