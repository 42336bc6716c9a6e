use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::expense::ApprovalStep;
use crate::domain::rule::ApprovalRule;
use crate::domain::user::{User, UserId};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverSource {
    Manager,
    Rule,
    RoleFallback,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedApprover {
    pub user_id: UserId,
    pub name: String,
    pub source: ApproverSource,
}

impl SequencedApprover {
    pub fn to_step(&self) -> ApprovalStep {
        ApprovalStep::pending(self.user_id.clone(), self.name.clone())
    }
}

/// Assembles the ordered approver list for an expense submitted by `submitter`.
///
/// The submitter's manager leads when flagged as an approver. The rule's
/// configured sequence follows, or every approving-role user of the company
/// when no rule applies. Submitters never approve their own expenses and each
/// approver appears once, at their first position.
pub fn build_approver_sequence(
    submitter: &User,
    company_users: &[User],
    rule: Option<&ApprovalRule>,
) -> Result<Vec<SequencedApprover>, DomainError> {
    let users_by_id: HashMap<&UserId, &User> =
        company_users.iter().map(|user| (&user.id, user)).collect();
    let mut sequence = Vec::new();
    let mut seen = HashSet::new();
    seen.insert(submitter.id.clone());

    let mut push = |user: &User, source: ApproverSource| {
        if seen.insert(user.id.clone()) {
            sequence.push(SequencedApprover {
                user_id: user.id.clone(),
                name: user.name.clone(),
                source,
            });
        }
    };

    if submitter.is_manager_approver {
        if let Some(manager_id) = &submitter.manager_id {
            let manager = users_by_id.get(manager_id).copied().ok_or_else(|| {
                DomainError::Validation(format!(
                    "manager `{manager_id}` of `{}` is not a user of the company",
                    submitter.id
                ))
            })?;
            push(manager, ApproverSource::Manager);
        }
    }

    match rule {
        Some(rule) => {
            for approver_id in &rule.approval_sequence {
                let approver = users_by_id.get(approver_id).copied().ok_or_else(|| {
                    DomainError::Validation(format!(
                        "rule `{}` references unknown approver `{approver_id}`",
                        rule.id.0
                    ))
                })?;
                push(approver, ApproverSource::Rule);
            }
        }
        None => {
            for user in company_users.iter().filter(|user| user.role.is_fallback_approver()) {
                push(user, ApproverSource::RoleFallback);
            }
        }
    }

    Ok(sequence)
}
