use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::company::CompanyId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

/// How an approval rule turns recorded approver actions into a decision.
///
/// Each variant carries exactly the configuration it needs, so a percentage
/// rule can never exist without a threshold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RulePolicy {
    /// Every approver in the sequence must approve.
    Sequential,
    Percentage {
        threshold: u8,
    },
    SpecificApprover {
        approver_ids: Vec<UserId>,
    },
    /// Specific-approver override OR percentage threshold.
    Hybrid {
        #[serde(default)]
        threshold: Option<u8>,
        #[serde(default)]
        approver_ids: Vec<UserId>,
    },
}

impl RulePolicy {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Percentage { .. } => "percentage",
            Self::SpecificApprover { .. } => "specific_approver",
            Self::Hybrid { .. } => "hybrid",
        }
    }

    pub fn threshold(&self) -> Option<u8> {
        match self {
            Self::Percentage { threshold } => Some(*threshold),
            Self::Hybrid { threshold, .. } => *threshold,
            Self::Sequential | Self::SpecificApprover { .. } => None,
        }
    }

    pub fn specific_approver_ids(&self) -> &[UserId] {
        match self {
            Self::SpecificApprover { approver_ids } | Self::Hybrid { approver_ids, .. } => {
                approver_ids
            }
            Self::Sequential | Self::Percentage { .. } => &[],
        }
    }

    /// Thresholds lie in 1..=100 and every variant has a way to approve.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if let Some(threshold) = self.threshold() {
            if !(1..=100).contains(&threshold) {
                return Err(RuleValidationError::ThresholdOutOfRange { threshold });
            }
        }

        match self {
            Self::SpecificApprover { approver_ids } if approver_ids.is_empty() => {
                Err(RuleValidationError::MissingSpecificApprovers)
            }
            Self::Hybrid { threshold: None, approver_ids } if approver_ids.is_empty() => {
                Err(RuleValidationError::HybridWithoutMechanism)
            }
            _ => Ok(()),
        }
    }

    /// Rebuilds a policy from its stored column form.
    pub fn from_parts(
        kind: &str,
        threshold: Option<u8>,
        approver_ids: Vec<UserId>,
    ) -> Result<Self, RuleValidationError> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "percentage" => threshold
                .map(|threshold| Self::Percentage { threshold })
                .ok_or(RuleValidationError::MissingThreshold),
            "specific_approver" | "specific" => Ok(Self::SpecificApprover { approver_ids }),
            "hybrid" => Ok(Self::Hybrid { threshold, approver_ids }),
            other => Err(RuleValidationError::UnknownRuleType { rule_type: other.to_string() }),
        }
    }
}

/// Narrows which expenses an active rule is consulted for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleScope {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
}

impl RuleScope {
    pub fn matches(&self, category: &str, amount: Decimal) -> bool {
        if !self.categories.is_empty() {
            let category = normalize_key(category);
            if !self.categories.iter().any(|candidate| normalize_key(candidate) == category) {
                return false;
            }
        }

        if let Some(min_amount) = self.min_amount {
            if amount < min_amount {
                return false;
            }
        }

        if let Some(max_amount) = self.max_amount {
            if amount > max_amount {
                return false;
            }
        }

        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub name: String,
    pub policy: RulePolicy,
    pub approval_sequence: Vec<UserId>,
    pub scope: RuleScope,
    pub is_active: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RuleValidationError {
    #[error("rule name is required")]
    EmptyName,
    #[error("unknown rule type `{rule_type}` (expected sequential|percentage|specific_approver|hybrid)")]
    UnknownRuleType { rule_type: String },
    #[error("percentage rules require a threshold")]
    MissingThreshold,
    #[error("percentage threshold {threshold} must be in range 1..=100")]
    ThresholdOutOfRange { threshold: u8 },
    #[error("specific approver rules require at least one specific approver")]
    MissingSpecificApprovers,
    #[error("hybrid rules require a threshold, specific approvers, or both")]
    HybridWithoutMechanism,
    #[error("scope min_amount {min} exceeds max_amount {max}")]
    InvalidAmountRange { min: Decimal, max: Decimal },
    #[error("approver `{approver_id}` appears more than once in the approval sequence")]
    DuplicateApprover { approver_id: String },
}

impl ApprovalRule {
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.name.trim().is_empty() {
            return Err(RuleValidationError::EmptyName);
        }

        self.policy.validate()?;

        if let (Some(min), Some(max)) = (self.scope.min_amount, self.scope.max_amount) {
            if min > max {
                return Err(RuleValidationError::InvalidAmountRange { min, max });
            }
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = self.approval_sequence.iter().find(|id| !seen.insert(*id)) {
            return Err(RuleValidationError::DuplicateApprover { approver_id: duplicate.0.clone() });
        }

        Ok(())
    }

    pub fn applies_to(&self, category: &str, amount: Decimal) -> bool {
        self.is_active && self.scope.matches(category, amount)
    }
}

/// Picks the rule consulted for an expense: the newest active rule of the
/// company whose scope matches.
pub fn select_active_rule<'a>(
    rules: &'a [ApprovalRule],
    company_id: &CompanyId,
    category: &str,
    amount: Decimal,
) -> Option<&'a ApprovalRule> {
    rules
        .iter()
        .filter(|rule| &rule.company_id == company_id && rule.applies_to(category, amount))
        .max_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| right.id.0.cmp(&left.id.0))
        })
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
