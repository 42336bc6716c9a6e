//! Offline rule preview: the same evaluator the workflow consults, fed
//! from a JSON file.

use std::fs;
use std::path::Path;

use reimburse_core::approvals::{evaluate_policy, ApproverAction, RuleDecision};
use reimburse_core::domain::rule::RulePolicy;
use reimburse_core::domain::user::UserId;
use serde::Deserialize;
use serde_json::json;

use crate::commands::{CommandResult, EXIT_INPUT};

#[derive(Debug, Deserialize)]
struct EvaluateInput {
    rule: RuleInput,
    #[serde(default)]
    actions: Vec<ApproverAction>,
}

#[derive(Debug, Deserialize)]
struct RuleInput {
    #[serde(default)]
    name: Option<String>,
    policy: RulePolicy,
    #[serde(default)]
    approval_sequence: Vec<UserId>,
}

pub fn run(path: &Path) -> CommandResult {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "evaluate",
                "input",
                format!("failed to read `{}`: {error}", path.display()),
                EXIT_INPUT,
            );
        }
    };

    let input: EvaluateInput = match serde_json::from_str(&raw) {
        Ok(input) => input,
        Err(error) => {
            return CommandResult::failure(
                "evaluate",
                "input",
                format!("`{}` is not a valid evaluation request: {error}", path.display()),
                EXIT_INPUT,
            );
        }
    };

    if let Err(error) = input.rule.policy.validate() {
        return CommandResult::failure(
            "evaluate",
            "input",
            format!("`{}` carries an invalid rule policy: {error}", path.display()),
            EXIT_INPUT,
        );
    }

    let decision = evaluate(&input);
    CommandResult::success_with_detail(
        "evaluate",
        decision.explanation.clone(),
        Some(json!({
            "rule": input.rule.name,
            "policy": input.rule.policy.kind(),
            "total_approvers": input.rule.approval_sequence.len(),
            "outcome": decision.outcome(),
            "decision": decision,
        })),
    )
}

fn evaluate(input: &EvaluateInput) -> RuleDecision {
    evaluate_policy(&input.rule.policy, input.rule.approval_sequence.len(), &input.actions)
}
