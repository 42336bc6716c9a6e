pub mod approvals;
pub mod audit;
pub mod config;
pub mod currency;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use approvals::{
    build_approver_sequence, evaluate_policy, evaluate_rule, ApproverAction, ApproverSource,
    DecisionBasis, Progress, RuleDecision, SequencedApprover,
};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use currency::{Conversion, CurrencyConverter, StaticRateConverter};
pub use domain::company::{Company, CompanyId};
pub use domain::expense::{
    ApprovalStatus, ApprovalStep, Expense, ExpenseDetails, ExpenseId, ExpenseLine, ExpenseStatus,
};
pub use domain::notification::{
    InMemoryNotificationDispatcher, Notification, NotificationDispatcher, NotificationId,
    NotificationKind,
};
pub use domain::rule::{
    select_active_rule, ApprovalRule, RuleId, RulePolicy, RuleScope, RuleValidationError,
};
pub use domain::user::{User, UserId, UserRole};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use workflow::{
    ExpenseWorkflow, TransitionOutcome, WorkflowAction, WorkflowCommand, WorkflowError,
    WorkflowEvent,
};
