pub mod engine;
pub mod states;

pub use engine::{ExpenseWorkflow, WorkflowError};
pub use states::{TransitionOutcome, WorkflowAction, WorkflowCommand, WorkflowEvent};
