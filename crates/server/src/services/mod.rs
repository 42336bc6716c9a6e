pub mod directory;
pub mod expense;
pub mod notify;

pub use directory::{DirectoryService, NewCompany, NewRule, NewUser, RuleDraft, RulePreview};
pub use expense::{ExpenseService, ExpenseUpdate, NewExpense};
pub use notify::InboxDispatcher;
