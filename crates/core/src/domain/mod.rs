pub mod company;
pub mod expense;
pub mod notification;
pub mod rule;
pub mod user;
