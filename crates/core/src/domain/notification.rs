use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::company::CompanyId;
use crate::domain::expense::ExpenseId;
use crate::domain::user::UserId;
use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequest,
    Approved,
    Rejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequest => "approval_request",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approval_request" => Some(Self::ApprovalRequest),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub company_id: CompanyId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub expense_id: ExpenseId,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        company_id: CompanyId,
        user_id: UserId,
        kind: NotificationKind,
        expense_id: ExpenseId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId(Uuid::new_v4().to_string()),
            company_id,
            user_id,
            kind,
            expense_id,
            read: false,
            created_at: now,
        }
    }

    pub fn message(&self) -> String {
        match self.kind {
            NotificationKind::ApprovalRequest => {
                format!("Expense {} is waiting for your approval", self.expense_id)
            }
            NotificationKind::Approved => format!("Expense {} was approved", self.expense_id),
            NotificationKind::Rejected => format!("Expense {} was rejected", self.expense_id),
        }
    }
}

/// Delivers workflow notifications to approvers and submitters.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<(), ApplicationError>;
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationDispatcher {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotificationDispatcher {
    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for InMemoryNotificationDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), ApplicationError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}
