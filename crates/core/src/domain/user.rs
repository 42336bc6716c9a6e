use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::company::CompanyId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Manager,
    Finance,
    Director,
    Employee,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Finance => "finance",
            Self::Director => "director",
            Self::Employee => "employee",
        }
    }

    /// Roles drawn into the approver sequence when no approval rule applies.
    pub fn is_fallback_approver(&self) -> bool {
        matches!(self, Self::Manager | Self::Finance | Self::Director | Self::Admin)
    }
}

impl FromStr for UserRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "finance" => Ok(Self::Finance),
            "director" => Ok(Self::Director),
            "employee" => Ok(Self::Employee),
            other => Err(DomainError::Validation(format!(
                "unsupported user role `{other}` (expected admin|manager|finance|director|employee)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub company_id: CompanyId,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub manager_id: Option<UserId>,
    pub is_manager_approver: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::Validation("user name is required".to_string()));
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::Validation(format!("invalid email `{email}`")));
        }
        if self.manager_id.as_ref() == Some(&self.id) {
            return Err(DomainError::Validation("a user cannot be their own manager".to_string()));
        }
        Ok(())
    }
}
