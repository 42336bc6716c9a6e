use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::currency::normalize_currency_code;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub country: String,
    pub default_currency: String,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub fn new(
        id: CompanyId,
        name: impl Into<String>,
        country: impl Into<String>,
        default_currency: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DomainError::Validation("company name is required".to_string()));
        }
        let default_currency = normalize_currency_code(default_currency).ok_or_else(|| {
            DomainError::Validation(format!("invalid currency code `{default_currency}`"))
        })?;

        Ok(Self { id, name, country: country.into().trim().to_string(), default_currency, created_at: now })
    }
}
