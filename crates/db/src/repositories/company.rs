use sqlx::Row;

use reimburse_core::domain::company::{Company, CompanyId};

use super::{decode_error, format_timestamp, parse_timestamp, CompanyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCompanyRepository {
    pool: DbPool,
}

impl SqlCompanyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_company(row: &sqlx::sqlite::SqliteRow) -> Result<Company, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let country: String = row.try_get("country").map_err(decode_error)?;
    let default_currency: String = row.try_get("default_currency").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    Ok(Company {
        id: CompanyId(id),
        name,
        country,
        default_currency,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl CompanyRepository for SqlCompanyRepository {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, country, default_currency, created_at FROM companies WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_company).transpose()
    }

    async fn save(&self, company: Company) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO companies (id, name, country, default_currency, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 country = excluded.country,
                 default_currency = excluded.default_currency",
        )
        .bind(&company.id.0)
        .bind(&company.name)
        .bind(&company.country)
        .bind(&company.default_currency)
        .bind(format_timestamp(&company.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
