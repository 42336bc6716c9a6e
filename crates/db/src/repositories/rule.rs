use sqlx::Row;

use reimburse_core::domain::company::CompanyId;
use reimburse_core::domain::rule::{ApprovalRule, RuleId, RulePolicy, RuleScope};
use reimburse_core::domain::user::UserId;

use super::{
    decode_error, format_timestamp, from_json, parse_timestamp, to_json, RepositoryError,
    RuleRepository,
};
use crate::DbPool;

pub struct SqlRuleRepository {
    pool: DbPool,
}

impl SqlRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const RULE_COLUMNS: &str = "id, company_id, name, rule_type, threshold, specific_approver_ids,
     approval_sequence, scope, is_active, created_by, created_at, updated_at";

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let company_id: String = row.try_get("company_id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let rule_type: String = row.try_get("rule_type").map_err(decode_error)?;
    let threshold: Option<i64> = row.try_get("threshold").map_err(decode_error)?;
    let specific_approver_ids: String =
        row.try_get("specific_approver_ids").map_err(decode_error)?;
    let approval_sequence: String = row.try_get("approval_sequence").map_err(decode_error)?;
    let scope: String = row.try_get("scope").map_err(decode_error)?;
    let is_active: bool = row.try_get("is_active").map_err(decode_error)?;
    let created_by: Option<String> = row.try_get("created_by").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    let threshold = threshold
        .map(|value| {
            u8::try_from(value)
                .map_err(|_| RepositoryError::Decode(format!("threshold {value} out of range")))
        })
        .transpose()?;
    let specific_approver_ids: Vec<UserId> =
        from_json("specific_approver_ids", &specific_approver_ids)?;
    let policy =
        RulePolicy::from_parts(&rule_type, threshold, specific_approver_ids).map_err(decode_error)?;

    Ok(ApprovalRule {
        id: RuleId(id),
        company_id: CompanyId(company_id),
        name,
        policy,
        approval_sequence: from_json("approval_sequence", &approval_sequence)?,
        scope: from_json::<RuleScope>("scope", &scope)?,
        is_active,
        created_by: created_by.map(UserId),
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl RuleRepository for SqlRuleRepository {
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rules WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_rule).transpose()
    }

    async fn list_by_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM approval_rules
             WHERE company_id = ?
             ORDER BY created_at DESC, id ASC"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn list_active_by_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM approval_rules
             WHERE company_id = ? AND is_active = 1
             ORDER BY created_at DESC, id ASC"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError> {
        let threshold = rule.policy.threshold().map(i64::from);
        let specific_approver_ids =
            to_json("specific_approver_ids", rule.policy.specific_approver_ids())?;
        let approval_sequence = to_json("approval_sequence", &rule.approval_sequence)?;
        let scope = to_json("scope", &rule.scope)?;

        sqlx::query(
            "INSERT INTO approval_rules (id, company_id, name, rule_type, threshold,
                                         specific_approver_ids, approval_sequence, scope,
                                         is_active, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 rule_type = excluded.rule_type,
                 threshold = excluded.threshold,
                 specific_approver_ids = excluded.specific_approver_ids,
                 approval_sequence = excluded.approval_sequence,
                 scope = excluded.scope,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )
        .bind(&rule.id.0)
        .bind(&rule.company_id.0)
        .bind(&rule.name)
        .bind(rule.policy.kind())
        .bind(threshold)
        .bind(specific_approver_ids)
        .bind(approval_sequence)
        .bind(scope)
        .bind(rule.is_active)
        .bind(rule.created_by.as_ref().map(|id| id.0.as_str()))
        .bind(format_timestamp(&rule.created_at))
        .bind(format_timestamp(&rule.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &RuleId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM approval_rules WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
