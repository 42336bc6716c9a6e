use sqlx::Row;

use reimburse_core::domain::company::CompanyId;
use reimburse_core::domain::expense::ExpenseId;
use reimburse_core::domain::notification::{Notification, NotificationId, NotificationKind};
use reimburse_core::domain::user::UserId;

use super::{
    decode_error, format_timestamp, parse_timestamp, NotificationRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlNotificationRepository {
    pool: DbPool,
}

impl SqlNotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_notification(row: &sqlx::sqlite::SqliteRow) -> Result<Notification, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let company_id: String = row.try_get("company_id").map_err(decode_error)?;
    let user_id: String = row.try_get("user_id").map_err(decode_error)?;
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let expense_id: String = row.try_get("expense_id").map_err(decode_error)?;
    let read: bool = row.try_get("is_read").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    let kind = NotificationKind::parse(&kind)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown notification kind `{kind}`")))?;

    Ok(Notification {
        id: NotificationId(id),
        company_id: CompanyId(company_id),
        user_id: UserId(user_id),
        kind,
        expense_id: ExpenseId(expense_id),
        read,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl NotificationRepository for SqlNotificationRepository {
    async fn save(&self, notification: Notification) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO notifications (id, company_id, user_id, kind, expense_id, is_read,
                                        created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET is_read = excluded.is_read",
        )
        .bind(&notification.id.0)
        .bind(&notification.company_id.0)
        .bind(&notification.user_id.0)
        .bind(notification.kind.as_str())
        .bind(&notification.expense_id.0)
        .bind(notification.read)
        .bind(format_timestamp(&notification.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        company_id: Option<&CompanyId>,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let company_id = company_id.map(|id| id.0.as_str());
        let rows = sqlx::query(
            "SELECT id, company_id, user_id, kind, expense_id, is_read, created_at
             FROM notifications
             WHERE user_id = ? AND (? IS NULL OR company_id = ?)
             ORDER BY created_at DESC, id ASC",
        )
        .bind(&user_id.0)
        .bind(company_id)
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_notification).collect()
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use reimburse_core::domain::company::CompanyId;
    use reimburse_core::domain::expense::ExpenseId;
    use reimburse_core::domain::notification::{Notification, NotificationId, NotificationKind};
    use reimburse_core::domain::user::UserId;

    use super::SqlNotificationRepository;
    use crate::repositories::NotificationRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlNotificationRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlNotificationRepository::new(pool)
    }

    fn notification(user: &str, company: &str, kind: NotificationKind, offset: i64) -> Notification {
        Notification::new(
            CompanyId(company.to_string()),
            UserId(user.to_string()),
            kind,
            ExpenseId("exp-1".to_string()),
            Utc::now() + Duration::seconds(offset),
        )
    }

    #[tokio::test]
    async fn list_for_user_is_newest_first_and_scoped_by_company() {
        let repo = setup().await;
        repo.save(notification("u-a", "co-1", NotificationKind::ApprovalRequest, 0))
            .await
            .expect("save 1");
        repo.save(notification("u-a", "co-1", NotificationKind::Approved, 10))
            .await
            .expect("save 2");
        repo.save(notification("u-a", "co-2", NotificationKind::Rejected, 20))
            .await
            .expect("save 3");
        repo.save(notification("u-b", "co-1", NotificationKind::ApprovalRequest, 30))
            .await
            .expect("save 4");

        let user = UserId("u-a".to_string());
        let everything = repo.list_for_user(&user, None).await.expect("list");
        assert_eq!(everything.len(), 3);
        assert_eq!(everything[0].kind, NotificationKind::Rejected);

        let scoped = repo
            .list_for_user(&user, Some(&CompanyId("co-1".to_string())))
            .await
            .expect("list scoped");
        let kinds: Vec<NotificationKind> = scoped.iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NotificationKind::Approved, NotificationKind::ApprovalRequest]);
    }

    #[tokio::test]
    async fn mark_read_flips_the_flag_once_found() {
        let repo = setup().await;
        let sent = notification("u-a", "co-1", NotificationKind::ApprovalRequest, 0);
        repo.save(sent.clone()).await.expect("save");

        assert!(repo.mark_read(&sent.id).await.expect("mark read"));
        assert!(!repo.mark_read(&NotificationId("missing".to_string())).await.expect("mark"));

        let listed = repo.list_for_user(&sent.user_id, None).await.expect("list");
        assert!(listed[0].read);
    }
}
