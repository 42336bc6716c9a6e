use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use reimburse_core::domain::notification::{Notification, NotificationDispatcher};
use reimburse_core::errors::ApplicationError;
use reimburse_db::NotificationRepository;

/// Delivers notifications by storing them in the recipient's inbox.
pub struct InboxDispatcher {
    notifications: Arc<dyn NotificationRepository>,
}

impl InboxDispatcher {
    pub fn new(notifications: Arc<dyn NotificationRepository>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl NotificationDispatcher for InboxDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), ApplicationError> {
        let notification_id = notification.id.0.clone();
        let user_id = notification.user_id.0.clone();
        let kind = notification.kind.as_str();
        let message = notification.message();

        self.notifications.save(notification).await?;

        info!(
            event_name = "notification.dispatched",
            notification_id = %notification_id,
            user_id = %user_id,
            kind,
            message = %message,
            "notification stored in inbox"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use reimburse_core::domain::company::CompanyId;
    use reimburse_core::domain::expense::ExpenseId;
    use reimburse_core::domain::notification::{
        Notification, NotificationDispatcher, NotificationKind,
    };
    use reimburse_core::domain::user::UserId;
    use reimburse_db::Repositories;

    use super::InboxDispatcher;

    #[tokio::test]
    async fn dispatched_notifications_land_in_the_inbox() {
        let repositories = Repositories::in_memory();
        let dispatcher = InboxDispatcher::new(repositories.notifications.clone());

        dispatcher
            .dispatch(Notification::new(
                CompanyId("co-1".to_string()),
                UserId("u-a".to_string()),
                NotificationKind::ApprovalRequest,
                ExpenseId("exp-1".to_string()),
                Utc::now(),
            ))
            .await
            .expect("dispatch");

        let inbox = repositories
            .notifications
            .list_for_user(&UserId("u-a".to_string()), None)
            .await
            .expect("inbox");
        assert_eq!(inbox.len(), 1);
        assert!(!inbox[0].read);
    }
}
