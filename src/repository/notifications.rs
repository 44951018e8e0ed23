//! In-app notification storage

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Notification,
    services::notifications::NotificationSink,
};

/// Writes notifications on its own pool connection, outside any loan
/// transaction, so a failed insert cannot undo a loan.
#[derive(Clone)]
pub struct PgNotificationSink {
    pool: Pool<Postgres>,
}

impl PgNotificationSink {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Unread notifications of a user, newest first
    pub async fn unread(&self, user_id: Uuid) -> AppResult<Vec<(String, serde_json::Value)>> {
        let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
            r#"
            SELECT event_type, payload FROM notifications
            WHERE recipient_id = $1 AND read_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl NotificationSink for PgNotificationSink {
    fn name(&self) -> &'static str {
        "in-app"
    }

    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, event_type, recipient_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.event_type.as_str())
        .bind(notification.recipient_id)
        .bind(&notification.payload)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Unavailable(format!("Failed to store notification: {}", e)))?;

        Ok(())
    }
}
