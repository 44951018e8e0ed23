//! User directory lookups

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{error::AppResult, models::UserContact};

/// Resolves user ids to contact details. Owned by the account subsystem.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `None` when the user does not exist
    async fn contact(&self, user_id: Uuid) -> AppResult<Option<UserContact>>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: Pool<Postgres>,
}

impl PgUserDirectory {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn contact(&self, user_id: Uuid) -> AppResult<Option<UserContact>> {
        let user = sqlx::query_as::<_, UserContact>(
            "SELECT id, display_name, email FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
