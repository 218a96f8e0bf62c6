//! Database repository for per-user API tokens.

use crate::api::models::users::Role;
use crate::db::{
    errors::Result,
    models::{api_tokens::ApiTokenDBResponse, users::UserDBResponse},
};
use crate::types::UserId;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct ApiTokens<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> ApiTokens<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_for_user(&mut self, user_id: UserId) -> Result<Option<ApiTokenDBResponse>> {
        let token = sqlx::query_as::<_, ApiTokenDBResponse>("SELECT * FROM api_tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(token)
    }

    /// Store `key` for the user unless a token already exists. Returns the user's token.
    #[instrument(skip(self, key), err)]
    pub async fn create_if_absent(&mut self, user_id: UserId, key: &str) -> Result<ApiTokenDBResponse> {
        sqlx::query("INSERT INTO api_tokens (user_id, key, created_at) VALUES (?, ?, ?) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .bind(key)
            .bind(Utc::now())
            .execute(&mut *self.db)
            .await?;

        let token = sqlx::query_as::<_, ApiTokenDBResponse>("SELECT * FROM api_tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(token)
    }

    /// Remove the user's token. Returns whether one existed.
    #[instrument(skip(self), err)]
    pub async fn delete_for_user(&mut self, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Resolve the active user owning `key`.
    #[instrument(skip_all, err)]
    pub async fn find_user_by_key(&mut self, key: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            SELECT u.* FROM api_tokens t
            INNER JOIN users u ON u.id = t.user_id
            WHERE t.key = ? AND u.is_active = 1 AND u.role != ?
            "#,
        )
        .bind(key)
        .bind(Role::SimpleUser)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(user)
    }
}
