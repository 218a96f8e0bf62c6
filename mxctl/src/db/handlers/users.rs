//! Database repository for users.

use crate::types::UserId;
use crate::{
    api::models::users::Role,
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::users::{AuthSource, UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::instrument;

/// Filter for listing users
#[derive(Debug, Clone)]
pub struct UserFilter {
    pub skip: i64,
    pub limit: i64,
    pub role: Option<Role>,
}

impl UserFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit, role: None }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

pub struct Users<'c> {
    db: &'c mut SqliteConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let now = Utc::now();
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (username, email, password_hash, role, auth_source, language, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, COALESCE(?, 'en'), ?, ?)
            RETURNING *
            "#,
        )
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.password_hash)
        .bind(request.role)
        .bind(request.auth_source)
        .bind(&request.language)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let users = sqlx::query_as::<_, UserDBResponse>(
            r#"
            SELECT * FROM users
            WHERE (?1 IS NULL OR role = ?1)
            ORDER BY id
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(filter.role)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(users)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?").bind(id).execute(&mut *self.db).await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            UPDATE users SET
                email = COALESCE(?, email),
                role = COALESCE(?, role),
                password_hash = COALESCE(?, password_hash),
                is_active = COALESCE(?, is_active),
                language = COALESCE(?, language),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&request.email)
        .bind(request.role)
        .bind(&request.password_hash)
        .bind(request.is_active)
        .bind(&request.language)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(user)
    }
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_user_by_username(&mut self, username: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Insert or refresh a user resolved by a directory backend, keyed by username.
    ///
    /// Super administrators keep their role and credential owner.
    #[instrument(skip(self), err)]
    pub async fn upsert_directory_user(&mut self, username: &str, email: &str, role: Role) -> Result<UserDBResponse> {
        let now = Utc::now();
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (username, email, password_hash, role, auth_source, created_at, updated_at)
            VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?5)
            ON CONFLICT (username) DO UPDATE SET
                email = excluded.email,
                role = CASE WHEN users.role = 'super_admin' THEN users.role ELSE excluded.role END,
                auth_source = CASE WHEN users.role = 'super_admin' THEN users.auth_source ELSE excluded.auth_source END,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(role)
        .bind(AuthSource::Ldap)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    pub async fn record_login(&mut self, id: UserId) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Invalidate every session token issued to the user so far.
    #[instrument(skip(self), err)]
    pub async fn revoke_sessions(&mut self, id: UserId) -> Result<i64> {
        let version = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET session_version = session_version + 1 WHERE id = ? RETURNING session_version",
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(version)
    }

    #[instrument(skip(self), err)]
    pub async fn count(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(&mut *self.db).await?;
        Ok(count)
    }
}
