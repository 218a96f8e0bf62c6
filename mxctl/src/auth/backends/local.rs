//! Backend checking the argon2 hashes stored in the users table.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::AuthBackend;
use crate::{
    auth::password::{self, Argon2Params},
    config::Config,
    db::{
        errors::DbError,
        handlers::{Repository, Users},
        models::users::{AuthSource, UserDBResponse, UserUpdateDBRequest},
    },
    errors::{Error, Result},
};

pub struct LocalBackend {
    db: SqlitePool,
    argon2: Argon2Params,
}

impl LocalBackend {
    pub fn new(db: SqlitePool, config: &Config) -> Self {
        Self {
            db,
            argon2: Argon2Params::from(&config.auth.password),
        }
    }

    /// The active local user behind `username` whose password is `password`.
    async fn verified_user(&self, username: &str, password: &str) -> Result<Option<UserDBResponse>> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        let Some(user) = Users::new(&mut conn).get_user_by_username(username).await? else {
            return Ok(None);
        };

        if !user.is_active || user.auth_source != AuthSource::Local {
            return Ok(None);
        }
        let Some(hash) = user.password_hash.clone() else {
            return Ok(None);
        };

        if password::verify_string_blocking(password.to_string(), hash).await? {
            Ok(Some(user))
        } else {
            debug!("Password mismatch");
            Ok(None)
        }
    }
}

#[async_trait]
impl AuthBackend for LocalBackend {
    fn name(&self) -> AuthSource {
        AuthSource::Local
    }

    #[instrument(skip(self, password), err)]
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserDBResponse>> {
        self.verified_user(username, password).await
    }

    #[instrument(skip(self, old, new), err)]
    async fn update_password(&self, username: &str, old: &str, new: &str) -> Result<()> {
        let user = self.verified_user(username, old).await?.ok_or_else(|| Error::BadRequest {
            message: "Old password mismatch".to_string(),
        })?;

        let hash = password::hash_string_blocking(new.to_string(), self.argon2).await?;

        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        Users::new(&mut conn)
            .update(
                user.id,
                &UserUpdateDBRequest {
                    password_hash: Some(hash),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}
