//! Database repository for mailboxes.

use crate::db::{
    errors::Result,
    models::mailboxes::{MailboxCreateDBRequest, MailboxDBResponse},
};
use crate::types::UserId;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::instrument;

const SELECT_MAILBOX: &str = r#"
    SELECT m.id, m.address, m.domain_id, d.name AS domain_name, m.user_id, m.created_at
    FROM mailboxes m
    INNER JOIN domains d ON d.id = m.domain_id
"#;

pub struct Mailboxes<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Mailboxes<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_for_user(&mut self, user_id: UserId) -> Result<Option<MailboxDBResponse>> {
        let mailbox = sqlx::query_as::<_, MailboxDBResponse>(&format!("{SELECT_MAILBOX} WHERE m.user_id = ?"))
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(mailbox)
    }

    /// Attach a mailbox to a user. A user owns at most one mailbox, so an existing one is
    /// returned unchanged.
    #[instrument(skip(self, request), fields(address = %request.address), err)]
    pub async fn ensure(&mut self, request: &MailboxCreateDBRequest) -> Result<MailboxDBResponse> {
        sqlx::query(
            r#"
            INSERT INTO mailboxes (address, domain_id, user_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(request.address.to_lowercase())
        .bind(request.domain_id)
        .bind(request.user_id)
        .bind(Utc::now())
        .execute(&mut *self.db)
        .await?;

        let mailbox = sqlx::query_as::<_, MailboxDBResponse>(&format!("{SELECT_MAILBOX} WHERE m.user_id = ?"))
            .bind(request.user_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(mailbox)
    }

    #[instrument(skip(self), err)]
    pub async fn count(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mailboxes").fetch_one(&mut *self.db).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::handlers::{Domains, Repository, Users};
    use crate::db::models::users::{AuthSource, UserCreateDBRequest};
    use sqlx::SqlitePool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_ensure_mailbox(pool: SqlitePool) {
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn)
            .create(&UserCreateDBRequest {
                username: "user@test.com".to_string(),
                email: "user@test.com".to_string(),
                role: Role::SimpleUser,
                auth_source: AuthSource::Local,
                password_hash: None,
                language: None,
            })
            .await
            .unwrap();
        let domain = Domains::new(&mut conn).get_or_create("test.com").await.unwrap();

        let mut repo = Mailboxes::new(&mut conn);
        let request = MailboxCreateDBRequest {
            address: "user".to_string(),
            domain_id: domain.id,
            user_id: user.id,
        };
        let first = repo.ensure(&request).await.unwrap();
        let second = repo.ensure(&request).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.full_address(), "user@test.com");
        assert_eq!(repo.count().await.unwrap(), 1);

        // Mailboxes go away with their owner
        Users::new(&mut conn).delete(user.id).await.unwrap();
        assert!(Mailboxes::new(&mut conn).get_for_user(user.id).await.unwrap().is_none());
    }
}
