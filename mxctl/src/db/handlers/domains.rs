//! Database repository for mail domains.

use crate::db::{errors::Result, models::domains::DomainDBResponse};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct Domains<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Domains<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_name(&mut self, name: &str) -> Result<Option<DomainDBResponse>> {
        let domain = sqlx::query_as::<_, DomainDBResponse>("SELECT * FROM domains WHERE name = ?")
            .bind(name.to_lowercase())
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(domain)
    }

    /// Return the domain called `name`, creating it when it does not exist yet.
    #[instrument(skip(self), err)]
    pub async fn get_or_create(&mut self, name: &str) -> Result<DomainDBResponse> {
        let name = name.to_lowercase();
        sqlx::query("INSERT INTO domains (name, created_at) VALUES (?, ?) ON CONFLICT (name) DO NOTHING")
            .bind(&name)
            .bind(Utc::now())
            .execute(&mut *self.db)
            .await?;

        let domain = sqlx::query_as::<_, DomainDBResponse>("SELECT * FROM domains WHERE name = ?")
            .bind(&name)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(domain)
    }

    #[instrument(skip(self), err)]
    pub async fn count(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM domains").fetch_one(&mut *self.db).await?;
        Ok(count)
    }
}
