//! Database repository for persisted global parameters.

use crate::db::errors::Result;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct Parameters<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Parameters<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// All stored `(name, value)` pairs.
    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT name, value FROM global_parameters ORDER BY name")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(rows)
    }

    #[instrument(skip(self, value), err)]
    pub async fn set(&mut self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO global_parameters (name, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(value)
        .bind(Utc::now())
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    /// Store a value only when the parameter has never been set.
    #[instrument(skip(self, value), err)]
    pub async fn set_default(&mut self, name: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT INTO global_parameters (name, value, updated_at) VALUES (?, ?, ?) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .bind(value)
            .bind(Utc::now())
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }
}
