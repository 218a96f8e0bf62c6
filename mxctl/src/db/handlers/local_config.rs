//! Database repository for the local configuration singleton.

use crate::db::{
    errors::Result,
    models::local_config::{LocalConfigDBResponse, PublishedVersion},
};
use chrono::Utc;
use sqlx::{SqliteConnection, types::Json};
use std::collections::BTreeMap;
use tracing::instrument;

pub struct LocalConfigs<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> LocalConfigs<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Create the singleton row if it does not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure(&mut self) -> Result<()> {
        sqlx::query("INSERT INTO local_config (id) VALUES (1) ON CONFLICT (id) DO NOTHING")
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self) -> Result<LocalConfigDBResponse> {
        self.ensure().await?;
        let config = sqlx::query_as::<_, LocalConfigDBResponse>("SELECT api_pk, api_versions, last_sync_at FROM local_config WHERE id = 1")
            .fetch_one(&mut *self.db)
            .await?;
        Ok(config)
    }

    #[instrument(skip(self), err)]
    pub async fn set_api_pk(&mut self, api_pk: i64) -> Result<()> {
        self.ensure().await?;
        sqlx::query("UPDATE local_config SET api_pk = ? WHERE id = 1")
            .bind(api_pk)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, versions), fields(count = versions.len()), err)]
    pub async fn set_versions(&mut self, versions: &BTreeMap<String, PublishedVersion>) -> Result<()> {
        self.ensure().await?;
        sqlx::query("UPDATE local_config SET api_versions = ?, last_sync_at = ? WHERE id = 1")
            .bind(Json(versions))
            .bind(Utc::now())
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }
}
