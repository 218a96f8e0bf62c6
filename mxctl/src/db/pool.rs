//! Connection pool construction.

use std::{str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;

/// Open the SQLite pool described by `config`, creating the database file when missing.
#[instrument(skip_all, fields(url = %config.url))]
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let settings = &config.pool;
    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs));

    // 0 means "never"
    pool_options = pool_options.idle_timeout((settings.idle_timeout_secs > 0).then(|| Duration::from_secs(settings.idle_timeout_secs)));
    pool_options = pool_options.max_lifetime((settings.max_lifetime_secs > 0).then(|| Duration::from_secs(settings.max_lifetime_secs)));

    let pool = pool_options.connect_with(options).await?;
    info!("Connected to database");
    Ok(pool)
}
