//! Database models for API tokens.

use crate::types::UserId;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiTokenDBResponse {
    pub user_id: UserId,
    pub key: String,
    pub created_at: DateTime<Utc>,
}
