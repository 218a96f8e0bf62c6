//! Database models for mail domains.

use crate::types::DomainId;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DomainDBResponse {
    pub id: DomainId,
    pub name: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}
