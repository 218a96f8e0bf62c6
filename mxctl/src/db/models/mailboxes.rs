//! Database models for mailboxes.

use crate::types::{DomainId, MailboxId, UserId};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct MailboxCreateDBRequest {
    /// Local part of the address
    pub address: String,
    pub domain_id: DomainId,
    pub user_id: UserId,
}

/// A mailbox joined with its domain name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MailboxDBResponse {
    pub id: MailboxId,
    pub address: String,
    pub domain_id: DomainId,
    pub domain_name: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl MailboxDBResponse {
    pub fn full_address(&self) -> String {
        format!("{}@{}", self.address, self.domain_name)
    }
}
