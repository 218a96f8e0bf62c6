//! API request/response models for users.

use crate::db::models::users::{AuthSource, UserDBResponse};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Administrative level of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SimpleUser,
    DomainAdmin,
    SuperAdmin,
}

impl Role {
    /// Page a freshly logged-in user of this role is sent to.
    pub fn landing_page(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "/dashboard/",
            Role::DomainAdmin | Role::SimpleUser => "/user/",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::DomainAdmin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub auth_source: AuthSource,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            username: db.username,
            email: db.email,
            role: db.role,
            auth_source: db.auth_source,
            language: db.language,
            created_at: db.created_at,
            last_login: db.last_login,
        }
    }
}

/// Body of the user landing page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserIndexResponse {
    pub user: UserResponse,
    /// Full address of the user's mailbox, if any
    pub mailbox: Option<String>,
}

/// The user a request was authenticated as.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub auth_source: AuthSource,
    pub language: String,
    #[serde(skip)]
    pub session_version: i64,
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            username: db.username,
            email: db.email,
            role: db.role,
            auth_source: db.auth_source,
            language: db.language,
            session_version: db.session_version,
        }
    }
}
