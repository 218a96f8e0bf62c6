//! Database model for the local configuration singleton.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// A version published by the public API for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PublishedVersion {
    pub version: String,
    pub url: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LocalConfigDBResponse {
    /// Identifier assigned to this instance by the public API
    pub api_pk: Option<i64>,
    /// Latest published versions, keyed by component name
    pub api_versions: Json<BTreeMap<String, PublishedVersion>>,
    pub last_sync_at: Option<DateTime<Utc>>,
}
