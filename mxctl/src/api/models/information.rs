//! Instance information models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::local_config::PublishedVersion;

/// Name under which this application's releases are published.
pub const COMPONENT_NAME: &str = "mxctl";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InformationResponse {
    pub installed_version: String,
    /// Latest published version, unknown until the first successful sync
    pub latest_version: Option<String>,
    pub update_available: bool,
    pub api_pk: Option<i64>,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Human readable summary
    pub content: String,
    /// Every published component version
    pub versions: BTreeMap<String, PublishedVersion>,
}

impl InformationResponse {
    pub fn summary(installed: &str, latest: Option<&str>, update_available: bool) -> String {
        match latest {
            Some(latest) if update_available => {
                format!("Installed version: {installed}. A new version is available: {latest}.")
            }
            Some(latest) => format!("Installed version: {installed}. Latest version: {latest}. You are up to date."),
            None => format!("Installed version: {installed}. Latest version: unknown."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DashboardResponse {
    pub domain_counter: i64,
    pub mailbox_counter: i64,
    pub user_counter: i64,
}
