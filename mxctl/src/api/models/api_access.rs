//! API access toggle models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::api_tokens::ApiTokenDBResponse;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ApiAccessForm {
    /// Absent means unchecked, as browsers omit unchecked boxes
    #[serde(default, deserialize_with = "checkbox")]
    pub enable_api_access: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Checkbox {
    Bool(bool),
    Text(String),
}

fn checkbox<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Checkbox::deserialize(deserializer)? {
        Checkbox::Bool(value) => value,
        Checkbox::Text(value) => matches!(value.to_ascii_lowercase().as_str(), "true" | "on" | "1" | "yes"),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiTokenResponse {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

impl From<ApiTokenDBResponse> for ApiTokenResponse {
    fn from(db: ApiTokenDBResponse) -> Self {
        Self {
            key: db.key,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiAccessResponse {
    pub enable_api_access: bool,
    pub token: Option<ApiTokenResponse>,
}
