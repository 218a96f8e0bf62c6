//! Profile form models.

use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// Browser forms submit untouched fields as empty strings.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()))
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProfileForm {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub oldpassword: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub newpassword: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub confirmation: Option<String>,
}

impl ProfileForm {
    /// True when the form asks for a password change.
    pub fn changes_password(&self) -> bool {
        self.oldpassword.is_some() || self.newpassword.is_some() || self.confirmation.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub username: String,
    pub email: String,
    pub language: String,
    /// Whether the password is managed outside this application
    pub external_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
