//! Global parameter models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Current parameter values, with secrets redacted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ParametersResponse {
    pub parameters: BTreeMap<String, String>,
}

/// Partial update. Values may be given as JSON strings, numbers or booleans.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ParametersUpdate {
    #[schema(value_type = Object)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl ParametersUpdate {
    /// Flatten the update into the textual form parameters are stored in.
    pub fn into_rows(self) -> Vec<(String, String)> {
        self.parameters
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (name, value)
            })
            .collect()
    }
}
