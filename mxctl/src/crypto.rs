//! Random secrets handed out to users.

use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;

/// Generates an API token with 256 bits of entropy, encoded as base64url without padding.
pub fn generate_api_key() -> String {
    let mut key_bytes = [0u8; 32];
    rng().fill(&mut key_bytes);

    general_purpose::URL_SAFE_NO_PAD.encode(key_bytes)
}
