//! Database record models matching table schemas.
//!
//! Database models are distinct from API models so storage and API representations can evolve
//! independently. Request structs (`*CreateDBRequest`, `*UpdateDBRequest`) carry inputs into the
//! repositories; `*DBResponse` structs carry rows out.
//!
//! - [`users`]: accounts, roles and the backend that owns each credential
//! - [`domains`]: mail domains
//! - [`mailboxes`]: mailboxes attached to simple users
//! - [`api_tokens`]: per-user API tokens
//! - [`local_config`]: the instance singleton holding public API synchronization state

pub mod api_tokens;
pub mod domains;
pub mod local_config;
pub mod mailboxes;
pub mod users;
