//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut SqliteConnection` (a pooled connection or a transaction) and
//! returns models from [`crate::db::models`]. [`Users`] implements the generic [`Repository`]
//! trait; the smaller tables expose the handful of operations the service needs.
//!
//! - [`Users`]: accounts, lookups and directory provisioning upserts
//! - [`Domains`] / [`Mailboxes`]: mail domains and the mailboxes of simple users
//! - [`ApiTokens`]: per-user API token issuance and revocation
//! - [`Parameters`]: persisted global parameters
//! - [`LocalConfigs`]: the local configuration singleton

pub mod api_tokens;
pub mod domains;
pub mod local_config;
pub mod mailboxes;
pub mod parameters;
pub mod repository;
pub mod users;

pub use api_tokens::ApiTokens;
pub use domains::Domains;
pub use local_config::LocalConfigs;
pub use mailboxes::Mailboxes;
pub use parameters::Parameters;
pub use repository::Repository;
pub use users::Users;
