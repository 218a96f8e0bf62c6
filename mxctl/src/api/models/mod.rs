//! API request and response data models.
//!
//! These structures are distinct from the database models in [`crate::db::models`] and define
//! the public contract of the HTTP surface. Form bodies (login, profile, API access) are
//! deserialized with `axum::Form`, everything else is JSON.
//!
//! - [`users`]: roles, the authenticated [`users::CurrentUser`] and user responses
//! - [`auth`]: login form and its response
//! - [`profile`]: password and language changes
//! - [`api_access`]: per-user API token toggle
//! - [`information`]: instance version information
//! - [`parameters`]: global parameter views and updates

pub mod api_access;
pub mod auth;
pub mod information;
pub mod parameters;
pub mod profile;
pub mod users;
