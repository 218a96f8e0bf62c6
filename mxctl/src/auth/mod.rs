//! Authentication and authorization.
//!
//! Logins go through a [`backends::BackendChain`]: an ordered list of backends (LDAP, then
//! the local password store by default), the first one accepting the credentials wins. The
//! LDAP backend provisions local accounts, mailboxes and domains on the fly.
//!
//! Once logged in, a browser holds a JWT session cookie ([`session`]). Programmatic clients
//! send an API token instead. Both are resolved by the [`current_user`] extractor:
//!
//! ```ignore
//! use mxctl::api::models::users::CurrentUser;
//!
//! async fn protected_handler(current_user: CurrentUser) -> String {
//!     format!("Hello, {}!", current_user.username)
//! }
//! ```
//!
//! - [`backends`]: the [`backends::AuthBackend`] trait, local and LDAP backends
//! - [`directory`]: LDAP access behind the [`directory::Directory`] trait
//! - [`current_user`]: request authentication extractor
//! - [`password`]: Argon2 hashing and the password policy
//! - [`permissions`]: role checks for handlers
//! - [`session`]: JWT session tokens

pub mod backends;
pub mod current_user;
pub mod directory;
pub mod password;
pub mod permissions;
pub mod session;
