//! Backend authenticating against an LDAP directory and provisioning local accounts.
//!
//! Two ways of finding the user's entry are supported, selected by `ldap_auth_method`:
//!
//! - **searchbind**: bind with the service account, search `ldap_search_base` with
//!   `ldap_search_filter` and bind again as the single entry found;
//! - **directbind**: build the DN from `ldap_user_dn_template` and bind directly.
//!
//! A successful bind creates or refreshes the local user. Members of one of the
//! `ldap_admin_groups` become domain administrators. Everybody else is a simple user and
//! gets a mailbox named after their (email shaped) username.
//!
//! An unreachable or misbehaving directory is logged and the login is declined, so the
//! next backend of the chain still runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, error, instrument, warn};

use super::AuthBackend;
use crate::{
    api::models::users::Role,
    auth::{
        directory::{Directory, DirectoryError, DirectorySession, LdapSettings},
        password::{self, Argon2Params},
    },
    config::Config,
    db::{
        errors::DbError,
        handlers::{Domains, Mailboxes, Users},
        models::{
            mailboxes::MailboxCreateDBRequest,
            users::{AuthSource, UserDBResponse},
        },
    },
    errors::{Error, Result},
    parameters::{AuthenticationType, GlobalParameters, LdapAuthMethod, LdapGroupType, SharedParameters, USER_PLACEHOLDER},
};

/// Prefix telling the directory which scheme the stored password is hashed with.
const PASSWORD_SCHEME: &str = "{ARGON2}";

pub struct LdapBackend {
    db: SqlitePool,
    parameters: SharedParameters,
    directory: Arc<dyn Directory>,
    connect_timeout: Duration,
    argon2: Argon2Params,
}

fn directory_failure(operation: &str, err: DirectoryError) -> Error {
    Error::Internal {
        operation: format!("{operation}: {err}"),
    }
}

/// Split an email shaped username into local part and domain.
pub fn split_address(username: &str) -> Option<(&str, &str)> {
    let (local, domain) = username.split_once('@')?;
    let valid = !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !username.chars().any(char::is_whitespace);
    valid.then_some((local, domain))
}

/// Search filter for `username`, with filter metacharacters escaped.
pub fn user_search_filter(params: &GlobalParameters, username: &str) -> String {
    params.ldap_search_filter.replace(USER_PLACEHOLDER, &ldap3::ldap_escape(username))
}

/// DN for `username` built from the direct bind template.
pub fn user_dn(params: &GlobalParameters, username: &str) -> String {
    params.ldap_user_dn_template.replace(USER_PLACEHOLDER, &ldap3::dn_escape(username))
}

/// Filter matching the groups `username` (entry `dn`) belongs to.
pub fn group_filter(params: &GlobalParameters, dn: &str, username: &str) -> String {
    match params.ldap_group_type {
        LdapGroupType::GroupOfNames => format!("(&(objectClass=groupOfNames)(member={}))", ldap3::ldap_escape(dn)),
        LdapGroupType::PosixGroup => format!("(&(objectClass=posixGroup)(memberUid={}))", ldap3::ldap_escape(username)),
    }
}

impl LdapBackend {
    pub fn new(db: SqlitePool, parameters: SharedParameters, directory: Arc<dyn Directory>, config: &Config) -> Self {
        Self {
            db,
            parameters,
            directory,
            connect_timeout: config.ldap.connect_timeout,
            argon2: Argon2Params::from(&config.auth.password),
        }
    }

    async fn connect(&self, params: &GlobalParameters) -> Result<Box<dyn DirectorySession>> {
        let settings = LdapSettings::from_parameters(params, self.connect_timeout);
        self.directory
            .connect(&settings)
            .await
            .map_err(|e| directory_failure("connect to LDAP server", e))
    }

    /// Bind with the service account, when one is configured.
    async fn bind_service_account(&self, session: &mut dyn DirectorySession, params: &GlobalParameters) -> Result<()> {
        if params.ldap_bind_dn.is_empty() {
            return Ok(());
        }
        session
            .simple_bind(&params.ldap_bind_dn, &params.ldap_bind_password)
            .await
            .map_err(|e| directory_failure("bind with the LDAP service account", e))
    }

    /// Locate the entry of `username`. `None` when the directory does not know the user.
    async fn resolve_dn(&self, session: &mut dyn DirectorySession, params: &GlobalParameters, username: &str) -> Result<Option<String>> {
        match params.ldap_auth_method {
            LdapAuthMethod::DirectBind => Ok(Some(user_dn(params, username))),
            LdapAuthMethod::SearchBind => {
                self.bind_service_account(session, params).await?;

                let filter = user_search_filter(params, username);
                let mut entries = session
                    .search(&params.ldap_search_base, &filter, &["dn"])
                    .await
                    .map_err(|e| directory_failure("search LDAP users", e))?;

                match entries.len() {
                    1 => Ok(entries.pop().map(|entry| entry.dn)),
                    0 => {
                        debug!(%filter, "No directory entry");
                        Ok(None)
                    }
                    n => {
                        warn!(%filter, matches = n, "Search filter matched several directory entries");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Names of the groups the user belongs to. Empty unless admin groups are configured.
    async fn user_groups(&self, session: &mut dyn DirectorySession, params: &GlobalParameters, dn: &str, username: &str) -> Result<Vec<String>> {
        if params.admin_groups().is_empty() || params.ldap_groups_search_base.is_empty() {
            return Ok(Vec::new());
        }
        self.bind_service_account(session, params).await?;

        let filter = group_filter(params, dn, username);
        let entries = session
            .search(&params.ldap_groups_search_base, &filter, &["cn"])
            .await
            .map_err(|e| directory_failure("search LDAP groups", e))?;

        Ok(entries.iter().filter_map(|entry| entry.first("cn")).map(str::to_string).collect())
    }

    /// Bind as `username` and work out its role. `None` when the directory rejects the
    /// credentials or does not know the user.
    async fn directory_login(&self, params: &GlobalParameters, username: &str, password: &str) -> Result<Option<Role>> {
        let mut session = self.connect(params).await?;
        let Some(dn) = self.resolve_dn(session.as_mut(), params, username).await? else {
            return Ok(None);
        };

        match session.simple_bind(&dn, password).await {
            Ok(()) => {}
            Err(DirectoryError::InvalidCredentials) => {
                debug!(%dn, "Directory rejected credentials");
                return Ok(None);
            }
            Err(e) => return Err(directory_failure("bind as LDAP user", e)),
        }

        let groups = self.user_groups(session.as_mut(), params, &dn, username).await?;
        if let Err(e) = session.unbind().await {
            debug!("LDAP unbind failed: {}", e);
        }

        let admin_groups = params.admin_groups();
        let role = if groups.iter().any(|g| admin_groups.iter().any(|a| a.eq_ignore_ascii_case(g))) {
            Role::DomainAdmin
        } else {
            Role::SimpleUser
        };
        Ok(Some(role))
    }

    /// Create or refresh the local copy of a directory user, with its domain and mailbox.
    #[instrument(skip(self), err)]
    async fn provision(&self, username: &str, role: Role) -> Result<UserDBResponse> {
        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        let user = Users::new(&mut tx).upsert_directory_user(username, username, role).await?;

        // Existing super administrators keep their role through the upsert
        if user.role == Role::SimpleUser {
            let Some((local, domain)) = split_address(username) else {
                return Err(Error::InvalidUsernameFormat {
                    username: username.to_string(),
                });
            };

            let domain = Domains::new(&mut tx).get_or_create(domain).await?;
            let mailbox = Mailboxes::new(&mut tx)
                .ensure(&MailboxCreateDBRequest {
                    address: local.to_string(),
                    domain_id: domain.id,
                    user_id: user.id,
                })
                .await?;
            debug!(mailbox = %mailbox.full_address(), "Mailbox ready");
        }

        tx.commit().await.map_err(DbError::from)?;
        Ok(user)
    }
}

#[async_trait]
impl AuthBackend for LdapBackend {
    fn name(&self) -> AuthSource {
        AuthSource::Ldap
    }

    #[instrument(skip(self, password), err)]
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserDBResponse>> {
        let params = self.parameters.get();
        if params.authentication_type != AuthenticationType::Ldap || password.is_empty() {
            return Ok(None);
        }

        let role = match self.directory_login(&params, username, password).await {
            Ok(Some(role)) => role,
            Ok(None) => return Ok(None),
            Err(e) => {
                error!("LDAP authentication failed, deferring to the next backend: {}", e);
                return Ok(None);
            }
        };

        let user = self.provision(username, role).await?;
        if !user.is_active {
            debug!(user_id = user.id, "Account is disabled");
            return Ok(None);
        }
        Ok(Some(user))
    }

    #[instrument(skip(self, old, new), err)]
    async fn update_password(&self, username: &str, old: &str, new: &str) -> Result<()> {
        let params = self.parameters.get();
        if params.authentication_type != AuthenticationType::Ldap {
            return Err(Error::Internal {
                operation: "update LDAP password: LDAP authentication is disabled".to_string(),
            });
        }

        let mut session = self.connect(&params).await?;
        let dn = self
            .resolve_dn(session.as_mut(), &params, username)
            .await?
            .ok_or_else(|| Error::Internal {
                operation: format!("update LDAP password: no directory entry for {username}"),
            })?;

        session
            .simple_bind(&dn, old)
            .await
            .map_err(|e| directory_failure("bind as LDAP user before password change", e))?;

        let hash = password::hash_string_blocking(new.to_string(), self.argon2).await?;
        session
            .modify_replace(&dn, &params.ldap_password_attribute, &format!("{PASSWORD_SCHEME}{hash}"))
            .await
            .map_err(|e| directory_failure("update LDAP password", e))?;

        if let Err(e) = session.unbind().await {
            debug!("LDAP unbind failed: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{handlers::Repository, models::users::UserUpdateDBRequest},
        parameters::LdapSecured,
        test_utils::{MemoryDirectory, create_test_config, create_test_user_with_password, directbind_parameters, ldap_parameters},
    };

    fn backend(pool: &SqlitePool, params: GlobalParameters, directory: MemoryDirectory) -> LdapBackend {
        LdapBackend::new(pool.clone(), SharedParameters::new(params), Arc::new(directory), &create_test_config())
    }

    async fn counts(pool: &SqlitePool) -> (i64, i64, i64) {
        let mut conn = pool.acquire().await.unwrap();
        let users = Users::new(&mut conn).count().await.unwrap();
        let domains = Domains::new(&mut conn).count().await.unwrap();
        let mailboxes = Mailboxes::new(&mut conn).count().await.unwrap();
        (users, domains, mailboxes)
    }

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("testuser@example.com"), Some(("testuser", "example.com")));
        for invalid in ["testuser", "@example.com", "user@", "user@localhost", "a@b@example.com", "user name@example.com"] {
            assert_eq!(split_address(invalid), None, "{invalid}");
        }
    }

    #[test]
    fn test_placeholders_are_escaped() {
        let params = ldap_parameters();
        assert_eq!(user_search_filter(&params, "testuser@example.com"), "(mail=testuser@example.com)");
        assert_eq!(user_search_filter(&params, "*)(uid=*"), "(mail=\\2a\\29\\28uid=\\2a)");

        let params = directbind_parameters();
        assert_eq!(user_dn(&params, "testuser"), "cn=testuser,ou=users,dc=example,dc=com");
        assert_ne!(user_dn(&params, "evil,dc=com"), "cn=evil,dc=com,ou=users,dc=example,dc=com");
    }

    #[test]
    fn test_group_filter() {
        let mut params = ldap_parameters();
        assert_eq!(
            group_filter(&params, "cn=mailadmin,ou=users,dc=example,dc=com", "mailadmin@example.com"),
            "(&(objectClass=groupOfNames)(member=cn=mailadmin,ou=users,dc=example,dc=com))"
        );
        params.ldap_group_type = LdapGroupType::PosixGroup;
        assert_eq!(
            group_filter(&params, "cn=mailadmin,ou=users,dc=example,dc=com", "mailadmin@example.com"),
            "(&(objectClass=posixGroup)(memberUid=mailadmin@example.com))"
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_declines_when_ldap_is_disabled(pool: SqlitePool) {
        // Never touches the directory
        let backend = backend(&pool, GlobalParameters::default(), MemoryDirectory::unavailable());
        assert!(backend.authenticate("testuser@example.com", "test").await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_searchbind_provisions_user_mailbox_and_domain(pool: SqlitePool) {
        let backend = backend(&pool, ldap_parameters(), MemoryDirectory::seeded());

        let user = backend.authenticate("testuser@example.com", "test").await.unwrap().unwrap();
        assert_eq!(user.username, "testuser@example.com");
        assert_eq!(user.email, "testuser@example.com");
        assert_eq!(user.role, Role::SimpleUser);
        assert_eq!(user.auth_source, AuthSource::Ldap);
        assert!(user.password_hash.is_none());

        let mut conn = pool.acquire().await.unwrap();
        let mailbox = Mailboxes::new(&mut conn).get_for_user(user.id).await.unwrap().unwrap();
        assert_eq!(mailbox.full_address(), "testuser@example.com");
        assert!(Domains::new(&mut conn).get_by_name("example.com").await.unwrap().is_some());
        drop(conn);
        assert_eq!(counts(&pool).await, (1, 1, 1));

        // Logging in again changes nothing
        let again = backend.authenticate("testuser@example.com", "test").await.unwrap().unwrap();
        assert_eq!(again.id, user.id);
        assert_eq!(counts(&pool).await, (1, 1, 1));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_wrong_password_declines(pool: SqlitePool) {
        let backend = backend(&pool, ldap_parameters(), MemoryDirectory::seeded());

        assert!(backend.authenticate("testuser@example.com", "wrong").await.unwrap().is_none());
        assert!(backend.authenticate("unknown@example.com", "test").await.unwrap().is_none());
        assert!(backend.authenticate("testuser@example.com", "").await.unwrap().is_none());
        assert_eq!(counts(&pool).await, (0, 0, 0));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_admin_group_members_become_domain_admins(pool: SqlitePool) {
        let backend = backend(&pool, ldap_parameters(), MemoryDirectory::seeded());

        let admin = backend.authenticate("mailadmin@example.com", "test").await.unwrap().unwrap();
        assert_eq!(admin.role, Role::DomainAdmin);

        let mut conn = pool.acquire().await.unwrap();
        assert!(Mailboxes::new(&mut conn).get_for_user(admin.id).await.unwrap().is_none());

        let user = backend.authenticate("testuser@example.com", "test").await.unwrap().unwrap();
        assert_eq!(user.role, Role::SimpleUser);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_posix_groups(pool: SqlitePool) {
        let mut params = ldap_parameters();
        params.ldap_group_type = LdapGroupType::PosixGroup;
        params.ldap_admin_groups = "posixadmins".to_string();
        let backend = backend(&pool, params, MemoryDirectory::seeded());

        let admin = backend.authenticate("mailadmin@example.com", "test").await.unwrap().unwrap();
        assert_eq!(admin.role, Role::DomainAdmin);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_role_is_refreshed_from_directory(pool: SqlitePool) {
        let directory = MemoryDirectory::seeded();
        let backend = backend(&pool, ldap_parameters(), directory.clone());

        let admin = backend.authenticate("mailadmin@example.com", "test").await.unwrap().unwrap();
        assert_eq!(admin.role, Role::DomainAdmin);

        directory.remove_attribute_value("cn=admins,ou=groups,dc=example,dc=com", "member", "cn=mailadmin,ou=users,dc=example,dc=com");
        let demoted = backend.authenticate("mailadmin@example.com", "test").await.unwrap().unwrap();
        assert_eq!(demoted.id, admin.id);
        assert_eq!(demoted.role, Role::SimpleUser);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_directbind_requires_email_username_for_simple_users(pool: SqlitePool) {
        let backend = backend(&pool, directbind_parameters(), MemoryDirectory::seeded());

        let err = backend.authenticate("testuser", "test").await.unwrap_err();
        assert!(matches!(err, Error::InvalidUsernameFormat { ref username } if username == "testuser"));
        assert_eq!(counts(&pool).await, (0, 0, 0));

        let admin = backend.authenticate("mailadmin", "test").await.unwrap().unwrap();
        assert_eq!(admin.username, "mailadmin");
        assert_eq!(admin.role, Role::DomainAdmin);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_super_admin_keeps_role(pool: SqlitePool) {
        let existing = create_test_user_with_password(&pool, "testuser@example.com", Role::SuperAdmin, "local").await;
        let backend = backend(&pool, ldap_parameters(), MemoryDirectory::seeded());

        let user = backend.authenticate("testuser@example.com", "test").await.unwrap().unwrap();
        assert_eq!(user.id, existing.id);
        assert_eq!(user.role, Role::SuperAdmin);
        assert_eq!(user.auth_source, AuthSource::Local);
        assert_eq!(counts(&pool).await, (1, 0, 0));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_connection_failure_declines(pool: SqlitePool) {
        let backend = backend(&pool, ldap_parameters(), MemoryDirectory::unavailable());
        assert!(backend.authenticate("testuser@example.com", "test").await.unwrap().is_none());
        assert_eq!(counts(&pool).await, (0, 0, 0));

        // Password changes still report the outage
        let err = backend.update_password("testuser@example.com", "test", "Toto1234").await.unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_bad_service_account_declines(pool: SqlitePool) {
        let mut params = ldap_parameters();
        params.ldap_bind_password = "wrong".to_string();
        let backend = backend(&pool, params, MemoryDirectory::seeded());

        assert!(backend.authenticate("testuser@example.com", "test").await.unwrap().is_none());
        assert_eq!(counts(&pool).await, (0, 0, 0));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_disabled_account_declines(pool: SqlitePool) {
        let backend = backend(&pool, ldap_parameters(), MemoryDirectory::seeded());
        let user = backend.authenticate("testuser@example.com", "test").await.unwrap().unwrap();

        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn)
            .update(
                user.id,
                &UserUpdateDBRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        drop(conn);

        assert!(backend.authenticate("testuser@example.com", "test").await.unwrap().is_none());
        // The directory entry is still valid, so nothing else changes
        assert_eq!(counts(&pool).await, (1, 1, 1));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_connection_settings_follow_parameters(pool: SqlitePool) {
        let directory = MemoryDirectory::seeded();
        let mut params = ldap_parameters();
        params.ldap_secured = LdapSecured::Ssl;
        params.ldap_server_port = 636;
        let backend = backend(&pool, params, directory.clone());

        backend.authenticate("testuser@example.com", "test").await.unwrap();
        assert_eq!(directory.last_url().as_deref(), Some("ldaps://localhost:636"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_password(pool: SqlitePool) {
        let directory = MemoryDirectory::seeded();
        let backend = backend(&pool, ldap_parameters(), directory.clone());
        backend.authenticate("testuser@example.com", "test").await.unwrap().unwrap();

        let err = backend.update_password("testuser@example.com", "wrong", "Toto1234").await.unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));

        backend.update_password("testuser@example.com", "test", "Toto1234").await.unwrap();
        let stored = directory
            .attribute("cn=testuser,ou=users,dc=example,dc=com", "userPassword")
            .unwrap();
        assert!(stored.starts_with("{ARGON2}$argon2id$"));

        assert!(backend.authenticate("testuser@example.com", "Toto1234").await.unwrap().is_some());
        assert!(backend.authenticate("testuser@example.com", "test").await.unwrap().is_none());

        // The local row never receives the directory password
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn).get_user_by_username("testuser@example.com").await.unwrap().unwrap();
        assert!(user.password_hash.is_none());
    }
}
