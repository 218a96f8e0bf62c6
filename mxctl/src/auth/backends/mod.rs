//! Pluggable authentication backends.
//!
//! A [`BackendChain`] asks each configured [`AuthBackend`] in turn. A backend answers
//! `Ok(Some(user))` when it owns and accepts the credentials, `Ok(None)` to let the next one
//! try, and `Err(_)` for failures that must stop the login (a username the provisioning
//! rules reject, a broken database). An unreachable directory is a decline.

pub mod ldap;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::directory::Directory,
    config::{BackendKind, Config},
    db::{errors::DbError, handlers::Users, models::users::{AuthSource, UserDBResponse}},
    errors::{Error, Result},
    parameters::SharedParameters,
};

pub use ldap::LdapBackend;
pub use local::LocalBackend;

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The credential owner this backend stands for.
    fn name(&self) -> AuthSource;

    /// Resolve credentials to a local user, provisioning it when the backend does so.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserDBResponse>>;

    /// Replace the password of `username`, proving knowledge of `old` first.
    async fn update_password(&self, username: &str, old: &str, new: &str) -> Result<()>;
}

/// Ordered list of backends consulted at login.
#[derive(Clone)]
pub struct BackendChain {
    backends: Vec<Arc<dyn AuthBackend>>,
    db: SqlitePool,
}

impl std::fmt::Debug for BackendChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("BackendChain").field("backends", &names).finish()
    }
}

impl BackendChain {
    pub fn new(backends: Vec<Arc<dyn AuthBackend>>, db: SqlitePool) -> Self {
        Self { backends, db }
    }

    /// Build the chain listed in `config.auth.backends`.
    pub fn from_config(config: &Config, db: SqlitePool, parameters: SharedParameters, directory: Arc<dyn Directory>) -> Self {
        let backends = config
            .auth
            .backends
            .iter()
            .map(|kind| -> Arc<dyn AuthBackend> {
                match kind {
                    BackendKind::Ldap => Arc::new(LdapBackend::new(db.clone(), parameters.clone(), directory.clone(), config)),
                    BackendKind::Local => Arc::new(LocalBackend::new(db.clone(), config)),
                }
            })
            .collect();
        Self::new(backends, db)
    }

    /// First backend to accept the credentials wins. The user's last login is recorded.
    #[instrument(skip(self, password), err)]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<UserDBResponse> {
        for backend in &self.backends {
            match backend.authenticate(username, password).await? {
                Some(user) => {
                    let mut conn = self.db.acquire().await.map_err(DbError::from)?;
                    Users::new(&mut conn).record_login(user.id).await?;
                    info!(user_id = user.id, backend = backend.name().as_str(), "User authenticated");
                    return Ok(user);
                }
                None => debug!(backend = backend.name().as_str(), "Backend declined credentials"),
            }
        }

        Err(Error::Unauthenticated {
            message: Some("Invalid username or password".to_string()),
        })
    }

    /// The backend owning the credentials of a user, if it is part of the chain.
    pub fn backend_for(&self, auth_source: AuthSource) -> Option<Arc<dyn AuthBackend>> {
        self.backends.iter().find(|b| b.name() == auth_source).cloned()
    }
}

/// Set the password of `username` to `new` when its current value is one of `candidates`.
///
/// Candidates are tried in order; the error of the last one is returned when none is
/// accepted.
#[instrument(skip(backend, candidates, new), fields(backend = backend.name().as_str(), candidates = candidates.len()), err)]
pub async fn restore_password(backend: &dyn AuthBackend, username: &str, candidates: &[&str], new: &str) -> Result<()> {
    let mut last_error = Error::BadRequest {
        message: "No candidate password given".to_string(),
    };
    for (attempt, old) in candidates.iter().enumerate() {
        match backend.update_password(username, old, new).await {
            Ok(()) => {
                debug!(attempt, "Password restored");
                return Ok(());
            }
            Err(e) => {
                warn!(attempt, "Candidate password rejected: {}", e);
                last_error = e;
            }
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::Role,
        db::handlers::Repository,
        parameters::GlobalParameters,
        test_utils::{MemoryDirectory, create_test_config, create_test_user_with_password, ldap_parameters},
    };

    fn chain(pool: &SqlitePool, params: GlobalParameters, directory: MemoryDirectory) -> BackendChain {
        BackendChain::from_config(
            &create_test_config(),
            pool.clone(),
            SharedParameters::new(params),
            Arc::new(directory),
        )
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_local_user_authenticates_through_chain(pool: SqlitePool) {
        let user = create_test_user_with_password(&pool, "admin", Role::SuperAdmin, "password").await;
        let chain = chain(&pool, GlobalParameters::default(), MemoryDirectory::seeded());

        let authenticated = chain.authenticate("admin", "password").await.unwrap();
        assert_eq!(authenticated.id, user.id);

        let mut conn = pool.acquire().await.unwrap();
        let reloaded = Users::new(&mut conn).get_by_id(user.id).await.unwrap().unwrap();
        assert!(reloaded.last_login.is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_every_backend_declining_is_unauthenticated(pool: SqlitePool) {
        create_test_user_with_password(&pool, "admin", Role::SuperAdmin, "password").await;
        let chain = chain(&pool, ldap_parameters(), MemoryDirectory::seeded());

        let err = chain.authenticate("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));

        let err = chain.authenticate("nobody@example.com", "test").await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_ldap_is_tried_before_local(pool: SqlitePool) {
        let chain = chain(&pool, ldap_parameters(), MemoryDirectory::seeded());

        let user = chain.authenticate("testuser@example.com", "test").await.unwrap();
        assert_eq!(user.auth_source, AuthSource::Ldap);

        // The local admin still gets in once the directory declines
        create_test_user_with_password(&pool, "admin", Role::SuperAdmin, "password").await;
        let admin = chain.authenticate("admin", "password").await.unwrap();
        assert_eq!(admin.auth_source, AuthSource::Local);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unreachable_directory_falls_through_to_local(pool: SqlitePool) {
        let admin = create_test_user_with_password(&pool, "admin", Role::SuperAdmin, "password").await;
        let chain = chain(&pool, ldap_parameters(), MemoryDirectory::unavailable());

        let authenticated = chain.authenticate("admin", "password").await.unwrap();
        assert_eq!(authenticated.id, admin.id);

        let err = chain.authenticate("testuser@example.com", "test").await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invalid_username_stops_the_chain(pool: SqlitePool) {
        let chain = chain(&pool, crate::test_utils::directbind_parameters(), MemoryDirectory::seeded());

        let err = chain.authenticate("testuser", "test").await.unwrap_err();
        assert!(matches!(err, Error::InvalidUsernameFormat { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_restore_password_tries_candidates_in_order(pool: SqlitePool) {
        let directory = MemoryDirectory::seeded();
        let chain = chain(&pool, ldap_parameters(), directory.clone());
        let ldap = chain.backend_for(AuthSource::Ldap).unwrap();

        // The first candidate is rejected by the directory, the second is current
        restore_password(ldap.as_ref(), "testuser@example.com", &["Toto1234", "test"], "Test1234")
            .await
            .unwrap();

        let user = chain.authenticate("testuser@example.com", "Test1234").await.unwrap();
        assert_eq!(user.auth_source, AuthSource::Ldap);
        assert!(chain.authenticate("testuser@example.com", "test").await.is_err());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_restore_password_fails_when_no_candidate_matches(pool: SqlitePool) {
        let chain = chain(&pool, ldap_parameters(), MemoryDirectory::seeded());
        let ldap = chain.backend_for(AuthSource::Ldap).unwrap();

        let err = restore_password(ldap.as_ref(), "testuser@example.com", &["Toto1234", "wrong"], "Test1234")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));

        // The directory password is untouched
        assert!(chain.authenticate("testuser@example.com", "test").await.is_ok());

        let err = restore_password(ldap.as_ref(), "testuser@example.com", &[], "Test1234").await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[sqlx::test]
    async fn test_backend_for(pool: SqlitePool) {
        let chain = chain(&pool, GlobalParameters::default(), MemoryDirectory::seeded());
        assert_eq!(chain.backend_for(AuthSource::Ldap).unwrap().name(), AuthSource::Ldap);
        assert_eq!(chain.backend_for(AuthSource::Local).unwrap().name(), AuthSource::Local);

        let local_only = BackendChain::new(vec![Arc::new(LocalBackend::new(pool.clone(), &create_test_config()))], pool);
        assert!(local_only.backend_for(AuthSource::Ldap).is_none());
    }
}
