//! Access to an LDAP directory.
//!
//! [`Directory`] opens sessions against the server described by the current global parameters.
//! [`LdapDirectory`] speaks LDAP through `ldap3`; tests swap in an in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::parameters::{GlobalParameters, LdapSecured};

/// LDAP result code for a rejected bind.
const INVALID_CREDENTIALS: u32 = 49;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("directory unreachable: {0}")]
    Connection(String),
    #[error("directory operation failed: {0}")]
    Operation(String),
}

/// Where and how to reach the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapSettings {
    pub address: String,
    pub port: u16,
    pub secured: LdapSecured,
    pub connect_timeout: Duration,
}

impl LdapSettings {
    pub fn from_parameters(params: &GlobalParameters, connect_timeout: Duration) -> Self {
        Self {
            address: params.ldap_server_address.clone(),
            port: params.ldap_server_port,
            secured: params.ldap_secured,
            connect_timeout,
        }
    }

    pub fn url(&self) -> String {
        let scheme = match self.secured {
            LdapSecured::Ssl => "ldaps",
            LdapSecured::None | LdapSecured::StartTls => "ldap",
        };
        format!("{scheme}://{}:{}", self.address, self.port)
    }
}

/// An entry returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// First value of an attribute, compared case-insensitively on the name.
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn connect(&self, settings: &LdapSettings) -> Result<Box<dyn DirectorySession>, DirectoryError>;
}

/// One connection to the directory. Binds change the identity used by later operations.
#[async_trait]
pub trait DirectorySession: Send {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryError>;

    /// Subtree search under `base`.
    async fn search(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Replace every value of `attr` on `dn` with `value`.
    async fn modify_replace(&mut self, dn: &str, attr: &str, value: &str) -> Result<(), DirectoryError>;

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        Ok(())
    }
}

/// [`Directory`] backed by a real LDAP server.
#[derive(Debug, Clone, Default)]
pub struct LdapDirectory;

#[async_trait]
impl Directory for LdapDirectory {
    #[instrument(skip_all, fields(url = %settings.url()))]
    async fn connect(&self, settings: &LdapSettings) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(settings.connect_timeout)
            .set_starttls(settings.secured == LdapSecured::StartTls);

        let (conn, ldap) = LdapConnAsync::with_settings(conn_settings, &settings.url())
            .await
            .map_err(|e| DirectoryError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                error!("LDAP connection driver error: {}", e);
            }
        });

        debug!("Connected to LDAP server");
        Ok(Box::new(LdapSession { ldap }))
    }
}

struct LdapSession {
    ldap: ldap3::Ldap,
}

fn operation_error(e: LdapError) -> DirectoryError {
    match &e {
        LdapError::LdapResult { result } if result.rc == INVALID_CREDENTIALS => DirectoryError::InvalidCredentials,
        LdapError::Io { .. } | LdapError::EndOfStream => DirectoryError::Connection(e.to_string()),
        _ => DirectoryError::Operation(e.to_string()),
    }
}

#[async_trait]
impl DirectorySession for LdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        // An empty password would be an unauthenticated bind, which servers accept
        if password.is_empty() {
            return Err(DirectoryError::InvalidCredentials);
        }
        self.ldap
            .simple_bind(dn, password)
            .await
            .and_then(|r| r.success())
            .map_err(operation_error)?;
        Ok(())
    }

    async fn search(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let (entries, _) = self
            .ldap
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .await
            .and_then(|r| r.success())
            .map_err(operation_error)?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attrs: entry.attrs,
            })
            .collect())
    }

    async fn modify_replace(&mut self, dn: &str, attr: &str, value: &str) -> Result<(), DirectoryError> {
        self.ldap
            .modify(dn, vec![Mod::Replace(attr, HashSet::from([value]))])
            .await
            .and_then(|r| r.success())
            .map_err(operation_error)?;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.ldap.unbind().await.map_err(operation_error)
    }
}
