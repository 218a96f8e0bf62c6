//! Global parameters: process-wide settings administrators change at runtime.
//!
//! Parameters are persisted as `(name, value)` rows in the `global_parameters` table, parsed into
//! a typed [`GlobalParameters`] snapshot at startup and published through [`SharedParameters`].
//! Readers (the authentication backends, the public API job) take a cheap snapshot per call;
//! [`SharedParameters::update`] validates, persists and then swaps in a new snapshot.

use std::{fmt, str::FromStr, sync::Arc};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::db::{errors::DbError, handlers::Parameters};
use crate::errors::Error;

/// Placeholder substituted with the login name in filters and DN templates
pub const USER_PLACEHOLDER: &str = "%(user)s";

/// Shown instead of secret values.
pub const REDACTED_SECRET: &str = "********";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("unknown parameter '{0}'")]
    Unknown(String),
    #[error("invalid value '{value}' for parameter '{name}': {reason}")]
    InvalidValue { name: String, value: String, reason: String },
}

impl From<ParameterError> for Error {
    fn from(err: ParameterError) -> Self {
        Error::BadRequest { message: err.to_string() }
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("expected one of: {}", [$($text),+].join(", "))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Which identity source authenticates users
    AuthenticationType { Local => "local", Ldap => "ldap" }
);
string_enum!(
    /// How the directory connection is secured
    LdapSecured { None => "none", Ssl => "ssl", StartTls => "starttls" }
);
string_enum!(
    /// How a login name is turned into a directory entry
    LdapAuthMethod { SearchBind => "searchbind", DirectBind => "directbind" }
);
string_enum!(
    /// Schema of the group entries holding admin membership
    LdapGroupType { GroupOfNames => "groupofnames", PosixGroup => "posixgroup" }
);

/// Typed snapshot of every global parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GlobalParameters {
    pub authentication_type: AuthenticationType,
    pub ldap_server_address: String,
    pub ldap_server_port: u16,
    pub ldap_secured: LdapSecured,
    pub ldap_auth_method: LdapAuthMethod,
    pub ldap_bind_dn: String,
    pub ldap_bind_password: String,
    pub ldap_search_base: String,
    pub ldap_search_filter: String,
    pub ldap_user_dn_template: String,
    pub ldap_password_attribute: String,
    /// `;` separated group names whose members become domain administrators
    pub ldap_admin_groups: String,
    pub ldap_group_type: LdapGroupType,
    pub ldap_groups_search_base: String,
    pub enable_api_communication: bool,
    pub send_statistics: bool,
}

impl Default for GlobalParameters {
    fn default() -> Self {
        Self {
            authentication_type: AuthenticationType::Local,
            ldap_server_address: "localhost".to_string(),
            ldap_server_port: 389,
            ldap_secured: LdapSecured::None,
            ldap_auth_method: LdapAuthMethod::SearchBind,
            ldap_bind_dn: String::new(),
            ldap_bind_password: String::new(),
            ldap_search_base: String::new(),
            ldap_search_filter: "(mail=%(user)s)".to_string(),
            ldap_user_dn_template: String::new(),
            ldap_password_attribute: "userPassword".to_string(),
            ldap_admin_groups: String::new(),
            ldap_group_type: LdapGroupType::GroupOfNames,
            ldap_groups_search_base: String::new(),
            enable_api_communication: true,
            send_statistics: true,
        }
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, ParameterError>
where
    T::Err: fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ParameterError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ParameterError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ParameterError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

impl GlobalParameters {
    /// Names of all known parameters.
    pub const NAMES: &'static [&'static str] = &[
        "authentication_type",
        "ldap_server_address",
        "ldap_server_port",
        "ldap_secured",
        "ldap_auth_method",
        "ldap_bind_dn",
        "ldap_bind_password",
        "ldap_search_base",
        "ldap_search_filter",
        "ldap_user_dn_template",
        "ldap_password_attribute",
        "ldap_admin_groups",
        "ldap_group_type",
        "ldap_groups_search_base",
        "enable_api_communication",
        "send_statistics",
    ];

    /// Set one parameter from its stored text form.
    pub fn apply(&mut self, name: &str, value: &str) -> Result<(), ParameterError> {
        match name {
            "authentication_type" => self.authentication_type = parse(name, value)?,
            "ldap_server_address" => self.ldap_server_address = value.trim().to_string(),
            "ldap_server_port" => {
                let port: u16 = parse(name, value)?;
                if port == 0 {
                    return Err(ParameterError::InvalidValue {
                        name: name.to_string(),
                        value: value.to_string(),
                        reason: "port must be greater than zero".to_string(),
                    });
                }
                self.ldap_server_port = port;
            }
            "ldap_secured" => self.ldap_secured = parse(name, value)?,
            "ldap_auth_method" => self.ldap_auth_method = parse(name, value)?,
            "ldap_bind_dn" => self.ldap_bind_dn = value.trim().to_string(),
            "ldap_bind_password" => self.ldap_bind_password = value.to_string(),
            "ldap_search_base" => self.ldap_search_base = value.trim().to_string(),
            "ldap_search_filter" => self.ldap_search_filter = value.trim().to_string(),
            "ldap_user_dn_template" => self.ldap_user_dn_template = value.trim().to_string(),
            "ldap_password_attribute" => self.ldap_password_attribute = value.trim().to_string(),
            "ldap_admin_groups" => self.ldap_admin_groups = value.trim().to_string(),
            "ldap_group_type" => self.ldap_group_type = parse(name, value)?,
            "ldap_groups_search_base" => self.ldap_groups_search_base = value.trim().to_string(),
            "enable_api_communication" => self.enable_api_communication = parse_bool(name, value)?,
            "send_statistics" => self.send_statistics = parse_bool(name, value)?,
            _ => return Err(ParameterError::Unknown(name.to_string())),
        }
        Ok(())
    }

    /// Build a snapshot from stored rows. Unknown rows are skipped with a warning so an older
    /// binary can run against a newer database.
    pub fn from_rows(rows: &[(String, String)]) -> Result<Self, ParameterError> {
        let mut params = Self::default();
        for (name, value) in rows {
            match params.apply(name, value) {
                Err(ParameterError::Unknown(name)) => warn!(parameter = %name, "Ignoring unknown stored parameter"),
                other => other?,
            }
        }
        Ok(params)
    }

    /// Text form of every parameter, in [`Self::NAMES`] order.
    pub fn to_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("authentication_type", self.authentication_type.to_string()),
            ("ldap_server_address", self.ldap_server_address.clone()),
            ("ldap_server_port", self.ldap_server_port.to_string()),
            ("ldap_secured", self.ldap_secured.to_string()),
            ("ldap_auth_method", self.ldap_auth_method.to_string()),
            ("ldap_bind_dn", self.ldap_bind_dn.clone()),
            ("ldap_bind_password", self.ldap_bind_password.clone()),
            ("ldap_search_base", self.ldap_search_base.clone()),
            ("ldap_search_filter", self.ldap_search_filter.clone()),
            ("ldap_user_dn_template", self.ldap_user_dn_template.clone()),
            ("ldap_password_attribute", self.ldap_password_attribute.clone()),
            ("ldap_admin_groups", self.ldap_admin_groups.clone()),
            ("ldap_group_type", self.ldap_group_type.to_string()),
            ("ldap_groups_search_base", self.ldap_groups_search_base.clone()),
            ("enable_api_communication", self.enable_api_communication.to_string()),
            ("send_statistics", self.send_statistics.to_string()),
        ]
    }

    /// Admin group names, split on `;`.
    pub fn admin_groups(&self) -> Vec<&str> {
        self.ldap_admin_groups
            .split(';')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .collect()
    }

    /// Copy safe to show to administrators.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.ldap_bind_password.is_empty() {
            copy.ldap_bind_password = REDACTED_SECRET.to_string();
        }
        copy
    }
}

/// Shared, swappable handle on the current [`GlobalParameters`].
#[derive(Clone, Default)]
pub struct SharedParameters {
    current: Arc<ArcSwap<GlobalParameters>>,
}

impl fmt::Debug for SharedParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedParameters").field("current", &self.get().redacted()).finish()
    }
}

impl SharedParameters {
    pub fn new(params: GlobalParameters) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(params)),
        }
    }

    /// Load the stored parameters.
    #[instrument(skip_all, err)]
    pub async fn load(pool: &SqlitePool) -> Result<Self, Error> {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        let rows = Parameters::new(&mut conn).list().await?;
        let params = GlobalParameters::from_rows(&rows)?;
        Ok(Self::new(params))
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<GlobalParameters> {
        self.current.load_full()
    }

    /// Validate and persist `updates`, then publish the new snapshot. Nothing is stored when any
    /// update is invalid.
    #[instrument(skip_all, fields(count = updates.len()), err)]
    pub async fn update(&self, pool: &SqlitePool, updates: &[(String, String)]) -> Result<Arc<GlobalParameters>, Error> {
        let mut next = (*self.get()).clone();
        for (name, value) in updates {
            next.apply(name, value)?;
        }

        let mut tx = pool.begin().await.map_err(DbError::from)?;
        {
            let mut repo = Parameters::new(&mut tx);
            for (name, value) in updates {
                repo.set(name, value).await?;
            }
        }
        tx.commit().await.map_err(DbError::from)?;

        let next = Arc::new(next);
        self.current.store(next.clone());
        info!(names = ?updates.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(), "Global parameters updated");
        Ok(next)
    }
}
