//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `MXCTL_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `MXCTL_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `MXCTL_PUBLIC_API__URL=https://api.example.com/1/` sets the `public_api.url` field.
//!
//! Settings that administrators change at runtime (authentication type, directory server, ...)
//! are not part of this file; they are global parameters stored in the database, see
//! [`crate::parameters`].
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! MXCTL_PORT=8080
//! MXCTL_SECRET_KEY=change-me
//! DATABASE_URL="sqlite://mxctl.db"
//! MXCTL_AUTH__BACKENDS='[ldap, local]'
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// CLI args: the config file plus an optional management command
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "MXCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Management commands. Without one, the HTTP server is started.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Register this instance with the public API and fetch the latest published versions
    CommunicateWithPublicApi,
    /// Create the default administrator, the local configuration and the default parameters
    LoadInitialData {
        /// Username of the default super administrator
        #[arg(long)]
        admin_username: Option<String>,
    },
}

/// Main application configuration.
///
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Overrides `database.url` when set (usually through `DATABASE_URL`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
    /// Username of the default super administrator, created on startup
    pub admin_username: String,
    /// Password of the default super administrator
    pub admin_password: String,
    /// Secret key for JWT signing (required)
    pub secret_key: Option<String>,
    /// Hostname this instance registers under with the public API
    pub site_hostname: String,
    pub auth: AuthConfig,
    pub ldap: LdapConfig,
    pub public_api: PublicApiConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: None,
            database: DatabaseConfig::default(),
            admin_username: "admin".to_string(),
            admin_password: "password".to_string(),
            secret_key: None,
            site_hostname: "localhost".to_string(),
            auth: AuthConfig::default(),
            ldap: LdapConfig::default(),
            public_api: PublicApiConfig::default(),
            enable_otel_export: false,
        }
    }
}

/// SQLite database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection URL, e.g. `sqlite://mxctl.db`
    pub url: String,
    pub pool: PoolSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://mxctl.db".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

/// Connection pool parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
    /// Time before idle connections are closed (seconds, 0 = never)
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection (seconds, 0 = never)
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,  // 10 minutes
            max_lifetime_secs: 1800, // 30 minutes
        }
    }
}

/// Names of the authentication backends that can appear in `auth.backends`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ldap,
    Local,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Backends tried in order on login; the first one resolving the credentials wins
    pub backends: Vec<BackendKind>,
    /// Password validation rules
    pub password: PasswordConfig,
    /// Session cookie configuration
    pub session: SessionConfig,
    /// Security settings (JWT, CORS)
    pub security: SecurityConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backends: vec![BackendKind::Ldap, BackendKind::Local],
            password: PasswordConfig::default(),
            session: SessionConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Session timeout duration
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cookie name for session token
    pub cookie_name: String,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("strict", "lax", or "none")
    pub cookie_same_site: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(24 * 60 * 60),
            cookie_name: "mxctl_session".to_string(),
            cookie_secure: true,
            cookie_same_site: "lax".to_string(),
        }
    }
}

/// Password validation rules, applied when a user picks a new password.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub max_length: usize,
    pub require_digit: bool,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    /// Argon2 memory cost in KiB (default: 19456 KiB = 19 MB)
    pub argon2_memory_kib: u32,
    /// Argon2 iterations (default: 2)
    pub argon2_iterations: u32,
    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 64,
            require_digit: true,
            require_lowercase: true,
            require_uppercase: true,
            argon2_memory_kib: 19456,
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

/// Security configuration for JWT and CORS.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// JWT token expiry duration
    #[serde(with = "humantime_serde")]
    pub jwt_expiry: Duration,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_expiry: Duration::from_secs(24 * 60 * 60),
            cors: CorsConfig::default(),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

/// A single allowed CORS origin: either `*` or a URL.
#[derive(Debug, Clone, PartialEq)]
pub enum CorsOrigin {
    Wildcard,
    Url(Url),
}

impl Serialize for CorsOrigin {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CorsOrigin::Wildcard => serializer.serialize_str("*"),
            CorsOrigin::Url(url) => serializer.serialize_str(url.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for CorsOrigin {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "*" {
            Ok(CorsOrigin::Wildcard)
        } else {
            Url::parse(&s).map(CorsOrigin::Url).map_err(serde::de::Error::custom)
        }
    }
}

/// Directory connection settings that do not belong in the global parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LdapConfig {
    /// Timeout for establishing a directory connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Public API synchronization settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublicApiConfig {
    /// Base URL of the public API
    pub url: Url,
    /// Timeout for each request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Run the synchronization periodically from the server; disabled when unset
    #[serde(with = "humantime_serde")]
    pub sync_interval: Option<Duration>,
}

impl Default for PublicApiConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("https://api.modoboa.org/1/").expect("static URL is valid"),
            timeout: Duration::from_secs(30),
            sync_interval: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.secret_key.is_none() {
            return Err(Error::Internal {
                operation: "Config validation: secret_key is not configured. \
                     Please set MXCTL_SECRET_KEY environment variable or add secret_key to config file."
                    .to_string(),
            });
        }

        if self.auth.backends.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: No authentication backends configured in auth.backends".to_string(),
            });
        }

        let password = &self.auth.password;
        if password.min_length > password.max_length {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: Invalid password configuration: min_length ({}) cannot be greater than max_length ({})",
                    password.min_length, password.max_length
                ),
            });
        }

        let jwt_expiry = self.auth.security.jwt_expiry;
        if jwt_expiry < Duration::from_secs(5 * 60) || jwt_expiry > Duration::from_secs(30 * 24 * 60 * 60) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: auth.security.jwt_expiry ({}s) must be between 5 minutes and 30 days",
                    jwt_expiry.as_secs()
                ),
            });
        }

        let cors = &self.auth.security.cors;
        if cors.allow_credentials && cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
            return Err(Error::Internal {
                operation: "Config validation: CORS wildcard origin cannot be combined with allow_credentials".to_string(),
            });
        }

        if matches!(self.public_api.sync_interval, Some(interval) if interval.is_zero()) {
            return Err(Error::Internal {
                operation: "Config validation: public_api.sync_interval must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("MXCTL_").ignore(&["CONFIG"]).split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
