//! Test utilities: configuration, fixtures, an in-memory directory and a mocked public API.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum_test::TestServer;
use sqlx::SqlitePool;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use crate::{
    AppState, Application, BackgroundServices,
    api::models::users::Role,
    auth::{
        backends::BackendChain,
        directory::{Directory, DirectoryEntry, DirectoryError, DirectorySession, LdapSettings},
        password::{self, Argon2Params},
    },
    config::{AuthConfig, Config, PasswordConfig, SessionConfig},
    db::{
        handlers::{Parameters, Repository, Users},
        models::users::{AuthSource, UserCreateDBRequest, UserDBResponse},
    },
    parameters::{GlobalParameters, LdapAuthMethod, LdapGroupType, SharedParameters},
};

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        site_hostname: "mail.example.com".to_string(),
        auth: AuthConfig {
            password: PasswordConfig {
                // Cheap hashes keep the suite fast
                argon2_memory_kib: 128,
                argon2_iterations: 1,
                ..Default::default()
            },
            session: SessionConfig {
                cookie_secure: false,
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

/// State for extractor tests, with default parameters and the seeded directory.
pub fn create_test_state(pool: SqlitePool) -> AppState {
    let config = create_test_config();
    let parameters = SharedParameters::default();
    let backends = BackendChain::from_config(&config, pool.clone(), parameters.clone(), Arc::new(MemoryDirectory::seeded()));

    AppState::builder()
        .db(pool)
        .config(config)
        .parameters(parameters)
        .backends(Arc::new(backends))
        .build()
}

pub async fn create_test_app(pool: SqlitePool) -> (TestServer, BackgroundServices) {
    create_test_app_with_parameters(pool, GlobalParameters::default()).await
}

pub async fn create_test_app_with_parameters(pool: SqlitePool, params: GlobalParameters) -> (TestServer, BackgroundServices) {
    create_test_app_with_directory(pool, params, MemoryDirectory::seeded()).await
}

/// Full application with `params` stored as the global parameters. Initial data is loaded, so
/// `admin` / `password` exists.
pub async fn create_test_app_with_directory(
    pool: SqlitePool,
    params: GlobalParameters,
    directory: MemoryDirectory,
) -> (TestServer, BackgroundServices) {
    {
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut repo = Parameters::new(&mut conn);
        for (name, value) in params.to_rows() {
            repo.set(name, &value).await.expect("Failed to store parameter");
        }
    }

    let app = Application::new_with_pool(create_test_config(), pool, Arc::new(directory))
        .await
        .expect("Failed to create application");
    app.into_test_server()
}

pub async fn create_test_user_with_password(pool: &SqlitePool, username: &str, role: Role, password: &str) -> UserDBResponse {
    let params = Argon2Params::from(&create_test_config().auth.password);
    let password_hash = password::hash_string_with_params(password, Some(params)).expect("Failed to hash password");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            username: username.to_string(),
            email: username.to_string(),
            role,
            auth_source: AuthSource::Local,
            password_hash: Some(password_hash),
            language: None,
        })
        .await
        .expect("Failed to create test user")
}

/// Log in through the HTTP API and return the `name=value` session cookie pair.
pub async fn login(server: &TestServer, username: &str, password: &str) -> String {
    let response = server
        .post("/accounts/login/")
        .form(&[("username", username), ("password", password)])
        .await;
    response.assert_status(axum::http::StatusCode::SEE_OTHER);

    let set_cookie = response.headers()["set-cookie"].to_str().expect("Invalid cookie header");
    set_cookie.split(';').next().expect("Empty cookie header").to_string()
}

/// Search-and-bind against [`MemoryDirectory::seeded`].
pub fn ldap_parameters() -> GlobalParameters {
    GlobalParameters {
        authentication_type: crate::parameters::AuthenticationType::Ldap,
        ldap_server_address: "localhost".to_string(),
        ldap_server_port: 389,
        ldap_auth_method: LdapAuthMethod::SearchBind,
        ldap_bind_dn: "cn=admin,dc=example,dc=com".to_string(),
        ldap_bind_password: "test".to_string(),
        ldap_search_base: "ou=users,dc=example,dc=com".to_string(),
        ldap_search_filter: "(mail=%(user)s)".to_string(),
        ldap_admin_groups: "admins".to_string(),
        ldap_group_type: LdapGroupType::GroupOfNames,
        ldap_groups_search_base: "ou=groups,dc=example,dc=com".to_string(),
        ..Default::default()
    }
}

/// Direct bind against [`MemoryDirectory::seeded`].
pub fn directbind_parameters() -> GlobalParameters {
    GlobalParameters {
        ldap_auth_method: LdapAuthMethod::DirectBind,
        ldap_user_dn_template: "cn=%(user)s,ou=users,dc=example,dc=com".to_string(),
        ..ldap_parameters()
    }
}

/// Public API answering every call: instance `100`, latest version `9.0.0`.
pub async fn mock_public_api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/instances/search/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"pk": 100})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/instances/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"pk": 100})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/instances/100/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/versions/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"name": "mxctl", "version": "9.0.0", "url": "https://example.com/mxctl/9.0.0/"},
            {"name": "webmail", "version": "1.2.0", "url": "https://example.com/webmail/1.2.0/"},
        ])))
        .mount(&server)
        .await;
    server
}

// In-memory directory

#[derive(Debug)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Present(String),
}

fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 2 < bytes.len()
            && let Some(byte) = std::str::from_utf8(&bytes[i + 1..i + 3]).ok().and_then(|hex| u8::from_str_radix(hex, 16).ok())
        {
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse one parenthesized filter, returning it with the unparsed remainder.
fn parse_filter(input: &str) -> Option<(Filter, &str)> {
    let rest = input.strip_prefix('(')?;
    match rest.chars().next()? {
        op @ ('&' | '|') => {
            let mut rest = &rest[1..];
            let mut items = Vec::new();
            while rest.starts_with('(') {
                let (item, remainder) = parse_filter(rest)?;
                items.push(item);
                rest = remainder;
            }
            let rest = rest.strip_prefix(')')?;
            Some((if op == '&' { Filter::And(items) } else { Filter::Or(items) }, rest))
        }
        '!' => {
            let (inner, rest) = parse_filter(&rest[1..])?;
            Some((Filter::Not(Box::new(inner)), rest.strip_prefix(')')?))
        }
        _ => {
            let end = rest.find(')')?;
            let (attr, value) = rest[..end].split_once('=')?;
            let filter = if value == "*" {
                Filter::Present(attr.to_string())
            } else {
                Filter::Equal(attr.to_string(), unescape(value))
            };
            Some((filter, &rest[end + 1..]))
        }
    }
}

fn values<'a>(entry: &'a DirectoryEntry, attr: &str) -> Option<&'a Vec<String>> {
    entry.attrs.iter().find(|(name, _)| name.eq_ignore_ascii_case(attr)).map(|(_, v)| v)
}

fn matches(filter: &Filter, entry: &DirectoryEntry) -> bool {
    match filter {
        Filter::And(items) => items.iter().all(|f| matches(f, entry)),
        Filter::Or(items) => items.iter().any(|f| matches(f, entry)),
        Filter::Not(inner) => !matches(inner, entry),
        Filter::Present(attr) => values(entry, attr).is_some_and(|v| !v.is_empty()),
        Filter::Equal(attr, value) => values(entry, attr).is_some_and(|v| v.iter().any(|x| x.eq_ignore_ascii_case(value))),
    }
}

fn password_matches(stored: &str, password: &str) -> bool {
    match stored.strip_prefix("{ARGON2}") {
        Some(hash) => password::verify_string(password, hash).unwrap_or(false),
        None => stored == password,
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    /// Keyed by lowercased DN
    entries: HashMap<String, DirectoryEntry>,
    unavailable: bool,
    last_url: Option<String>,
}

/// [`Directory`] holding its entries in memory. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MemoryDirectory {
    /// Service account, two users and one group of each supported type, all passwords `test`:
    ///
    /// - `cn=admin,dc=example,dc=com`
    /// - `cn=testuser,ou=users,dc=example,dc=com` (`testuser@example.com`)
    /// - `cn=mailadmin,ou=users,dc=example,dc=com` (`mailadmin@example.com`), member of
    ///   `cn=admins` (groupOfNames) and `cn=posixadmins` (posixGroup)
    pub fn seeded() -> Self {
        let directory = Self::default();
        directory.add_entry("cn=admin,dc=example,dc=com", &[("cn", "admin"), ("userPassword", "test")]);
        for name in ["testuser", "mailadmin"] {
            directory.add_entry(
                &format!("cn={name},ou=users,dc=example,dc=com"),
                &[
                    ("objectClass", "inetOrgPerson"),
                    ("cn", name),
                    ("mail", &format!("{name}@example.com")),
                    ("userPassword", "test"),
                ],
            );
        }
        directory.add_entry(
            "cn=admins,ou=groups,dc=example,dc=com",
            &[
                ("objectClass", "groupOfNames"),
                ("cn", "admins"),
                ("member", "cn=mailadmin,ou=users,dc=example,dc=com"),
            ],
        );
        directory.add_entry(
            "cn=posixadmins,ou=groups,dc=example,dc=com",
            &[
                ("objectClass", "posixGroup"),
                ("cn", "posixadmins"),
                ("memberUid", "mailadmin@example.com"),
            ],
        );
        directory
    }

    /// A directory that refuses every connection.
    pub fn unavailable() -> Self {
        let directory = Self::default();
        directory.state.lock().unwrap().unavailable = true;
        directory
    }

    pub fn add_entry(&self, dn: &str, attrs: &[(&str, &str)]) {
        let mut entry = DirectoryEntry {
            dn: dn.to_string(),
            attrs: HashMap::new(),
        };
        for (name, value) in attrs {
            entry.attrs.entry(name.to_string()).or_default().push(value.to_string());
        }
        self.state.lock().unwrap().entries.insert(dn.to_lowercase(), entry);
    }

    pub fn remove_attribute_value(&self, dn: &str, attr: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(&dn.to_lowercase()) {
            for (_, values) in entry.attrs.iter_mut().filter(|(name, _)| name.eq_ignore_ascii_case(attr)) {
                values.retain(|v| !v.eq_ignore_ascii_case(value));
            }
        }
    }

    /// First value of `attr` on `dn`.
    pub fn attribute(&self, dn: &str, attr: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.entries.get(&dn.to_lowercase())?.first(attr).map(str::to_string)
    }

    /// URL of the most recent connection attempt.
    pub fn last_url(&self) -> Option<String> {
        self.state.lock().unwrap().last_url.clone()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn connect(&self, settings: &LdapSettings) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let mut state = self.state.lock().unwrap();
        state.last_url = Some(settings.url());
        if state.unavailable {
            return Err(DirectoryError::Connection(format!("{}: connection refused", settings.url())));
        }
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            bound_dn: None,
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<DirectoryState>>,
    bound_dn: Option<String>,
}

#[async_trait]
impl DirectorySession for MemorySession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        let accepted = !password.is_empty() && {
            let state = self.state.lock().unwrap();
            state
                .entries
                .get(&dn.to_lowercase())
                .and_then(|entry| values(entry, "userPassword"))
                .is_some_and(|stored| stored.iter().any(|s| password_matches(s, password)))
        };

        if accepted {
            self.bound_dn = Some(dn.to_lowercase());
            Ok(())
        } else {
            self.bound_dn = None;
            Err(DirectoryError::InvalidCredentials)
        }
    }

    async fn search(&mut self, base: &str, filter: &str, _attrs: &[&str]) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let (filter, rest) = parse_filter(filter).ok_or_else(|| DirectoryError::Operation(format!("bad search filter: {filter}")))?;
        if !rest.is_empty() {
            return Err(DirectoryError::Operation("trailing characters in search filter".to_string()));
        }

        let base = base.to_lowercase();
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|(dn, _)| dn.ends_with(&base))
            .map(|(_, entry)| entry)
            .filter(|entry| matches(&filter, entry))
            .cloned()
            .collect())
    }

    async fn modify_replace(&mut self, dn: &str, attr: &str, value: &str) -> Result<(), DirectoryError> {
        if self.bound_dn.is_none() {
            return Err(DirectoryError::Operation("insufficient access rights".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        let entry = state
            .entries
            .get_mut(&dn.to_lowercase())
            .ok_or_else(|| DirectoryError::Operation(format!("no such object: {dn}")))?;

        entry.attrs.retain(|name, _| !name.eq_ignore_ascii_case(attr));
        entry.attrs.insert(attr.to_string(), vec![value.to_string()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parsing() {
        let directory = MemoryDirectory::seeded();
        let state = directory.state.lock().unwrap();
        let testuser = &state.entries["cn=testuser,ou=users,dc=example,dc=com"];

        for (filter, expected) in [
            ("(mail=testuser@example.com)", true),
            ("(MAIL=TestUser@Example.com)", true),
            ("(&(objectClass=inetOrgPerson)(cn=testuser))", true),
            ("(|(cn=nobody)(cn=testuser))", true),
            ("(!(cn=testuser))", false),
            ("(mail=*)", true),
            ("(mail=\\2a)", false),
        ] {
            let (parsed, rest) = parse_filter(filter).unwrap();
            assert!(rest.is_empty());
            assert_eq!(matches(&parsed, testuser), expected, "{filter}");
        }
        assert!(parse_filter("(mail=x").is_none());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("\\2a\\29\\28uid=\\2a"), "*)(uid=*");
        assert_eq!(unescape("plain"), "plain");
    }
}
