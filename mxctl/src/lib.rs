//! # mxctl: accounts and authentication for a mail hosting administration platform
//!
//! `mxctl` authenticates the administrators and mailbox owners of a mail hosting platform and
//! keeps the bits of account state the rest of the platform relies on.
//!
//! ## Overview
//!
//! Users log in with a username and password. The credentials are checked by an ordered chain
//! of backends ([`auth::backends`]): an LDAP directory, when the global parameters enable it, and
//! the local user table. A directory login provisions the local copy of the user, and for simple
//! users also their mail domain and mailbox, so the rest of the platform only ever deals with
//! local records. Membership of configured directory groups makes a user a domain administrator.
//!
//! A successful login sets a signed session cookie and redirects to the landing page of the
//! user's role. Administrators may enable an API token and use it instead of the cookie.
//!
//! Next to the HTTP API the service periodically reports to the public API, which assigns the
//! instance an id and publishes the latest released versions shown on the information page.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); persistence is SQLite through
//! `sqlx` ([`db`]). Settings fixed at deployment time come from a YAML file and the environment
//! ([`config`]); settings administrators change at runtime are global parameters stored in the
//! database ([`parameters`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use mxctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = mxctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     mxctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
mod crypto;
pub mod db;
pub mod errors;
mod openapi;
pub mod parameters;
pub mod sync;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::models::users::Role,
    auth::{
        backends::BackendChain,
        directory::{Directory, LdapDirectory},
        password::{self, Argon2Params},
    },
    config::{CorsOrigin, PasswordConfig},
    db::{
        errors::DbError,
        handlers::{LocalConfigs, Parameters, Repository, Users},
        models::users::{AuthSource, UserCreateDBRequest},
    },
    openapi::ApiDoc,
    parameters::{GlobalParameters, SharedParameters},
    sync::{PublicApi, PublicApiReqwest},
};
pub use config::Config;
pub use types::UserId;

/// Shared by every request handler.
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    /// Current global parameters
    pub parameters: SharedParameters,
    /// Authentication backends, in the order they are tried
    pub backends: Arc<BackendChain>,
}

/// Get the mxctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// What [`load_initial_data`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialData {
    pub admin_id: UserId,
    pub admin_created: bool,
}

/// Create the default super administrator, the local configuration and the default global
/// parameters, whichever are missing.
///
/// An existing administrator account is left untouched, so running this again never resets a
/// password that has been changed since.
#[instrument(skip(pool, admin_password, password_config), err)]
pub async fn load_initial_data(
    pool: &SqlitePool,
    admin_username: &str,
    admin_password: &str,
    password_config: &PasswordConfig,
) -> anyhow::Result<InitialData> {
    let password_hash = password::hash_string_blocking(admin_password.to_string(), Argon2Params::from(password_config)).await?;

    let mut tx = pool.begin().await?;

    let existing = Users::new(&mut tx).get_user_by_username(admin_username).await?;
    let (admin_id, admin_created) = match existing {
        Some(user) => (user.id, false),
        None => {
            let user = Users::new(&mut tx)
                .create(&UserCreateDBRequest {
                    username: admin_username.to_string(),
                    email: String::new(),
                    role: Role::SuperAdmin,
                    auth_source: AuthSource::Local,
                    password_hash: Some(password_hash),
                    language: None,
                })
                .await?;
            info!(username = admin_username, "Default super administrator created");
            (user.id, true)
        }
    };

    LocalConfigs::new(&mut tx).ensure().await?;

    {
        let defaults = GlobalParameters::default();
        let mut repo = Parameters::new(&mut tx);
        for (name, value) in defaults.to_rows() {
            repo.set_default(name, &value).await?;
        }
    }

    tx.commit().await?;
    Ok(InitialData { admin_id, admin_created })
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the router: pages, account endpoints, administration, health and API docs.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    use api::handlers::{api_access, auth, information, pages, parameters, profile};

    let cors_layer = create_cors_layer(&state.config)?;

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        // Accounts
        .route(auth::LOGIN_PAGE, post(auth::login))
        .route("/accounts/logout/", get(auth::logout).post(auth::logout))
        // Landing pages
        .route("/user/", get(pages::user_index))
        .route("/dashboard/", get(pages::dashboard))
        // Current user settings
        .route("/user/profile/", get(profile::get_profile).post(profile::update_profile))
        .route("/user/api-access/", get(api_access::get_api_access).post(api_access::update_api_access))
        // Administration
        .route("/admin/information/", get(information::information))
        .route("/admin/parameters/", get(parameters::get_parameters).put(parameters::update_parameters))
        .with_state(state)
        .route("/api-docs/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(cors_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Tasks running next to the HTTP server. Dropping this cancels them.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Cancel every task and wait for them to finish
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Start the periodic public API synchronization when `public_api.sync_interval` is set.
fn setup_background_services(
    pool: SqlitePool,
    config: &Config,
    parameters: SharedParameters,
    shutdown_token: CancellationToken,
) -> anyhow::Result<BackgroundServices> {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if let Some(interval) = config.public_api.sync_interval {
        let api: Arc<dyn PublicApi> = Arc::new(PublicApiReqwest::new(&config.public_api)?);
        let handle = tokio::spawn(sync::run_periodic_sync(
            pool,
            parameters,
            api,
            config.site_hostname.clone(),
            interval,
            shutdown_token.clone(),
        ));
        background_tasks.push(handle);
    } else {
        debug!("Periodic public API synchronization disabled");
    }

    Ok(BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    })
}

/// The HTTP server together with its state and background tasks.
///
/// [`Application::new`] opens the database, runs migrations, loads initial data and the global
/// parameters and starts the background tasks; [`Application::serve`] then handles requests
/// until the shutdown future resolves.
pub struct Application {
    router: Router,
    config: Config,
    pool: SqlitePool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application against the configured database and LDAP servers
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting mxctl with configuration: {:#?}", config);
        let pool = db::pool::connect(&config.database).await?;
        Self::new_with_pool(config, pool, Arc::new(LdapDirectory)).await
    }

    /// Create a new application on an existing pool and directory
    pub async fn new_with_pool(config: Config, pool: SqlitePool, directory: Arc<dyn Directory>) -> anyhow::Result<Self> {
        migrator().run(&pool).await?;
        load_initial_data(&pool, &config.admin_username, &config.admin_password, &config.auth.password).await?;

        let parameters = SharedParameters::load(&pool).await?;
        let backends = BackendChain::from_config(&config, pool.clone(), parameters.clone(), directory);
        debug!(?backends, "Authentication backends");

        let bg_services = setup_background_services(pool.clone(), &config, parameters.clone(), CancellationToken::new())?;

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .parameters(parameters)
            .backends(Arc::new(backends))
            .build();
        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("mxctl listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        telemetry::shutdown_telemetry();
        Ok(())
    }
}

/// `communicate-with-public-api`: run one synchronization against the configured public API.
pub async fn communicate_with_public_api(config: &Config) -> anyhow::Result<()> {
    let pool = db::pool::connect(&config.database).await?;
    migrator().run(&pool).await?;

    let parameters = {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        let rows = Parameters::new(&mut conn).list().await?;
        GlobalParameters::from_rows(&rows)?
    };

    let api = PublicApiReqwest::new(&config.public_api)?;
    match sync::communicate_with_public_api(&pool, &parameters, &api, &config.site_hostname).await? {
        Some(report) => info!(
            api_pk = report.api_pk,
            statistics_sent = report.statistics_sent,
            latest_version = report.latest_version.as_deref().unwrap_or("unknown"),
            "Public API synchronization done"
        ),
        None => info!("Public API communication is disabled"),
    }

    pool.close().await;
    Ok(())
}
