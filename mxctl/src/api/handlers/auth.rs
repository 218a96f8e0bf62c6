//! Login and logout.

use axum::{extract::State, http::HeaderMap};
use tracing::{debug, warn};

use crate::{
    AppState,
    api::{
        handlers::FormOrJson,
        models::{
            auth::{AuthResponse, LoginRequest, LoginResponse, LogoutResponse},
            users::CurrentUser,
        },
    },
    auth::{current_user::session_cookie, session},
    config::Config,
    db::{errors::DbError, handlers::Users},
    errors::Error,
};

/// Path anonymous users are sent to.
pub const LOGIN_PAGE: &str = "/accounts/login/";

/// Build the `Set-Cookie` value carrying a session token.
pub(crate) fn create_session_cookie(token: &str, config: &Config) -> String {
    let session_config = &config.auth.session;
    let max_age = session_config.timeout.as_secs();

    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}",
        session_config.cookie_name, token, session_config.cookie_same_site, max_age
    );
    if session_config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Only same-site absolute paths are followed after login.
fn is_local_path(next: &str) -> bool {
    next.starts_with('/') && !next.starts_with("//") && !next.contains('\\') && !next.contains("://")
}

/// Log in with a username and password
///
/// Each configured backend is tried in turn. On success the session cookie is set and the
/// client is redirected to the landing page of its role (or to `next`).
#[utoipa::path(
    post,
    path = "/accounts/login/",
    request_body(content = LoginRequest, content_type = "application/x-www-form-urlencoded"),
    tag = "authentication",
    responses(
        (status = 303, description = "Login successful, redirect to the landing page", body = AuthResponse),
        (status = 400, description = "Username not usable for this account type"),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all, fields(username = %request.username))]
pub async fn login(State(state): State<AppState>, FormOrJson(request): FormOrJson<LoginRequest>) -> Result<LoginResponse, Error> {
    let user = state.backends.authenticate(request.username.trim(), &request.password).await?;

    let current_user = CurrentUser::from(user.clone());
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    let location = request
        .next
        .as_deref()
        .filter(|next| is_local_path(next))
        .unwrap_or(user.role.landing_page())
        .to_string();

    Ok(LoginResponse {
        auth_response: AuthResponse {
            user: user.into(),
            location,
        },
        cookie,
    })
}

/// Invalidate the sessions of the user owning `token`.
async fn revoke_session(state: &AppState, token: &str) -> Result<(), Error> {
    let claims = session::verify_session_token(token, &state.config)?;
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    Users::new(&mut conn).revoke_sessions(claims.sub).await?;
    debug!(user_id = claims.sub, "Session revoked");
    Ok(())
}

/// Log out
///
/// The session the request carries is revoked server side, so a copy of the cookie kept by
/// the client no longer authenticates.
#[utoipa::path(
    post,
    path = "/accounts/logout/",
    tag = "authentication",
    responses(
        (status = 303, description = "Session cleared, redirect to the login page"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> LogoutResponse {
    let session_config = &state.config.auth.session;
    if let Some(token) = session_cookie(&headers, &session_config.cookie_name).filter(|t| !t.is_empty()) {
        match revoke_session(&state, token).await {
            Ok(()) | Err(Error::Unauthenticated { .. }) => {}
            Err(e) => warn!("Failed to revoke session on logout: {e}"),
        }
    }

    let cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite={}; Max-Age=0",
        session_config.cookie_name, session_config.cookie_same_site
    );

    LogoutResponse {
        location: LOGIN_PAGE.to_string(),
        cookie,
    }
}
