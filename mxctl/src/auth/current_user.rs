//! Request authentication.
//!
//! [`CurrentUser`] is an axum extractor. It accepts either an API token in the
//! `Authorization` header (`Token <key>` or `Bearer <key>`) or the JWT session cookie, and
//! always reloads the account so that deleted or deactivated users lose access at once.

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    db::{
        errors::DbError,
        handlers::{ApiTokens, Repository, Users},
    },
    errors::{Error, Result},
    types::UserId,
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use sqlx::SqlitePool;
use tracing::{debug, instrument, trace};

/// Value of the session cookie, if the request carries one.
pub fn session_cookie<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value)
}

/// Load an account that may still act.
async fn active_user(db: &SqlitePool, id: UserId) -> Result<Option<CurrentUser>> {
    let mut conn = db.acquire().await.map_err(DbError::from)?;
    let user = Users::new(&mut conn).get_by_id(id).await?;
    Ok(user.filter(|u| u.is_active).map(CurrentUser::from))
}

/// Extract user from the JWT session cookie if present and valid
/// Returns:
/// - None: No session cookie present
/// - Some(Ok(user)): Valid token for an active user
/// - Some(Err(error)): Cookie present but invalid, expired, logged out, or for a vanished user
#[instrument(skip_all)]
async fn try_jwt_session_auth(parts: &Parts, config: &Config, db: &SqlitePool) -> Option<Result<CurrentUser>> {
    let token = session_cookie(&parts.headers, &config.auth.session.cookie_name)?;
    if token.is_empty() {
        return None;
    }

    let claims = match session::verify_session_token(token, config) {
        Ok(claims) => claims,
        Err(e) => return Some(Err(e)),
    };

    match active_user(db, claims.sub).await {
        Ok(Some(user)) if user.session_version == claims.ver => Some(Ok(user)),
        Ok(_) => Some(Err(Error::Unauthenticated {
            message: Some("Session no longer valid".to_string()),
        })),
        Err(e) => Some(Err(e)),
    }
}

/// Extract user from an API token in the Authorization header if present and valid
/// Returns:
/// - None: No Authorization header, or an unsupported scheme
/// - Some(Ok(user)): Known token
/// - Some(Err(error)): Token present but unknown
#[instrument(skip_all)]
async fn try_api_token_auth(parts: &Parts, db: &SqlitePool) -> Option<Result<CurrentUser>> {
    let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION)?;

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    let key = auth_str.strip_prefix("Token ").or_else(|| auth_str.strip_prefix("Bearer "))?.trim();

    let mut conn = match db.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Some(Err(DbError::from(e).into())),
    };
    match ApiTokens::new(&mut conn).find_user_by_key(key).await {
        Ok(Some(user)) => Some(Ok(CurrentUser::from(user))),
        Ok(None) => Some(Err(Error::Unauthenticated {
            message: Some("Invalid API token".to_string()),
        })),
        Err(e) => Some(Err(e.into())),
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Every method is tried; a bad token does not hide a valid session cookie
        let mut auth_errors = Vec::new();

        match try_api_token_auth(parts, &state.db).await {
            Some(Ok(user)) => {
                debug!("Found API token authenticated user: {}", user.id);
                return Ok(user);
            }
            Some(Err(e)) => auth_errors.push(("API token", e)),
            None => trace!("No API token authentication attempted"),
        }

        match try_jwt_session_auth(parts, &state.config, &state.db).await {
            Some(Ok(user)) => {
                debug!("Found JWT session authenticated user: {}", user.id);
                return Ok(user);
            }
            Some(Err(e)) => auth_errors.push(("JWT session", e)),
            None => trace!("No JWT session authentication attempted"),
        }

        // Infrastructure failures are not the client's fault
        if let Some(pos) = auth_errors.iter().position(|(_, e)| e.status_code().is_server_error()) {
            return Err(auth_errors.swap_remove(pos).1);
        }

        trace!("All authentication attempts failed ({}): {:?}", auth_errors.len(), auth_errors);
        Err(Error::Unauthenticated { message: None })
    }
}
