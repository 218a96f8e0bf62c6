//! Login, logout and the responses carrying the session cookie.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::users::UserResponse;

/// Credentials posted by the login form.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Local path to continue to after a successful login
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserResponse,
    /// Where the client is redirected
    pub location: String,
}

/// Successful login: a redirect to the landing page that also sets the session cookie.
#[derive(Debug)]
pub struct LoginResponse {
    pub auth_response: AuthResponse,
    pub cookie: String,
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::SEE_OTHER,
            [
                (header::LOCATION, self.auth_response.location.clone()),
                (header::SET_COOKIE, self.cookie),
            ],
            Json(self.auth_response),
        )
            .into_response()
    }
}

/// Logout: a redirect to the login page with an expired session cookie.
#[derive(Debug)]
pub struct LogoutResponse {
    pub location: String,
    pub cookie: String,
}

impl IntoResponse for LogoutResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::SEE_OTHER,
            [(header::LOCATION, self.location), (header::SET_COOKIE, self.cookie)],
        )
            .into_response()
    }
}
