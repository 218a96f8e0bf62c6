//! User profile: preferred language and password.

use axum::{Json, extract::State};
use tracing::info;

use crate::{
    AppState,
    api::{
        handlers::FormOrJson,
        models::{
            profile::{ProfileForm, ProfileResponse},
            users::CurrentUser,
        },
    },
    auth::password,
    db::{
        errors::DbError,
        handlers::{Repository, Users},
        models::users::{AuthSource, UserDBResponse, UserUpdateDBRequest},
    },
    errors::Error,
};

/// Interface languages a user may pick.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "br", "cs", "de", "el", "en", "es", "fi", "fr", "it", "ja", "nl", "pl", "pt", "pt-br", "ro", "ru", "sv", "tr", "zh-hant",
];

fn profile_response(user: UserDBResponse, message: Option<String>) -> ProfileResponse {
    ProfileResponse {
        external_password: user.auth_source != AuthSource::Local,
        username: user.username,
        email: user.email,
        language: user.language,
        message,
    }
}

fn bad_request(message: &str) -> Error {
    Error::BadRequest {
        message: message.to_string(),
    }
}

/// Get the current user's profile
#[utoipa::path(
    get,
    path = "/user/profile/",
    tag = "profile",
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn get_profile(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<ProfileResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = Users::new(&mut conn).get_by_id(current_user.id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: current_user.id.to_string(),
    })?;
    Ok(Json(profile_response(user, None)))
}

/// Update the current user's profile
///
/// A password change needs the old password, a new one satisfying the password policy and a
/// matching confirmation. The change is applied by the backend owning the credential, so
/// directory users update their directory entry. Nothing is changed when any check fails.
#[utoipa::path(
    post,
    path = "/user/profile/",
    request_body(content = ProfileForm, content_type = "application/x-www-form-urlencoded"),
    tag = "profile",
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 400, description = "Invalid language or password change"),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    current_user: CurrentUser,
    FormOrJson(form): FormOrJson<ProfileForm>,
) -> Result<Json<ProfileResponse>, Error> {
    if let Some(language) = &form.language {
        if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
            return Err(bad_request("Unsupported language"));
        }
    }

    if form.changes_password() {
        let (Some(old), Some(new), Some(confirmation)) = (&form.oldpassword, &form.newpassword, &form.confirmation) else {
            return Err(bad_request("Old password, new password and confirmation are required"));
        };
        if new != confirmation {
            return Err(bad_request("Passwords mismatch"));
        }
        password::validate_password(&state.config.auth.password, new)?;

        let backend = state
            .backends
            .backend_for(current_user.auth_source)
            .ok_or_else(|| bad_request("The password of this account can not be changed here"))?;

        if backend.authenticate(&current_user.username, old).await?.is_none() {
            return Err(bad_request("Old password mismatch"));
        }
        backend.update_password(&current_user.username, old, new).await?;
        info!("Password changed");
    }

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = Users::new(&mut conn)
        .update(
            current_user.id,
            &UserUpdateDBRequest {
                language: form.language.clone(),
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(profile_response(user, Some("Profile updated".to_string()))))
}
