//! Per-user API token toggle for administrators.

use axum::{Json, extract::State};
use tracing::info;

use crate::{
    AppState,
    api::{
        handlers::FormOrJson,
        models::{
            api_access::{ApiAccessForm, ApiAccessResponse},
            users::CurrentUser,
        },
    },
    auth::permissions,
    crypto::generate_api_key,
    db::{errors::DbError, handlers::ApiTokens},
    errors::Error,
    types::{Operation, Resource},
};

/// Get the API access state of the current user
#[utoipa::path(
    get,
    path = "/user/api-access/",
    tag = "api_access",
    responses(
        (status = 200, description = "API access state", body = ApiAccessResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not an administrator"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn get_api_access(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<ApiAccessResponse>, Error> {
    permissions::require_admin(&current_user, Resource::ApiTokens, Operation::ReadOwn)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let token = ApiTokens::new(&mut conn).get_for_user(current_user.id).await?;

    Ok(Json(ApiAccessResponse {
        enable_api_access: token.is_some(),
        token: token.map(Into::into),
    }))
}

/// Enable or disable API access for the current user
///
/// Enabling issues a token unless one exists already. Disabling revokes it.
#[utoipa::path(
    post,
    path = "/user/api-access/",
    request_body(content = ApiAccessForm, content_type = "application/x-www-form-urlencoded"),
    tag = "api_access",
    responses(
        (status = 200, description = "API access updated", body = ApiAccessResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not an administrator"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id, enable = form.enable_api_access))]
pub async fn update_api_access(
    State(state): State<AppState>,
    current_user: CurrentUser,
    FormOrJson(form): FormOrJson<ApiAccessForm>,
) -> Result<Json<ApiAccessResponse>, Error> {
    permissions::require_admin(&current_user, Resource::ApiTokens, Operation::UpdateOwn)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let mut repo = ApiTokens::new(&mut conn);

    let token = if form.enable_api_access {
        let token = repo.create_if_absent(current_user.id, &generate_api_key()).await?;
        info!("API access enabled");
        Some(token.into())
    } else {
        if repo.delete_for_user(current_user.id).await? {
            info!("API access disabled");
        }
        None
    };

    Ok(Json(ApiAccessResponse {
        enable_api_access: token.is_some(),
        token,
    }))
}
