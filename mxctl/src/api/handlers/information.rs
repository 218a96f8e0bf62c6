//! Instance version information.

use std::cmp::Ordering;

use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::{
        information::{COMPONENT_NAME, InformationResponse},
        users::CurrentUser,
    },
    auth::permissions,
    db::{errors::DbError, handlers::LocalConfigs},
    errors::Error,
    sync::{INSTALLED_VERSION, compare_versions},
    types::{Operation, Resource},
};

/// Installed and latest known versions
///
/// The latest version comes from the last public API synchronization, so it stays unknown
/// until one succeeded.
#[utoipa::path(
    get,
    path = "/admin/information/",
    tag = "admin",
    responses(
        (status = 200, description = "Version information", body = InformationResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not a super administrator"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn information(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<InformationResponse>, Error> {
    permissions::require_super_admin(&current_user, Resource::Information, Operation::ReadAll)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let local = LocalConfigs::new(&mut conn).get().await?;
    let versions = local.api_versions.0;

    let latest_version = versions.get(COMPONENT_NAME).map(|v| v.version.clone());
    let update_available = latest_version
        .as_deref()
        .is_some_and(|latest| compare_versions(latest, INSTALLED_VERSION) == Ordering::Greater);

    Ok(Json(InformationResponse {
        content: InformationResponse::summary(INSTALLED_VERSION, latest_version.as_deref(), update_available),
        installed_version: INSTALLED_VERSION.to_string(),
        latest_version,
        update_available,
        api_pk: local.api_pk,
        last_sync_at: local.last_sync_at,
        versions,
    }))
}
