//! Landing pages reached after login.

use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::{
        information::DashboardResponse,
        users::{CurrentUser, UserIndexResponse},
    },
    auth::permissions,
    db::{
        errors::DbError,
        handlers::{Domains, Mailboxes, Repository, Users},
    },
    errors::Error,
    types::{Operation, Resource},
};

/// Landing page of every authenticated user
#[utoipa::path(
    get,
    path = "/user/",
    tag = "pages",
    responses(
        (status = 200, description = "Current user and mailbox", body = UserIndexResponse),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn user_index(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserIndexResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let user = Users::new(&mut conn).get_by_id(current_user.id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: current_user.id.to_string(),
    })?;
    let mailbox = Mailboxes::new(&mut conn).get_for_user(user.id).await?;

    Ok(Json(UserIndexResponse {
        user: user.into(),
        mailbox: mailbox.map(|m| m.full_address()),
    }))
}

/// Administrator dashboard
#[utoipa::path(
    get,
    path = "/dashboard/",
    tag = "pages",
    responses(
        (status = 200, description = "Instance counters", body = DashboardResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not an administrator"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn dashboard(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<DashboardResponse>, Error> {
    permissions::require_admin(&current_user, Resource::Dashboard, Operation::ReadAll)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    Ok(Json(DashboardResponse {
        domain_counter: Domains::new(&mut conn).count().await?,
        mailbox_counter: Mailboxes::new(&mut conn).count().await?,
        user_counter: Users::new(&mut conn).count().await?,
    }))
}
