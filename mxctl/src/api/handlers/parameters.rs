//! Global parameter administration.

use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::{
        parameters::{ParametersResponse, ParametersUpdate},
        users::CurrentUser,
    },
    auth::permissions,
    errors::Error,
    parameters::{GlobalParameters, REDACTED_SECRET},
    types::{Operation, Resource},
};

fn parameters_response(params: &GlobalParameters) -> ParametersResponse {
    ParametersResponse {
        parameters: params
            .redacted()
            .to_rows()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    }
}

/// Current global parameters
///
/// The LDAP bind password is never returned.
#[utoipa::path(
    get,
    path = "/admin/parameters/",
    tag = "admin",
    responses(
        (status = 200, description = "Global parameters", body = ParametersResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not a super administrator"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn get_parameters(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<ParametersResponse>, Error> {
    permissions::require_super_admin(&current_user, Resource::Parameters, Operation::ReadAll)?;
    Ok(Json(parameters_response(&state.parameters.get())))
}

/// Update global parameters
///
/// Only the listed parameters change. The update is rejected as a whole when a name is unknown
/// or a value invalid. Sending back the redacted bind password keeps the stored one.
#[utoipa::path(
    put,
    path = "/admin/parameters/",
    request_body = ParametersUpdate,
    tag = "admin",
    responses(
        (status = 200, description = "Updated global parameters", body = ParametersResponse),
        (status = 400, description = "Unknown parameter or invalid value"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not a super administrator"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn update_parameters(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(update): Json<ParametersUpdate>,
) -> Result<Json<ParametersResponse>, Error> {
    permissions::require_super_admin(&current_user, Resource::Parameters, Operation::UpdateAll)?;

    let rows: Vec<_> = update
        .into_rows()
        .into_iter()
        .filter(|(name, value)| !(name == "ldap_bind_password" && value == REDACTED_SECRET))
        .collect();

    let params = state.parameters.update(&state.db, &rows).await?;
    Ok(Json(parameters_response(&params)))
}
