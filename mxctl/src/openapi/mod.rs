//! OpenAPI document served at `/api-docs/openapi.json` and rendered at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, db::models::local_config::PublishedVersion, db::models::users::AuthSource, parameters};

/// Session cookie and API token schemes.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "SessionCookie".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "mxctl_session",
                    "Set by `POST /accounts/login/`.",
                ))),
            );
            components.security_schemes.insert(
                "ApiToken".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "Administrator API token, enabled from `/user/api-access/`. \
                            Sent as `Authorization: Token <key>` or `Authorization: Bearer <key>`.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::pages::user_index,
        api::handlers::pages::dashboard,
        api::handlers::profile::get_profile,
        api::handlers::profile::update_profile,
        api::handlers::api_access::get_api_access,
        api::handlers::api_access::update_api_access,
        api::handlers::information::information,
        api::handlers::parameters::get_parameters,
        api::handlers::parameters::update_parameters,
    ),
    components(schemas(
        api::models::auth::LoginRequest,
        api::models::auth::AuthResponse,
        api::models::users::Role,
        api::models::users::UserResponse,
        api::models::users::UserIndexResponse,
        api::models::profile::ProfileForm,
        api::models::profile::ProfileResponse,
        api::models::api_access::ApiAccessForm,
        api::models::api_access::ApiAccessResponse,
        api::models::api_access::ApiTokenResponse,
        api::models::information::InformationResponse,
        api::models::information::DashboardResponse,
        api::models::parameters::ParametersResponse,
        api::models::parameters::ParametersUpdate,
        parameters::GlobalParameters,
        AuthSource,
        PublishedVersion,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "authentication", description = "Login and logout"),
        (name = "pages", description = "Landing pages"),
        (name = "profile", description = "Language and password of the current user"),
        (name = "api_access", description = "API tokens of administrators"),
        (name = "admin", description = "Instance administration"),
    ),
    info(
        title = "mxctl",
        description = "Account and authentication API of the mail hosting administration service",
    )
)]
pub struct ApiDoc;
