//! HTTP request handlers.
//!
//! - [`auth`]: login and logout
//! - [`pages`]: user landing page and administrator dashboard
//! - [`profile`]: language and password changes
//! - [`api_access`]: API token toggle
//! - [`information`]: instance version information
//! - [`parameters`]: global parameter administration
//!
//! Authenticated handlers take a [`crate::api::models::users::CurrentUser`], which accepts a
//! session cookie or an API token (see [`crate::auth::current_user`]).

pub mod api_access;
pub mod auth;
pub mod information;
pub mod pages;
pub mod parameters;
pub mod profile;

use axum::{
    Form, Json,
    extract::{FromRequest, Request},
    http::header,
};
use serde::de::DeserializeOwned;

use crate::errors::Error;

/// Body extractor accepting either a urlencoded form or JSON, chosen by `Content-Type`.
#[derive(Debug, Clone)]
pub struct FormOrJson<T>(pub T);

impl<S, T> FromRequest<S> for FormOrJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| Error::BadRequest { message: e.body_text() })?;
            Ok(Self(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| Error::BadRequest { message: e.body_text() })?;
            Ok(Self(value))
        }
    }
}
