//! HTTP API: route handlers and the request/response models they exchange.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures, distinct from the database records
//!
//! # Routes
//!
//! - **Accounts** (`/accounts/login/`, `/accounts/logout/`)
//! - **Landing pages** (`/user/`, `/dashboard/`)
//! - **Current user** (`/user/profile/`, `/user/api-access/`)
//! - **Administration** (`/admin/information/`, `/admin/parameters/`)
//!
//! Handlers carry `utoipa` annotations; the document is served at `/api-docs/openapi.json`
//! and rendered at `/docs`.

pub mod handlers;
pub mod models;
