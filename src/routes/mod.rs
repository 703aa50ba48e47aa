//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the sign-up wizard API, the auth endpoints and the
//! admin reconciliation route under a single Axum router. Page routes
//! (`/sign-up`, `/dashboard`, ...) belong to the frontend and only appear
//! here as redirect targets.

pub mod admin;
pub mod auth;
pub mod signup;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/sign-up", post(signup::submit))
        .route("/api/sign-up/session", get(signup::current_session))
        .route("/api/sign-up/guard/{step}", get(signup::guard))
        .route("/auth/google", get(auth::google_redirect))
        .route("/auth/google/callback", get(auth::google_callback))
        .route("/auth/social-callback", get(auth::social_callback))
        .route("/api/auth/sign-in", post(auth::sign_in))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/admin/sync-users", post(admin::sync_users))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
