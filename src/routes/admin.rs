//! Admin routes, guarded by the `x-admin-key` header.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use crate::services::user_sync;
use crate::state::AppState;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// `POST /api/admin/sync-users`: drop identities the backend does not know.
pub async fn sync_users(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(expected) = state.admin_api_key.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let provided = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let report = user_sync::sync(state.identity.as_ref(), state.backend.as_ref()).await;
    Json(report).into_response()
}
