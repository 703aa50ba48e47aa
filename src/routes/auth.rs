//! Auth routes: Google OAuth flow, social callback, email sign-in, login sessions.

use axum::extract::{FromRef, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use time::Duration;

use super::signup::{SIGNUP_COOKIE_NAME, signup_key};
use crate::services::identity::IdentityError;
use crate::services::signup::{self, Route};
use crate::services::signup_session::AccountData;
use crate::services::{auth as auth_svc, session};
use crate::state::AppState;

pub(crate) const COOKIE_NAME: &str = "session_token";
const OAUTH_STATE_COOKIE_NAME: &str = "oauth_state";
const SOCIAL_CALLBACK_PATH: &str = "/auth/social-callback";

pub(crate) fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

fn expired_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::ZERO)
        .build()
}

/// Unverified emails may not claim an existing account; emails held by a
/// differently linked account conflict.
pub(crate) fn social_error_to_status(err: &IdentityError) -> StatusCode {
    match err {
        IdentityError::UnverifiedEmail => StatusCode::FORBIDDEN,
        IdentityError::EmailTaken => StatusCode::CONFLICT,
        IdentityError::InvalidEmail => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user extracted from the session cookie.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: session::SessionUser,
    pub token: String,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get(COOKIE_NAME).map(Cookie::value).unwrap_or_default();
        if token.is_empty() {
            return Err(StatusCode::UNAUTHORIZED);
        }

        let app_state = AppState::from_ref(state);
        let user = app_state
            .identity
            .validate_session(token)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(Self { user, token: token.to_owned() })
    }
}

// =============================================================================
// GOOGLE OAUTH
// =============================================================================

/// `GET /auth/google`: redirect to Google's consent page.
pub async fn google_redirect(State(state): State<AppState>) -> Response {
    let Some(config) = &state.google else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Google sign-on not configured").into_response();
    };

    let oauth_state = session::generate_token();
    let cookie = Cookie::build((OAUTH_STATE_COOKIE_NAME, oauth_state.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.cookie_secure)
        .max_age(Duration::minutes(10));

    let url = match config.authorize_url(&oauth_state) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(error = %e, "authorize url build failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let jar = CookieJar::new().add(cookie);
    (jar, Redirect::temporary(&url)).into_response()
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: String,
    state: Option<String>,
}

/// `GET /auth/google/callback`: exchange code, upsert identity, seed the
/// sign-up session for new identities, set cookie, go to the social callback.
pub async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackQuery>,
) -> Response {
    let Some(config) = &state.google else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Google sign-on not configured").into_response();
    };
    let secure = state.cookie_secure;

    // Verify OAuth CSRF state from cookie.
    let Some(callback_state) = params.state.as_deref() else {
        return (StatusCode::BAD_REQUEST, "missing oauth state").into_response();
    };
    let expected_state = jar
        .get(OAUTH_STATE_COOKIE_NAME)
        .map(Cookie::value)
        .unwrap_or_default();
    if expected_state.is_empty() || expected_state != callback_state {
        return (StatusCode::UNAUTHORIZED, "invalid oauth state").into_response();
    }

    let access_token = match auth_svc::exchange_code(config, &params.code).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "oauth code exchange failed");
            return (StatusCode::BAD_GATEWAY, "OAuth code exchange failed").into_response();
        }
    };

    let profile = match auth_svc::fetch_google_user(&access_token).await {
        Ok(u) => u.into_profile(),
        Err(e) => {
            tracing::error!(error = %e, "google user fetch failed");
            return (StatusCode::BAD_GATEWAY, "Failed to fetch Google profile").into_response();
        }
    };
    let account = AccountData::from_display_name(&profile.name, &profile.email);

    let identity = match state.identity.upsert_social(profile).await {
        Ok(identity) => identity,
        Err(e) => {
            let status = social_error_to_status(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                tracing::error!(error = %e, "social identity upsert failed");
                return (status, "Failed to create user").into_response();
            }
            tracing::warn!(error = %e, "social identity rejected");
            return (status, e.to_string()).into_response();
        }
    };

    let (jar, key) = signup_key(jar, secure);
    if identity.created {
        if let Err(e) = state.flow.begin_social(&key, identity.id, account).await {
            tracing::error!(user_id = %identity.id, error = %e, "seeding social sign-up failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to start sign-up").into_response();
        }
    }

    let token = match state.identity.create_session(identity.id).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "session creation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session").into_response();
        }
    };

    let jar = jar
        .add(session_cookie(token, secure))
        .add(expired_cookie(OAUTH_STATE_COOKIE_NAME, secure));
    (jar, Redirect::temporary(SOCIAL_CALLBACK_PATH)).into_response()
}

/// `GET /auth/social-callback`: new social identities continue the
/// wizard, returning ones go to the dashboard.
pub async fn social_callback(State(state): State<AppState>, jar: CookieJar) -> Response {
    let key = jar.get(SIGNUP_COOKIE_NAME).map(Cookie::value).unwrap_or_default();
    let is_new = if key.is_empty() {
        false
    } else {
        match state.sessions.read(key).await {
            Ok(session) => signup::is_new_social_user(&session),
            Err(e) => {
                tracing::warn!(error = %e, "sign-up session read failed in social callback");
                false
            }
        }
    };

    let target = if is_new { Route::UserData } else { Route::Dashboard };
    Redirect::to(target.path()).into_response()
}

// =============================================================================
// LOGIN SESSIONS
// =============================================================================

#[derive(Deserialize)]
pub struct SignInRequest {
    email: String,
    password: String,
}

/// `POST /api/auth/sign-in`: email/password login.
pub async fn sign_in(State(state): State<AppState>, Json(body): Json<SignInRequest>) -> Response {
    let user_id = match state.identity.verify_credentials(&body.email, &body.password).await {
        Ok(Some(id)) => id,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid email or password").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "credential check failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match state.identity.create_session(user_id).await {
        Ok(token) => {
            let jar = CookieJar::new().add(session_cookie(token, state.cookie_secure));
            (jar, StatusCode::NO_CONTENT).into_response()
        }
        Err(e) => {
            tracing::error!(%user_id, error = %e, "session creation failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /api/auth/me`: return current user.
pub async fn me(auth: AuthUser) -> Json<session::SessionUser> {
    Json(auth.user)
}

/// `POST /api/auth/logout`: delete session, clear cookie.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    if let Err(e) = state.identity.delete_session(&auth.token).await {
        tracing::warn!(error = %e, "session delete failed on logout");
    }

    let jar = CookieJar::new().add(expired_cookie(COOKIE_NAME, state.cookie_secure));
    (jar, StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
