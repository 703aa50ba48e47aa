//! Sign-up routes: step submission, session view, step guards.
//!
//! The wizard is keyed by the `signup_session` cookie, minted on first
//! contact. Step outcomes become 303 redirects.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use time::Duration;
use uuid::Uuid;

use super::auth;
use crate::services::identity::IdentityError;
use crate::services::session;
use crate::services::signup::{self, Route, SignUpError, Submission};
use crate::services::signup_session::{AccountData, PaymentInfo, SignUpSession, SignUpState, UserData};
use crate::state::AppState;

pub(crate) const SIGNUP_COOKIE_NAME: &str = "signup_session";

/// Wizard key from the cookie, minting a fresh one when absent.
pub(crate) fn signup_key(jar: CookieJar, secure: bool) -> (CookieJar, String) {
    if let Some(key) = jar.get(SIGNUP_COOKIE_NAME).map(Cookie::value).filter(|v| !v.is_empty()) {
        let key = key.to_owned();
        return (jar, key);
    }

    let key = session::generate_token();
    let cookie = Cookie::build((SIGNUP_COOKIE_NAME, key.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::days(1));
    (jar.add(cookie), key)
}

pub(crate) fn signup_error_to_status(err: &SignUpError) -> StatusCode {
    match err {
        SignUpError::IdentityCreation(IdentityError::EmailTaken) => StatusCode::CONFLICT,
        SignUpError::IdentityCreation(IdentityError::InvalidEmail | IdentityError::MissingPassword) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SignUpError::IdentityCreation(_) | SignUpError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// SESSION VIEW
// =============================================================================

/// Account data as shown back to the client. Passwords are never echoed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_ref: Option<String>,
}

/// Payment info with the card number masked and the CVV dropped.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub card_holder_name: String,
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SignUpState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_data: Option<AccountView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_info: Option<PaymentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_user_id: Option<Uuid>,
}

impl From<&AccountData> for AccountView {
    fn from(account: &AccountData) -> Self {
        Self {
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            email: account.email.clone(),
            profile_image_ref: account.profile_image_ref.clone(),
        }
    }
}

impl From<&PaymentInfo> for PaymentView {
    fn from(payment: &PaymentInfo) -> Self {
        Self {
            card_holder_name: payment.card_holder_name.clone(),
            card_number: payment.masked_card_number(),
            expiry_month: payment.expiry_month.clone(),
            expiry_year: payment.expiry_year.clone(),
        }
    }
}

impl From<&SignUpSession> for SessionView {
    fn from(session: &SignUpSession) -> Self {
        Self {
            state: session.state,
            account_data: session.account_data.as_ref().map(AccountView::from),
            user_data: session.user_data.clone(),
            payment_info: session.payment_info.as_ref().map(PaymentView::from),
            created_user_id: session.created_user_id,
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /api/sign-up`: run one wizard step and redirect to its outcome.
pub async fn submit(State(state): State<AppState>, jar: CookieJar, Json(data): Json<Submission>) -> Response {
    let (mut jar, key) = signup_key(jar, state.cookie_secure);

    let reply = match state.flow.submit(&key, data).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(error = %e, "sign-up step failed");
            let status = signup_error_to_status(&e);
            return (status, jar, e.to_string()).into_response();
        }
    };

    if let Some(user_id) = reply.signed_in {
        match state.identity.create_session(user_id).await {
            Ok(token) => jar = jar.add(auth::session_cookie(token, state.cookie_secure)),
            Err(e) => tracing::error!(%user_id, error = %e, "login session after sign-up failed"),
        }
    }

    (jar, Redirect::to(reply.outcome.route().path())).into_response()
}

/// `GET /api/sign-up/session`: current wizard data without secrets.
pub async fn current_session(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, key) = signup_key(jar, state.cookie_secure);
    match state.sessions.read(&key).await {
        Ok(session) => (jar, Json(SessionView::from(&session))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "sign-up session read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /api/sign-up/guard/{step}`: session view when the step may be
/// shown, otherwise a redirect to the page that must come first.
pub async fn guard(State(state): State<AppState>, jar: CookieJar, Path(step): Path<String>) -> Response {
    let Some(target) = Route::from_step(&step) else {
        return (StatusCode::NOT_FOUND, "unknown sign-up step").into_response();
    };
    let (jar, key) = signup_key(jar, state.cookie_secure);
    let session = match state.sessions.read(&key).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "sign-up session read failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match signup::guard(target, &session) {
        Some(route) => (jar, Redirect::to(route.path())).into_response(),
        None => (jar, Json(SessionView::from(&session))).into_response(),
    }
}

#[cfg(test)]
#[path = "signup_test.rs"]
mod tests;
