//! Sign-up step handler.
//!
//! DESIGN
//! ======
//! Each wizard submission runs to completion inside one request and ends in
//! a `StepOutcome` value; the route layer turns that value into a redirect.
//! Missing upstream data never fails hard: the outcome points back at the
//! step that produces it, so the user can always resume.
//!
//! External calls run strictly in sequence (existence check, provisioning,
//! compensating deletion) because each depends on the previous result.
//!
//! TRADE-OFFS
//! ==========
//! The existence check is the only guard against double provisioning in the
//! social path. Two concurrent submissions for the same identity can both
//! see "not found" and both provision.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use super::identity::{IdentityError, IdentityProvider, NewIdentity};
use super::provisioning::{Existence, HealthBackend, ProvisionRequest};
use super::signup_session::{
    AccountData, PaymentInfo, SessionPatch, SessionStoreError, SignUpSession, SignUpSessionStore, SignUpState,
    UserData,
};

// =============================================================================
// ROUTES + OUTCOMES
// =============================================================================

/// Navigation targets of the sign-up flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SignUp,
    UserData,
    PaymentInfo,
    Dashboard,
}

impl Route {
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::SignUp => "/sign-up",
            Self::UserData => "/sign-up/user-data",
            Self::PaymentInfo => "/sign-up/payment-info",
            Self::Dashboard => "/dashboard",
        }
    }

    /// Parse a wizard step name as used in `/api/sign-up/guard/{step}`.
    #[must_use]
    pub fn from_step(step: &str) -> Option<Self> {
        match step {
            "account" | "email" => Some(Self::SignUp),
            "user-data" => Some(Self::UserData),
            "payment-info" => Some(Self::PaymentInfo),
            _ => None,
        }
    }

    /// Page where a session in `state` continues.
    #[must_use]
    pub fn for_state(state: Option<SignUpState>) -> Self {
        match state {
            None | Some(SignUpState::Email) => Self::SignUp,
            Some(SignUpState::UserData | SignUpState::SocialSignOn) => Self::UserData,
            Some(SignUpState::PaymentInfo) => Self::PaymentInfo,
            Some(SignUpState::Success) => Self::Dashboard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step accepted; the session advanced to this state.
    Continue(SignUpState),
    /// Required data missing; send the user to the step that supplies it.
    Redirect(Route),
    /// The attempt is over, successfully or not.
    Terminal(Route),
}

impl StepOutcome {
    #[must_use]
    pub fn route(self) -> Route {
        match self {
            Self::Continue(state) => Route::for_state(Some(state)),
            Self::Redirect(route) | Self::Terminal(route) => route,
        }
    }
}

/// Handler result. `signed_in` names an identity the caller should open a
/// login session for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReply {
    pub outcome: StepOutcome,
    pub signed_in: Option<Uuid>,
}

impl From<StepOutcome> for StepReply {
    fn from(outcome: StepOutcome) -> Self {
        Self { outcome, signed_in: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignUpError {
    #[error("session store: {0}")]
    Store(#[from] SessionStoreError),
    #[error("account creation failed: {0}")]
    IdentityCreation(#[source] IdentityError),
}

// =============================================================================
// SUBMISSION
// =============================================================================

/// Uploaded profile image metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileImage {
    pub file_name: String,
}

/// One wizard step submission, tagged by `state`. It never names an
/// identity: `begin_social` records that in the session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub state: SignUpState,
    #[serde(default)]
    pub account_data: Option<AccountData>,
    #[serde(default)]
    pub user_data: Option<UserData>,
    #[serde(default)]
    pub payment_info: Option<PaymentInfo>,
    #[serde(default)]
    pub profile_image: Option<ProfileImage>,
}

impl Submission {
    #[must_use]
    pub fn new(state: SignUpState) -> Self {
        Self {
            state,
            account_data: None,
            user_data: None,
            payment_info: None,
            profile_image: None,
        }
    }
}

/// Reference under which an uploaded profile image is stored: the file
/// name without its extension.
#[must_use]
pub fn profile_image_ref(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_owned(),
        _ => file_name.to_owned(),
    }
}

// =============================================================================
// GUARDS
// =============================================================================

/// Where a visitor of `target` must go instead, if anywhere.
#[must_use]
pub fn guard(target: Route, session: &SignUpSession) -> Option<Route> {
    if session.is_complete() {
        return Some(Route::Dashboard);
    }
    let has_identity = session.account_data().is_some() || session.created_user_id.is_some();
    match target {
        Route::SignUp | Route::Dashboard => None,
        Route::UserData => (!has_identity).then_some(Route::SignUp),
        Route::PaymentInfo => {
            if !has_identity {
                Some(Route::SignUp)
            } else if session.user_data().is_none() {
                Some(Route::UserData)
            } else {
                None
            }
        }
    }
}

/// A social login is new when the sign-up session was seeded by it.
#[must_use]
pub fn is_new_social_user(session: &SignUpSession) -> bool {
    session.state == Some(SignUpState::SocialSignOn) && session.created_user_id.is_some()
}

// =============================================================================
// FLOW
// =============================================================================

#[derive(Clone)]
pub struct SignUpFlow {
    sessions: Arc<dyn SignUpSessionStore>,
    identity: Arc<dyn IdentityProvider>,
    backend: Arc<dyn HealthBackend>,
}

impl SignUpFlow {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SignUpSessionStore>,
        identity: Arc<dyn IdentityProvider>,
        backend: Arc<dyn HealthBackend>,
    ) -> Self {
        Self { sessions, identity, backend }
    }

    /// Seed the sign-up session right after a social login created an
    /// identity.
    pub async fn begin_social(&self, key: &str, user_id: Uuid, account: AccountData) -> Result<(), SignUpError> {
        self.sessions
            .update(
                key,
                SessionPatch {
                    account_data: Some(account),
                    created_user_id: Some(user_id),
                    ..SessionPatch::state(SignUpState::SocialSignOn)
                },
            )
            .await?;
        tracing::info!(%user_id, "social sign-up started");
        Ok(())
    }

    /// Process one step submission for the client session `key`.
    pub async fn submit(&self, key: &str, data: Submission) -> Result<StepReply, SignUpError> {
        let session = self.sessions.read(key).await?;
        if session.is_complete() {
            return Ok(StepOutcome::Terminal(Route::Dashboard).into());
        }

        // Only `begin_social` writes the created identity; clients never name it.
        let created_user_id = session.created_user_id;
        let social = data.state == SignUpState::SocialSignOn || created_user_id.is_some();
        let has_account = data.account_data.is_some() || session.account_data().is_some();
        if !has_account && !social {
            tracing::warn!(state = data.state.as_str(), "sign-up step without account data");
            return Ok(StepOutcome::Redirect(Route::SignUp).into());
        }

        match data.state {
            SignUpState::Email => self.account_step(key, data).await,
            SignUpState::UserData | SignUpState::SocialSignOn => self.user_data_step(key, data).await,
            SignUpState::PaymentInfo => self.payment_step(key, data, &session, created_user_id).await,
            SignUpState::Success => Ok(StepOutcome::Redirect(Route::for_state(session.state)).into()),
        }
    }

    async fn account_step(&self, key: &str, data: Submission) -> Result<StepReply, SignUpError> {
        let mut account = data.account_data;
        if let Some(account) = account.as_mut() {
            if account.confirm_password.is_some() && account.confirm_password != account.password {
                return Ok(StepOutcome::Redirect(Route::SignUp).into());
            }
            if let Some(image) = &data.profile_image {
                account.profile_image_ref = Some(profile_image_ref(&image.file_name));
            }
        }

        self.sessions
            .update(key, SessionPatch { account_data: account, ..SessionPatch::state(SignUpState::UserData) })
            .await?;
        Ok(StepOutcome::Continue(SignUpState::UserData).into())
    }

    async fn user_data_step(&self, key: &str, data: Submission) -> Result<StepReply, SignUpError> {
        let Some(user_data) = data.user_data else {
            return Ok(StepOutcome::Redirect(Route::UserData).into());
        };

        self.sessions
            .update(key, SessionPatch { user_data: Some(user_data), ..SessionPatch::state(SignUpState::PaymentInfo) })
            .await?;
        Ok(StepOutcome::Continue(SignUpState::PaymentInfo).into())
    }

    async fn payment_step(
        &self,
        key: &str,
        data: Submission,
        session: &SignUpSession,
        created_user_id: Option<Uuid>,
    ) -> Result<StepReply, SignUpError> {
        let Some(user_data) = data.user_data.as_ref().or(session.user_data()).cloned() else {
            return Ok(StepOutcome::Redirect(Route::UserData).into());
        };
        let Some(payment) = data.payment_info else {
            return Ok(StepOutcome::Redirect(Route::PaymentInfo).into());
        };
        if let Err(e) = payment.validate() {
            tracing::debug!(error = %e, "payment info rejected");
            return Ok(StepOutcome::Redirect(Route::PaymentInfo).into());
        }
        match created_user_id {
            Some(user_id) => {
                let account = session.account_data().cloned();
                self.finish_social(key, user_id, account, user_data, payment).await
            }
            None => {
                let account = data.account_data.or_else(|| session.account_data().cloned());
                self.finish_email(key, account, user_data, payment).await
            }
        }
    }

    async fn finish_social(
        &self,
        key: &str,
        user_id: Uuid,
        account: Option<AccountData>,
        user_data: UserData,
        payment: PaymentInfo,
    ) -> Result<StepReply, SignUpError> {
        let Some(account) = account else {
            return Ok(StepOutcome::Redirect(Route::SignUp).into());
        };

        let already_provisioned = match self.backend.validate(&[user_id]).await {
            Ok(Existence::Found) => true,
            Ok(Existence::NotFound { .. }) => false,
            Err(e) => {
                tracing::warn!(%user_id, error = %e, "existence check failed, provisioning anyway");
                false
            }
        };

        if !already_provisioned {
            let request = ProvisionRequest {
                user_id,
                email: account.email.clone(),
                specialist_id: user_data.primary_care_specialist,
            };
            if let Err(e) = self.backend.provision(&request).await {
                tracing::error!(%user_id, error = %e, "provisioning failed for social user, rolling back");
                return self.roll_back(key, user_id).await;
            }
        }

        self.sessions
            .update(key, SessionPatch { payment_info: Some(payment), ..SessionPatch::state(SignUpState::Success) })
            .await?;
        self.sessions.clear(key).await?;
        tracing::info!(%user_id, already_provisioned, "social sign-up complete");
        Ok(StepOutcome::Terminal(Route::Dashboard).into())
    }

    async fn finish_email(
        &self,
        key: &str,
        account: Option<AccountData>,
        user_data: UserData,
        payment: PaymentInfo,
    ) -> Result<StepReply, SignUpError> {
        let Some((account, password)) = account.and_then(|a| a.password.clone().map(|p| (a, p))) else {
            return Ok(StepOutcome::Redirect(Route::SignUp).into());
        };

        let new_identity = NewIdentity {
            name: account.full_name(),
            email: account.email.clone(),
            password,
            image: account.profile_image_ref.clone(),
        };
        let user_id = match self.identity.create_user(new_identity).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "email sign-up identity creation failed");
                return Err(SignUpError::IdentityCreation(e));
            }
        };

        let request =
            ProvisionRequest { user_id, email: account.email, specialist_id: user_data.primary_care_specialist };
        if let Err(e) = self.backend.provision(&request).await {
            tracing::error!(%user_id, error = %e, "provisioning failed for email user, rolling back");
            return self.roll_back(key, user_id).await;
        }

        self.sessions
            .update(key, SessionPatch { payment_info: Some(payment), ..SessionPatch::state(SignUpState::Success) })
            .await?;
        self.sessions.clear(key).await?;
        tracing::info!(%user_id, "email sign-up complete");
        Ok(StepReply { outcome: StepOutcome::Terminal(Route::Dashboard), signed_in: Some(user_id) })
    }

    /// Compensating deletion after failed provisioning. Best effort: a
    /// failed deletion is logged, not retried.
    async fn roll_back(&self, key: &str, user_id: Uuid) -> Result<StepReply, SignUpError> {
        if let Err(e) = self.identity.remove_user(user_id).await {
            tracing::error!(%user_id, error = %e, "compensating identity deletion failed");
        }
        self.sessions.clear(key).await?;
        Ok(StepOutcome::Terminal(Route::SignUp).into())
    }
}

#[cfg(test)]
#[path = "signup_test.rs"]
mod tests;
