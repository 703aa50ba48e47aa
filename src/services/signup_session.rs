//! Sign-up session data and its stores.
//!
//! DESIGN
//! ======
//! A sign-up attempt spans several requests, so its partial data lives
//! server-side keyed by the `signup_session` cookie. The wizard `state`
//! gates which fields count as complete: `account_data()` and `user_data()`
//! only hand out a field once the state has moved past the step that
//! produced it.
//!
//! Stores sit behind `SignUpSessionStore` so the step handler never touches
//! storage directly. `PgSignUpSessionStore` persists JSONB rows with a
//! one-day expiry; `MemorySignUpSessionStore` keeps a map in process.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

// =============================================================================
// STATE
// =============================================================================

/// Wizard position of a sign-up attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignUpState {
    Email,
    UserData,
    PaymentInfo,
    SocialSignOn,
    Success,
}

impl SignUpState {
    /// Progress rank. Social sign-on enters the wizard with an account
    /// already in hand, so it ranks with `UserData`.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Email => 0,
            Self::UserData | Self::SocialSignOn => 1,
            Self::PaymentInfo => 2,
            Self::Success => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::UserData => "user-data",
            Self::PaymentInfo => "payment-info",
            Self::SocialSignOn => "social-sign-on",
            Self::Success => "success",
        }
    }
}

// =============================================================================
// STEP DATA
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_ref: Option<String>,
}

impl AccountData {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_owned()
    }

    /// Build account data from a provider display name. The first name is
    /// everything before the first space, the last name everything after it,
    /// untrimmed.
    #[must_use]
    pub fn from_display_name(name: &str, email: &str) -> Self {
        let (first, last) = name.split_once(' ').unwrap_or((name, ""));
        Self {
            first_name: first.to_owned(),
            last_name: last.to_owned(),
            email: email.to_owned(),
            password: None,
            confirm_password: None,
            profile_image_ref: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub primary_care_specialist: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub card_holder_name: String,
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentInfoError {
    #[error("card holder name is required")]
    MissingHolder,
    #[error("card number must be between 13 and 19 digits")]
    CardNumber,
    #[error("expiry month must be 01-12")]
    ExpiryMonth,
    #[error("expiry year must be 4 digits")]
    ExpiryYear,
    #[error("CVV must be 3 or 4 digits")]
    Cvv,
}

fn all_digits(s: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

impl PaymentInfo {
    /// Check the field formats the payment form enforces.
    pub fn validate(&self) -> Result<(), PaymentInfoError> {
        if self.card_holder_name.trim().is_empty() {
            return Err(PaymentInfoError::MissingHolder);
        }
        if !all_digits(&self.card_number, 13, 19) {
            return Err(PaymentInfoError::CardNumber);
        }
        let month_ok = all_digits(&self.expiry_month, 2, 2)
            && matches!(self.expiry_month.parse::<u8>(), Ok(1..=12));
        if !month_ok {
            return Err(PaymentInfoError::ExpiryMonth);
        }
        if !all_digits(&self.expiry_year, 4, 4) {
            return Err(PaymentInfoError::ExpiryYear);
        }
        if !all_digits(&self.cvv, 3, 4) {
            return Err(PaymentInfoError::Cvv);
        }
        Ok(())
    }

    /// Card number reduced to its last four digits.
    #[must_use]
    pub fn masked_card_number(&self) -> String {
        let count = self.card_number.chars().count();
        let tail: String = self.card_number.chars().skip(count.saturating_sub(4)).collect();
        format!("**** {tail}")
    }
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SignUpState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_data: Option<AccountData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_info: Option<PaymentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_user_id: Option<Uuid>,
}

impl SignUpSession {
    fn reached(&self, rank: u8) -> bool {
        self.state.is_some_and(|s| s.rank() >= rank)
    }

    /// Account data, once the account step has completed.
    #[must_use]
    pub fn account_data(&self) -> Option<&AccountData> {
        self.account_data.as_ref().filter(|_| self.reached(1))
    }

    /// User data, once the user-data step has completed.
    #[must_use]
    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref().filter(|_| self.reached(2))
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == Some(SignUpState::Success)
    }

    /// Shallow merge: every field present in `patch` replaces the stored one.
    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(state) = patch.state {
            self.state = Some(state);
        }
        if let Some(account) = patch.account_data {
            self.account_data = Some(account);
        }
        if let Some(user) = patch.user_data {
            self.user_data = Some(user);
        }
        if let Some(payment) = patch.payment_info {
            self.payment_info = Some(payment);
        }
        if let Some(id) = patch.created_user_id {
            self.created_user_id = Some(id);
        }
    }
}

/// Partial session update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub state: Option<SignUpState>,
    pub account_data: Option<AccountData>,
    pub user_data: Option<UserData>,
    pub payment_info: Option<PaymentInfo>,
    pub created_user_id: Option<Uuid>,
}

impl SessionPatch {
    #[must_use]
    pub fn state(state: SignUpState) -> Self {
        Self { state: Some(state), ..Self::default() }
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("session payload corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Client-scoped sign-up session storage.
#[async_trait::async_trait]
pub trait SignUpSessionStore: Send + Sync {
    /// Current session, or the default session when none exists.
    async fn read(&self, key: &str) -> Result<SignUpSession, SessionStoreError>;

    /// Shallow-merge `patch` into the stored session.
    async fn update(&self, key: &str, patch: SessionPatch) -> Result<(), SessionStoreError>;

    async fn clear(&self, key: &str) -> Result<(), SessionStoreError>;
}

/// In-process store.
#[derive(Clone, Default)]
pub struct MemorySignUpSessionStore {
    sessions: Arc<RwLock<HashMap<String, SignUpSession>>>,
}

impl MemorySignUpSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SignUpSessionStore for MemorySignUpSessionStore {
    async fn read(&self, key: &str) -> Result<SignUpSession, SessionStoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(key).cloned().unwrap_or_default())
    }

    async fn update(&self, key: &str, patch: SessionPatch) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.entry(key.to_owned()).or_default().apply(patch);
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), SessionStoreError> {
        self.sessions.write().await.remove(key);
        Ok(())
    }
}

/// Postgres-backed store over the `signup_sessions` table.
#[derive(Clone)]
pub struct PgSignUpSessionStore {
    pool: PgPool,
}

impl PgSignUpSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SignUpSessionStore for PgSignUpSessionStore {
    async fn read(&self, key: &str) -> Result<SignUpSession, SessionStoreError> {
        let row = sqlx::query("SELECT data FROM signup_sessions WHERE key = $1 AND expires_at > now()")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            }
            None => Ok(SignUpSession::default()),
        }
    }

    async fn update(&self, key: &str, patch: SessionPatch) -> Result<(), SessionStoreError> {
        // Read-modify-write in one transaction so the merge sees the row it replaces.
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT data FROM signup_sessions WHERE key = $1 AND expires_at > now() FOR UPDATE")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

        let mut session = match row {
            Some(row) => serde_json::from_value::<SignUpSession>(row.get("data"))?,
            None => SignUpSession::default(),
        };
        session.apply(patch);

        sqlx::query(
            r"INSERT INTO signup_sessions (key, data)
              VALUES ($1, $2)
              ON CONFLICT (key) DO UPDATE
              SET data = EXCLUDED.data, updated_at = now(), expires_at = now() + interval '1 day'",
        )
        .bind(key)
        .bind(serde_json::to_value(&session)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), SessionStoreError> {
        sqlx::query("DELETE FROM signup_sessions WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "signup_session_test.rs"]
mod tests;
