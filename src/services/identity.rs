//! Identity provider: the auth system the sign-up flows write into.
//!
//! ARCHITECTURE
//! ============
//! Identities live in the `users` table. Email sign-up stores an argon2id
//! PHC hash; social sign-on links a Google subject to the identity with the
//! same email (account linking), creating it when absent. Login sessions
//! are delegated to `services::session`.
//!
//! The step handler only sees the `IdentityProvider` trait, so tests swap
//! in an in-memory double.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::Rng;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::session::{self, SessionUser};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid email")]
    InvalidEmail,
    #[error("password is required")]
    MissingPassword,
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("social email is not verified")]
    UnverifiedEmail,
    #[error("identity {0} not found")]
    NotFound(Uuid),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Email/password identity to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub name: String,
    pub email: String,
    pub password: String,
    pub image: Option<String>,
}

/// Profile handed over by a social sign-on provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialProfile {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub image: Option<String>,
}

/// Result of a social upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocialIdentity {
    pub id: Uuid,
    /// True when this login created the identity.
    pub created: bool,
}

/// What a social login with an unknown subject does about the identity
/// already holding its email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialMatch {
    Create,
    Link(Uuid),
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_user(&self, identity: NewIdentity) -> Result<Uuid, IdentityError>;

    /// Administrative removal. Cascades to the identity's login sessions.
    async fn remove_user(&self, user_id: Uuid) -> Result<(), IdentityError>;

    async fn list_user_ids(&self) -> Result<Vec<Uuid>, IdentityError>;

    /// Find the identity by provider subject, else link or create by email.
    async fn upsert_social(&self, profile: SocialProfile) -> Result<SocialIdentity, IdentityError>;

    /// Identity id for matching credentials, `None` on mismatch.
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<Uuid>, IdentityError>;

    async fn create_session(&self, user_id: Uuid) -> Result<String, IdentityError>;

    async fn validate_session(&self, token: &str) -> Result<Option<SessionUser>, IdentityError>;

    async fn delete_session(&self, token: &str) -> Result<(), IdentityError>;
}

// =============================================================================
// HELPERS
// =============================================================================

#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(normalized)
}

/// Hash a password into an argon2id PHC string with a random salt.
pub fn hash_password(password: &str) -> Result<String, IdentityError> {
    let salt_bytes: [u8; 16] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| IdentityError::PasswordHash(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::PasswordHash(e.to_string()))
}

#[must_use]
pub fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc)
        .and_then(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed))
        .is_ok()
}

/// Account linking by email. `existing` is the identity holding the
/// email and its linked subject; a linked subject always differs from
/// the incoming one, since subject lookup runs first.
pub fn match_by_email(
    existing: Option<(Uuid, Option<&str>)>,
    email_verified: bool,
) -> Result<SocialMatch, IdentityError> {
    match existing {
        None => Ok(SocialMatch::Create),
        Some((_, Some(_))) => Err(IdentityError::EmailTaken),
        Some((_, None)) if !email_verified => Err(IdentityError::UnverifiedEmail),
        Some((id, None)) => Ok(SocialMatch::Link(id)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// =============================================================================
// POSTGRES
// =============================================================================

#[derive(Clone)]
pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn create_user(&self, identity: NewIdentity) -> Result<Uuid, IdentityError> {
        let email = normalize_email(&identity.email).ok_or(IdentityError::InvalidEmail)?;
        if identity.password.is_empty() {
            return Err(IdentityError::MissingPassword);
        }
        let password_hash = hash_password(&identity.password)?;

        let row = sqlx::query(
            r"INSERT INTO users (name, email, image, password_hash)
              VALUES ($1, $2, $3, $4)
              RETURNING id",
        )
        .bind(&identity.name)
        .bind(&email)
        .bind(&identity.image)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| if is_unique_violation(&e) { IdentityError::EmailTaken } else { IdentityError::Db(e) })?;

        let id: Uuid = row.get("id");
        tracing::info!(user_id = %id, "identity created");
        Ok(id)
    }

    async fn remove_user(&self, user_id: Uuid) -> Result<(), IdentityError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound(user_id));
        }
        tracing::info!(%user_id, "identity removed");
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<Uuid>, IdentityError> {
        let ids = sqlx::query_scalar("SELECT id FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn upsert_social(&self, profile: SocialProfile) -> Result<SocialIdentity, IdentityError> {
        let email = normalize_email(&profile.email).ok_or(IdentityError::InvalidEmail)?;
        let mut tx = self.pool.begin().await?;

        let known: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE google_sub = $1")
            .bind(&profile.subject)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(id) = known {
            tx.commit().await?;
            return Ok(SocialIdentity { id, created: false });
        }

        let row = sqlx::query("SELECT id, google_sub FROM users WHERE email = $1 FOR UPDATE")
            .bind(&email)
            .fetch_optional(&mut *tx)
            .await?;
        let holder: Option<(Uuid, Option<String>)> = row.map(|r| (r.get("id"), r.get("google_sub")));
        let existing = holder.as_ref().map(|(id, sub)| (*id, sub.as_deref()));

        let identity = match match_by_email(existing, profile.email_verified)? {
            SocialMatch::Link(id) => {
                sqlx::query("UPDATE users SET google_sub = $2, image = COALESCE(image, $3) WHERE id = $1")
                    .bind(id)
                    .bind(&profile.subject)
                    .bind(&profile.image)
                    .execute(&mut *tx)
                    .await?;
                tracing::info!(user_id = %id, "google account linked");
                SocialIdentity { id, created: false }
            }
            SocialMatch::Create => {
                let id: Uuid = sqlx::query_scalar(
                    r"INSERT INTO users (name, email, image, google_sub)
                      VALUES ($1, $2, $3, $4)
                      RETURNING id",
                )
                .bind(&profile.name)
                .bind(&email)
                .bind(&profile.image)
                .bind(&profile.subject)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| if is_unique_violation(&e) { IdentityError::EmailTaken } else { IdentityError::Db(e) })?;
                tracing::info!(user_id = %id, "identity created from google sign-on");
                SocialIdentity { id, created: true }
            }
        };

        tx.commit().await?;
        Ok(identity)
    }

    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<Uuid>, IdentityError> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| {
            let hash: Option<String> = r.get("password_hash");
            hash.filter(|h| verify_password(password, h))
                .map(|_| r.get("id"))
        }))
    }

    async fn create_session(&self, user_id: Uuid) -> Result<String, IdentityError> {
        Ok(session::create_session(&self.pool, user_id).await?)
    }

    async fn validate_session(&self, token: &str) -> Result<Option<SessionUser>, IdentityError> {
        Ok(session::validate_session(&self.pool, token).await?)
    }

    async fn delete_session(&self, token: &str) -> Result<(), IdentityError> {
        Ok(session::delete_session(&self.pool, token).await?)
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
