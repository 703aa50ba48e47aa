//! Healthcare backend client: profile provisioning and existence checks.
//!
//! Every call carries the service API key header from `ApiKeyConfig`.
//! Status handling lives in the pure `provision_result` and
//! `existence_result` functions so it can be tested without a server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ApiKeyConfig, BackendConfig};

const PROVISION_PATH: &str = "/api/v1/user-provisions";
const VALIDATE_PATH: &str = "/api/v1/user-provisions/validate";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionRequest {
    pub user_id: Uuid,
    pub email: String,
    pub specialist_id: Uuid,
}

/// Outcome of an existence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    /// Every id is known to the backend.
    Found,
    /// The backend rejected the ids. Lists the unknown ones when it said which.
    NotFound { invalid_ids: Vec<Uuid> },
}

/// Normalized backend failure. Each variant carries a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("backend call failed: {0}")]
    Failed(String),
}

impl ProvisionError {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m) | Self::Unauthorized(m) | Self::Failed(m) => m,
        }
    }
}

/// Calls to the healthcare backend.
#[async_trait::async_trait]
pub trait HealthBackend: Send + Sync {
    /// Register a profile for a freshly created identity.
    async fn provision(&self, request: &ProvisionRequest) -> Result<(), ProvisionError>;

    /// Check whether the backend already knows these identity ids.
    async fn validate(&self, ids: &[Uuid]) -> Result<Existence, ProvisionError>;
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct ValidateRequest<'a> {
    ids: &'a [Uuid],
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    messages: Option<BTreeMap<String, String>>,
    #[serde(default)]
    invalid_ids: Option<Vec<Uuid>>,
}

fn parse_error_body(body: &str) -> ErrorBody {
    serde_json::from_str(body).unwrap_or_default()
}

// =============================================================================
// STATUS MAPPING
// =============================================================================

/// Map a provisioning response to the gateway result. Only 201 is success.
pub(crate) fn provision_result(status: u16, body: &str) -> Result<(), ProvisionError> {
    if status == 201 {
        return Ok(());
    }

    let parsed = parse_error_body(body);
    Err(match status {
        400 => match parsed.messages {
            Some(fields) if !fields.is_empty() => {
                let detail = serde_json::to_string(&fields).unwrap_or_default();
                ProvisionError::Validation(format!("Invalid request: {detail}"))
            }
            _ => ProvisionError::Validation("Invalid request".into()),
        },
        401 => ProvisionError::Unauthorized(parsed.message.unwrap_or_else(|| "Unauthorized".into())),
        403 => ProvisionError::Unauthorized(parsed.message.unwrap_or_else(|| "Forbidden".into())),
        other => ProvisionError::Failed(format!("unexpected status {other}")),
    })
}

/// Map an existence-check response. 200 = found, 400 = not found.
pub(crate) fn existence_result(status: u16, body: &str) -> Result<Existence, ProvisionError> {
    match status {
        200 => Ok(Existence::Found),
        400 => Ok(Existence::NotFound { invalid_ids: parse_error_body(body).invalid_ids.unwrap_or_default() }),
        401 | 403 => {
            let message = parse_error_body(body)
                .message
                .unwrap_or_else(|| format!("status {status}"));
            Err(ProvisionError::Unauthorized(message))
        }
        other => Err(ProvisionError::Failed(format!("unexpected status {other}"))),
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: ApiKeyConfig,
}

impl BackendClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, ProvisionError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ProvisionError::Failed(format!("http client build: {e}")))?;
        Ok(Self { http, base_url: config.base_url.clone(), api_key: config.api_key.clone() })
    }

    async fn post_json<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<(u16, String), ProvisionError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header(self.api_key.header_name.as_str(), self.api_key.key.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| ProvisionError::Failed(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

#[async_trait::async_trait]
impl HealthBackend for BackendClient {
    async fn provision(&self, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        let (status, body) = self.post_json(PROVISION_PATH, request).await?;
        let result = provision_result(status, &body);
        match &result {
            Ok(()) => tracing::info!(user_id = %request.user_id, "backend profile provisioned"),
            Err(e) => tracing::warn!(user_id = %request.user_id, status, error = %e, "provisioning rejected"),
        }
        result
    }

    async fn validate(&self, ids: &[Uuid]) -> Result<Existence, ProvisionError> {
        let (status, body) = self.post_json(VALIDATE_PATH, &ValidateRequest { ids }).await?;
        let result = existence_result(status, &body);
        tracing::debug!(count = ids.len(), status, ?result, "existence check");
        result
    }
}

#[cfg(test)]
#[path = "provisioning_test.rs"]
mod tests;
