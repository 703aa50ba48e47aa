//! Identity/backend reconciliation.
//!
//! Removes local identities the healthcare backend does not know, e.g.
//! leftovers of a sign-up whose compensating deletion failed.

use serde::Serialize;

use super::identity::IdentityProvider;
use super::provisioning::{Existence, HealthBackend};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub validated: usize,
    pub deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Validate every identity id against the backend and delete the unknown
/// ones. Failures end up in `SyncReport::error`, never in a `Result`.
pub async fn sync(identity: &dyn IdentityProvider, backend: &dyn HealthBackend) -> SyncReport {
    let ids = match identity.list_user_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "user sync: listing identities failed");
            return SyncReport { error: Some(e.to_string()), ..SyncReport::default() };
        }
    };
    if ids.is_empty() {
        return SyncReport::default();
    }

    let invalid_ids = match backend.validate(&ids).await {
        Ok(Existence::Found) => Vec::new(),
        Ok(Existence::NotFound { invalid_ids }) => invalid_ids,
        Err(e) => {
            tracing::error!(error = %e, "user sync: existence check failed");
            return SyncReport { validated: ids.len(), error: Some(e.message().to_owned()), ..SyncReport::default() };
        }
    };

    let mut deleted = 0;
    for user_id in invalid_ids.iter().filter(|id| ids.contains(id)) {
        match identity.remove_user(*user_id).await {
            Ok(()) => deleted += 1,
            Err(e) => tracing::warn!(%user_id, error = %e, "user sync: removal failed"),
        }
    }

    tracing::info!(validated = ids.len(), deleted, "user sync complete");
    SyncReport { validated: ids.len(), deleted, error: None }
}

#[cfg(test)]
#[path = "user_sync_test.rs"]
mod tests;
