// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serialized token refresh.
//!
//! Refresh is reactive only: it runs when the server rejects the current
//! token (HTTP 401 or channel `auth:failed`), never on a timer.
//! Overlapping callers coalesce: whoever holds the refresh lock performs
//! one `identify(force_renew=true)`; waiters that entered before the
//! swap observe the result instead of issuing their own call.

use outpost_config::ConfigStore;
use outpost_core::{AgentIdentity, SharedToken};
use outpost_http::wire::{EnrolmentStatus, IdentifyRequest};
use outpost_http::{AgentHttpClient, HttpError, TokenRefresher};
use outpost_vault::TokenVault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Errors from a refresh attempt.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The server wants MFA, which cannot be satisfied unattended.
    #[error("token refresh requires MFA")]
    MfaRequired,
    /// The server refused the renewal.
    #[error("token refresh rejected: {0}")]
    Rejected(String),
    /// Transport-level failure.
    #[error("token refresh transport failure: {0}")]
    Transport(#[from] HttpError),
    /// The fresh token could not be sealed for persistence.
    #[error("token refresh could not seal the new token: {0}")]
    Seal(#[from] outpost_vault::VaultError),
    /// The sealed token could not be persisted.
    #[error("token refresh could not persist the new token: {0}")]
    Persist(#[from] outpost_config::ConfigError),
}

/// Owner of the refresh procedure.
pub struct RefreshCoordinator {
    /// Plain client (no refresher attached): refresh must never recurse.
    http: AgentHttpClient,
    vault: Arc<dyn TokenVault>,
    store: ConfigStore,
    token: SharedToken,
    identity: AgentIdentity,
    lock: Mutex<()>,
    generation: AtomicU64,
}

impl RefreshCoordinator {
    /// Assemble the coordinator. `http` must be a client without a
    /// refresher hook.
    pub fn new(
        http: AgentHttpClient,
        vault: Arc<dyn TokenVault>,
        store: ConfigStore,
        token: SharedToken,
        identity: AgentIdentity,
    ) -> Self {
        Self {
            http,
            vault,
            store,
            token,
            identity,
            lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of completed token swaps. Diagnostic.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Perform (or coalesce into) a refresh.
    ///
    /// On success the shared token cell and the persisted sealed token
    /// both hold the new value.
    pub async fn refresh_token(&self) -> Result<(), RefreshError> {
        let observed = self.generation.load(Ordering::SeqCst);
        let _guard = self.lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != observed {
            // Someone else refreshed while we waited; observe their result.
            return Ok(());
        }

        info!(target: "outpost.runtime", agent_id = %self.identity.agent_id, "refreshing token");
        let response = self
            .http
            .identify(&IdentifyRequest {
                agent_id: self.identity.agent_id.clone(),
                position: self.identity.position.clone(),
                force_renew: true,
            })
            .await?;

        match (response.status, response.agent_token) {
            (EnrolmentStatus::Success, Some(fresh)) => {
                // Seal and persist before the in-memory swap: a crash
                // between the two leaves a usable (older) on-disk token.
                let sealed = self
                    .vault
                    .seal(fresh.as_bytes(), Some(self.identity.agent_id.as_bytes()))?;
                self.store.replace_sealed_token(sealed)?;
                self.token.set(fresh);
                self.generation.fetch_add(1, Ordering::SeqCst);
                info!(target: "outpost.runtime", "token refreshed and resealed");
                Ok(())
            }
            (EnrolmentStatus::Success, None) => {
                Err(RefreshError::Rejected("success without a token".into()))
            }
            (EnrolmentStatus::MfaRequired, _) => Err(RefreshError::MfaRequired),
            (status, _) => {
                warn!(target: "outpost.runtime", ?status, "refresh rejected by server");
                Err(RefreshError::Rejected(
                    response.message.unwrap_or_else(|| format!("{status:?}")),
                ))
            }
        }
    }
}

#[async_trait::async_trait]
impl TokenRefresher for RefreshCoordinator {
    async fn refresh(&self) -> Result<(), HttpError> {
        self.refresh_token()
            .await
            .map_err(|_| HttpError::AuthFailed)
    }
}
