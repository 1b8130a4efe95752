// SPDX-License-Identifier: MIT OR Apache-2.0
//! The enrolment (configure) flow.
//!
//! Alternate entry point: establishes identity with the server, seals
//! the issued token, persists the runtime config, and exits. MFA is
//! only ever required here; the running agent never prompts.

use outpost_config::{ConfigError, ConfigStore, RuntimeConfig};
use outpost_core::{AgentIdentity, Position, PositionError};
use outpost_http::wire::{EnrolmentStatus, IdentifyRequest, MfaRequest};
use outpost_http::{AgentHttpClient, HttpError};
use outpost_vault::{TokenVault, VaultError};
use tracing::info;

/// Inputs to the configure flow (interactive prompts happen in the
/// binary; this is the programmatic surface).
#[derive(Debug, Clone)]
pub struct ConfigureOptions {
    /// Declared room name.
    pub room_name: String,
    /// Declared grid column.
    pub pos_x: i64,
    /// Declared grid row.
    pub pos_y: i64,
    /// MFA code, when the operator already has one.
    pub mfa_code: Option<String>,
}

/// Configure failures, each with a distinct operator-facing story.
#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    /// The declared position is invalid locally.
    #[error("invalid position: {0}")]
    InvalidPosition(#[from] PositionError),
    /// The server rejected the declared position.
    #[error("server rejected position: {0}")]
    PositionRejected(String),
    /// The server requires an MFA code and none was provided.
    #[error("MFA code required")]
    MfaRequired,
    /// The provided MFA code was rejected.
    #[error("MFA verification failed: {0}")]
    MfaRejected(String),
    /// The server could not be reached.
    #[error("server unreachable: {0}")]
    Server(#[from] HttpError),
    /// The issued token could not be protected at rest.
    #[error("token protection failed: {0}")]
    Vault(#[from] VaultError),
    /// The runtime config could not be persisted.
    #[error("config persistence failed: {0}")]
    Store(#[from] ConfigError),
    /// The server answered with an unusable status.
    #[error("enrolment rejected: {0}")]
    Rejected(String),
}

/// Run the configure flow. On success the runtime config on disk is
/// complete and `start` will reach `Connected` without further input.
pub async fn configure(
    options: ConfigureOptions,
    http: &AgentHttpClient,
    vault: &dyn TokenVault,
    store: &ConfigStore,
) -> Result<AgentIdentity, ConfigureError> {
    let position = Position::new(options.room_name.clone(), options.pos_x, options.pos_y)?;

    // Keep the agent id (and ignore list) across re-configures; generate
    // only on first enrolment.
    let (agent_id, prior_ignored) = match store.load() {
        Ok(existing) => (existing.agent_id, existing.ignored_versions),
        Err(_) => (
            AgentIdentity::generate(position.clone()).agent_id,
            Default::default(),
        ),
    };

    info!(target: "outpost.runtime", %agent_id, position = %position, "configuring agent");

    let response = http
        .identify(&IdentifyRequest {
            agent_id: agent_id.clone(),
            position: position.clone(),
            force_renew: false,
        })
        .await?;

    let token = match (response.status, response.agent_token) {
        (EnrolmentStatus::Success, Some(token)) => token,
        (EnrolmentStatus::MfaRequired, _) => {
            let code = options.mfa_code.ok_or(ConfigureError::MfaRequired)?;
            let verified = http
                .verify_mfa(&MfaRequest {
                    agent_id: agent_id.clone(),
                    mfa_code: code,
                })
                .await?;
            match (verified.status, verified.agent_token) {
                (EnrolmentStatus::Success, Some(token)) => token,
                (_, _) => {
                    return Err(ConfigureError::MfaRejected(
                        verified.message.unwrap_or_else(|| "code rejected".into()),
                    ));
                }
            }
        }
        (EnrolmentStatus::PositionError, _) => {
            return Err(ConfigureError::PositionRejected(
                response.message.unwrap_or_else(|| "position refused".into()),
            ));
        }
        (status, _) => {
            return Err(ConfigureError::Rejected(
                response.message.unwrap_or_else(|| format!("{status:?}")),
            ));
        }
    };

    // Seal bound to this install: the agent id is the extra entropy.
    let sealed = vault.seal(token.as_bytes(), Some(agent_id.as_bytes()))?;

    let identity = AgentIdentity {
        agent_id,
        position,
    };
    let mut config = RuntimeConfig::new(identity.clone(), sealed);
    config.ignored_versions = prior_ignored;
    store.save(&config)?;

    info!(target: "outpost.runtime", agent_id = %identity.agent_id, "configuration persisted");
    Ok(identity)
}
