// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable runtime configuration for the Outpost endpoint agent.
//!
//! One JSON file (`runtime_config.json`) holds the agent identity, the
//! sealed token, and the ignored-version set. All writes go through
//! write-temp-then-rename in the config's own directory, so a crash at
//! any point leaves the previous file intact and readers observe either
//! the old or the new file, never a torn one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use outpost_core::{AgentIdentity, Position, SealedToken};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors loading or persisting the runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file does not exist yet (fresh install).
    #[error("runtime config not found at {path}")]
    Missing {
        /// Path that was looked up.
        path: PathBuf,
    },
    /// The file exists but is not valid config JSON.
    #[error("runtime config corrupt: {reason}")]
    Corrupt {
        /// Parse or validation detail.
        reason: String,
    },
    /// A required field is absent or structurally invalid.
    #[error("runtime config incomplete: {field}")]
    Incomplete {
        /// Name of the offending field.
        field: &'static str,
    },
    /// Filesystem failure reading or writing.
    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// The persisted agent state.
///
/// Unknown fields are tolerated on load (forward compatibility); the
/// known fields are validated strictly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Opaque agent identifier assigned at configure time.
    pub agent_id: String,
    /// Host-bound encrypted bearer token.
    pub sealed_token: SealedToken,
    /// Workstation placement.
    pub position: Position,
    /// Versions that failed to install and must not be retried.
    #[serde(default)]
    pub ignored_versions: BTreeSet<String>,
}

impl RuntimeConfig {
    /// Assemble a config from an enrolment result.
    pub fn new(identity: AgentIdentity, sealed_token: SealedToken) -> Self {
        Self {
            agent_id: identity.agent_id,
            sealed_token,
            position: identity.position,
            ignored_versions: BTreeSet::new(),
        }
    }

    /// Validate the invariants normal-mode startup requires.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_id.trim().is_empty() {
            return Err(ConfigError::Incomplete { field: "agent_id" });
        }
        if self
            .position
            .validate()
            .is_err()
        {
            return Err(ConfigError::Incomplete { field: "position" });
        }
        Ok(())
    }

    /// The identity view of this config.
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            agent_id: self.agent_id.clone(),
            position: self.position.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

/// Owner of the on-disk config file.
///
/// All mutations flow through this type; other components receive value
/// snapshots.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a config file exists at all.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load and validate the config.
    pub fn load(&self) -> Result<RuntimeConfig, ConfigError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing {
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let config: RuntimeConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Corrupt {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Persist `config` atomically (write-temp-then-rename in the same
    /// directory).
    pub fn save(&self, config: &RuntimeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, config).map_err(|e| ConfigError::Corrupt {
            reason: e.to_string(),
        })?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| ConfigError::Io(e.error))?;
        debug!(target: "outpost.config", path = %self.path.display(), "runtime config persisted");
        Ok(())
    }

    /// Swap the sealed token, persisting before returning.
    ///
    /// The previous file stays intact if the write fails.
    pub fn replace_sealed_token(&self, sealed: SealedToken) -> Result<RuntimeConfig, ConfigError> {
        let mut config = self.load()?;
        config.sealed_token = sealed;
        self.save(&config)?;
        Ok(config)
    }

    /// Add a version to the ignore set and persist.
    pub fn add_ignored_version(&self, version: &str) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        if config.ignored_versions.insert(version.to_string()) {
            self.save(&config)?;
        }
        Ok(())
    }

    /// Whether `version` is in the persisted ignore set.
    pub fn is_ignored(&self, version: &str) -> Result<bool, ConfigError> {
        Ok(self.load()?.ignored_versions.contains(version))
    }
}
