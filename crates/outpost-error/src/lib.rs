// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable error taxonomy for the Outpost endpoint agent.
//!
//! Every reportable agent error carries an [`ErrorCode`], a
//! machine-readable tag whose string form never changes across releases,
//! plus a human-readable message, an optional cause, and structured
//! context. [`ErrorReport`] is the DTO posted to the server's
//! `/agents/errors` endpoint.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Persisted runtime configuration problems.
    Config,
    /// Sealed-token protection problems.
    Vault,
    /// Server reachability and authentication problems.
    Server,
    /// Self-update pipeline problems.
    Update,
    /// Command queueing and execution problems.
    Command,
    /// Token refresh problems needing human attention.
    Token,
    /// Catch-all for unexpected internal failures.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Vault => "vault",
            Self::Server => "server",
            Self::Update => "update",
            Self::Command => "command",
            Self::Token => "token",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// The string form (`as_str`) is the wire contract used in error reports
/// and in synthesized command results; it is guaranteed not to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // -- Config --
    /// `runtime_config.json` is absent or missing required fields.
    ConfigMissing,
    /// `runtime_config.json` exists but cannot be parsed or validated.
    ConfigCorrupt,

    // -- Vault --
    /// The sealed token did not unseal on this host/account context.
    VaultUnsealFailed,

    // -- Server --
    /// Transport-level failure talking to the server.
    ServerUnreachable,
    /// The server rejected the agent's credentials.
    ServerAuthFailed,

    // -- Update --
    /// Package download failed.
    DownloadFailed,
    /// Package or manifest-listed file digest mismatch.
    ChecksumMismatch,
    /// Package extraction failed.
    ExtractionFailed,
    /// Package structure or manifest is invalid.
    InvalidPackage,
    /// The external updater could not be launched.
    UpdateLaunchFailed,
    /// Any other update-pipeline failure.
    UpdateGeneralFailure,

    // -- Command --
    /// The command queue is at capacity.
    QueueFull,
    /// A command id was received while already pending or running.
    DuplicateCommandId,
    /// No handler is registered for the command type.
    UnsupportedCommandType,
    /// The command exceeded its execution timeout.
    CommandTimeout,
    /// The command process could not be spawned.
    CommandSpawnFailed,

    // -- Token --
    /// A refresh needs MFA, which cannot be satisfied unattended.
    TokenRefreshMfaRequired,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// The broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigMissing | Self::ConfigCorrupt => ErrorCategory::Config,

            Self::VaultUnsealFailed => ErrorCategory::Vault,

            Self::ServerUnreachable | Self::ServerAuthFailed => ErrorCategory::Server,

            Self::DownloadFailed
            | Self::ChecksumMismatch
            | Self::ExtractionFailed
            | Self::InvalidPackage
            | Self::UpdateLaunchFailed
            | Self::UpdateGeneralFailure => ErrorCategory::Update,

            Self::QueueFull
            | Self::DuplicateCommandId
            | Self::UnsupportedCommandType
            | Self::CommandTimeout
            | Self::CommandSpawnFailed => ErrorCategory::Command,

            Self::TokenRefreshMfaRequired => ErrorCategory::Token,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable string form (e.g. `"ChecksumMismatch"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMissing => "ConfigMissing",
            Self::ConfigCorrupt => "ConfigCorrupt",
            Self::VaultUnsealFailed => "VaultUnsealFailed",
            Self::ServerUnreachable => "ServerUnreachable",
            Self::ServerAuthFailed => "ServerAuthFailed",
            Self::DownloadFailed => "DownloadFailed",
            Self::ChecksumMismatch => "ChecksumMismatch",
            Self::ExtractionFailed => "ExtractionFailed",
            Self::InvalidPackage => "InvalidPackage",
            Self::UpdateLaunchFailed => "UpdateLaunchFailed",
            Self::UpdateGeneralFailure => "UpdateGeneralFailure",
            Self::QueueFull => "QueueFull",
            Self::DuplicateCommandId => "DuplicateCommandId",
            Self::UnsupportedCommandType => "UnsupportedCommandType",
            Self::CommandTimeout => "CommandTimeout",
            Self::CommandSpawnFailed => "CommandSpawnFailed",
            Self::TokenRefreshMfaRequired => "TokenRefreshMfaRequired",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AgentError
// ---------------------------------------------------------------------------

/// A reportable agent error.
///
/// # Builder usage
///
/// ```
/// use outpost_error::{AgentError, ErrorCode};
///
/// let err = AgentError::new(ErrorCode::DownloadFailed, "connection reset mid-stream")
///     .with_context("url", "https://server/agents/updates/download/pkg.zip")
///     .with_context("bytes_received", 1_048_576);
/// ```
pub struct AgentError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl AgentError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// Values that fail to serialise are silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Build the server-bound report for this error.
    pub fn to_report(&self, target_version: Option<&str>) -> ErrorReport {
        ErrorReport {
            error_type: self.code,
            error_message: self.message.clone(),
            target_version: target_version.map(str::to_owned),
            custom_details: if self.context.is_empty() {
                None
            } else {
                Some(self.context.clone())
            },
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Debug for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("AgentError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// ErrorReport
// ---------------------------------------------------------------------------

/// Structured error submission posted to `/agents/errors`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    /// Stable error tag.
    pub error_type: ErrorCode,
    /// Human-readable message.
    pub error_message: String,
    /// Release version involved, for update errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    /// Structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_details: Option<BTreeMap<String, serde_json::Value>>,
    /// When the error occurred.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
