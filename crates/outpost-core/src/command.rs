// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server-dispatched commands and their results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Hard cap on the command payload, in characters.
///
/// A payload of exactly this length is accepted; one character more is
/// rejected before the command reaches the queue.
pub const MAX_PAYLOAD_CHARS: usize = 2000;

/// Recognized command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Platform-default interpreter.
    Console,
    /// Windows `cmd.exe`.
    Cmd,
    /// PowerShell.
    Powershell,
    /// POSIX shell.
    Bash,
    /// Predefined safe host action (reboot, shutdown, logoff).
    System,
    /// Local service control (start, stop, restart, status).
    Service,
}

impl CommandKind {
    /// Stable lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Cmd => "cmd",
            Self::Powershell => "powershell",
            Self::Bash => "bash",
            Self::System => "system",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single command dispatched over the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Server-assigned unique id; duplicates are rejected while the first
    /// instance is still pending or running.
    pub command_id: String,
    /// What to do.
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Kind-specific payload (shell text, system verb, "verb service").
    pub payload: String,
    /// Per-command execution timeout override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,
    /// Working directory for interpreter commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Structural validation failures for an inbound [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandValidationError {
    /// The command id is empty.
    #[error("command id must not be empty")]
    EmptyId,
    /// The payload exceeds [`MAX_PAYLOAD_CHARS`].
    #[error("payload too long: {len} chars (max {MAX_PAYLOAD_CHARS})")]
    PayloadTooLong {
        /// Actual payload length in characters.
        len: usize,
    },
}

impl Command {
    /// Validate the structural invariants the executor relies on.
    pub fn validate(&self) -> Result<(), CommandValidationError> {
        if self.command_id.is_empty() {
            return Err(CommandValidationError::EmptyId);
        }
        let len = self.payload.chars().count();
        if len > MAX_PAYLOAD_CHARS {
            return Err(CommandValidationError::PayloadTooLong { len });
        }
        Ok(())
    }
}

/// How a command run ended, for result constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    /// The handler ran to completion (exit code decides success).
    Completed,
    /// The command never produced a process or handler output.
    Failed,
}

/// Outcome of a command, delivered back to the server exactly once per
/// accepted command (at-least-once across spool replays).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Id of the command this result answers.
    pub command_id: String,
    /// Kind of the originating command.
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Whether the command succeeded.
    pub success: bool,
    /// Captured standard output (UTF-8, lossy).
    pub stdout: String,
    /// Captured standard error (UTF-8, lossy).
    pub stderr: String,
    /// Process exit code, when a process ran to completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Stable failure tag plus human detail, when the command failed
    /// without a clean exit code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the result was produced.
    pub completed_at: DateTime<Utc>,
}

impl CommandResult {
    /// Result for a process that ran to completion.
    pub fn completed(
        command: &Command,
        exit_code: i32,
        stdout: String,
        stderr: String,
    ) -> Self {
        Self {
            command_id: command.command_id.clone(),
            kind: command.kind,
            success: exit_code == 0,
            stdout,
            stderr,
            exit_code: Some(exit_code),
            error_message: None,
            completed_at: Utc::now(),
        }
    }

    /// Synthesized failure carrying a stable error tag.
    ///
    /// Used for rejections (queue full, duplicate id, oversized payload),
    /// spawn failures, and timeouts.
    pub fn failure(
        command_id: impl Into<String>,
        kind: CommandKind,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            kind,
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error_message: Some(error_message.into()),
            completed_at: Utc::now(),
        }
    }

    /// Attach output captured before the failure (timeout partial capture).
    pub fn with_captured(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }
}
