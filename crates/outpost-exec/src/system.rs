// SPDX-License-Identifier: MIT OR Apache-2.0
//! Predefined safe host actions (`system` commands).

use crate::handlers::{CommandHandler, ExecContext};
use crate::process::run_argv;
use outpost_core::{Command, CommandResult};
use std::str::FromStr;

/// The closed set of recognized host actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    /// Restart the machine.
    Reboot,
    /// Power the machine off.
    Shutdown,
    /// End the interactive user session.
    LogOff,
}

impl FromStr for SystemAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reboot" | "restart" => Ok(Self::Reboot),
            "shutdown" | "poweroff" => Ok(Self::Shutdown),
            "logoff" | "log_off" | "log-off" => Ok(Self::LogOff),
            _ => Err(()),
        }
    }
}

impl SystemAction {
    /// Platform argv implementing this action.
    pub fn argv(&self) -> Vec<String> {
        if cfg!(windows) {
            match self {
                Self::Reboot => vec!["shutdown".into(), "/r".into(), "/t".into(), "0".into()],
                Self::Shutdown => vec!["shutdown".into(), "/s".into(), "/t".into(), "0".into()],
                Self::LogOff => vec!["shutdown".into(), "/l".into()],
            }
        } else {
            match self {
                Self::Reboot => vec!["systemctl".into(), "reboot".into()],
                Self::Shutdown => vec!["systemctl".into(), "poweroff".into()],
                Self::LogOff => {
                    let account = std::env::var("USER").unwrap_or_default();
                    vec!["loginctl".into(), "terminate-user".into(), account]
                }
            }
        }
    }
}

/// Handler for `system` commands: validates the verb, then runs the
/// platform action. Unknown verbs are rejected before any process is
/// spawned.
pub struct SystemCommandHandler;

impl SystemCommandHandler {
    /// New handler.
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemCommandHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CommandHandler for SystemCommandHandler {
    async fn handle(&self, cmd: &Command, ctx: &ExecContext) -> CommandResult {
        let Ok(action) = cmd.payload.parse::<SystemAction>() else {
            return CommandResult::failure(
                &cmd.command_id,
                cmd.kind,
                format!("unknown system verb: {:?}", cmd.payload.trim()),
            );
        };
        run_argv(
            cmd,
            &action.argv(),
            ctx.timeout_for(cmd),
            &ctx.shutdown,
            ctx.shutdown_grace,
        )
        .await
    }
}
