// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed view of server-sent events.

use crate::frame::Frame;
use outpost_core::events::inbound;
use outpost_core::{Command, UpdateDescriptor};
use tracing::warn;

/// A recognized inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Handshake accepted.
    AuthSuccess,
    /// Handshake rejected.
    AuthFailed {
        /// Server-provided reason, when any.
        reason: String,
    },
    /// A command to enqueue.
    CommandExecute(Command),
    /// A release push.
    NewVersionAvailable(UpdateDescriptor),
}

impl InboundEvent {
    /// Parse a frame into a typed event.
    ///
    /// Unknown event names and undecodable payloads are logged and
    /// dropped (`None`); the connection stays up.
    pub fn parse(frame: &Frame) -> Option<Self> {
        match frame.event.as_str() {
            inbound::AUTH_SUCCESS => Some(Self::AuthSuccess),
            inbound::AUTH_FAILED => {
                let reason = frame
                    .data
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unspecified")
                    .to_string();
                Some(Self::AuthFailed { reason })
            }
            inbound::COMMAND_EXECUTE => match serde_json::from_value(frame.data.clone()) {
                Ok(command) => Some(Self::CommandExecute(command)),
                Err(e) => {
                    warn!(target: "outpost.channel", error = %e, "dropping undecodable command:execute");
                    None
                }
            },
            inbound::NEW_VERSION_AVAILABLE => match serde_json::from_value(frame.data.clone()) {
                Ok(descriptor) => Some(Self::NewVersionAvailable(descriptor)),
                Err(e) => {
                    warn!(
                        target: "outpost.channel",
                        error = %e,
                        "dropping undecodable agent:new_version_available"
                    );
                    None
                }
            },
            other => {
                warn!(target: "outpost.channel", event = other, "dropping unknown event");
                None
            }
        }
    }
}
