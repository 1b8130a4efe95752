// SPDX-License-Identifier: MIT OR Apache-2.0
//! The agent lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the agent process.
///
/// The orchestrator owns all transitions; other components only observe
/// the current state through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Loading configuration and composing components.
    Initializing,
    /// Running the enrolment flow instead of normal service.
    Configuring,
    /// Attempting the control-channel handshake.
    Connecting,
    /// Authenticated session established.
    Connected,
    /// Session lost; reconnect loop active, execution continues offline.
    Disconnected,
    /// An update is staged and hand-off is in progress.
    Updating,
    /// Shutdown broadcast sent; draining workers.
    Stopping,
    /// Clean final state.
    Stopped,
    /// Fatal final state (process exits non-zero).
    Error,
}

impl AgentState {
    /// Whether a transition from `self` to `next` is part of the lifecycle
    /// relation.
    ///
    /// `Updating`, `Stopping`, and `Error` are reachable from any
    /// non-final state.
    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;
        if self.is_final() {
            return false;
        }
        // Universal edges available from every live state.
        if matches!(next, Updating | Stopping | Error) {
            return true;
        }
        matches!(
            (self, next),
            (Initializing, Connecting)
                | (Initializing, Configuring)
                | (Configuring, Stopped)
                | (Connecting, Connected)
                | (Connected, Disconnected)
                | (Disconnected, Connecting)
                | (Disconnected, Connected)
                | (Updating, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Final states admit no further transitions.
    pub fn is_final(&self) -> bool {
        matches!(self, AgentState::Stopped | AgentState::Error)
    }

    /// Stable snake_case name (matches the serde form).
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Initializing => "initializing",
            AgentState::Configuring => "configuring",
            AgentState::Connecting => "connecting",
            AgentState::Connected => "connected",
            AgentState::Disconnected => "disconnected",
            AgentState::Updating => "updating",
            AgentState::Stopping => "stopping",
            AgentState::Stopped => "stopped",
            AgentState::Error => "error",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
