// SPDX-License-Identifier: MIT OR Apache-2.0
//! Control-channel event vocabulary.
//!
//! The event-name sets are closed: unknown inbound events are logged and
//! dropped by the channel dispatcher, and no component emits outside the
//! outbound set.

use serde::{Deserialize, Serialize};

/// Events the server sends to the agent.
pub mod inbound {
    /// Handshake accepted.
    pub const AUTH_SUCCESS: &str = "auth:success";
    /// Handshake rejected; payload carries a reason.
    pub const AUTH_FAILED: &str = "auth:failed";
    /// A command to enqueue.
    pub const COMMAND_EXECUTE: &str = "command:execute";
    /// A release push notification.
    pub const NEW_VERSION_AVAILABLE: &str = "agent:new_version_available";
}

/// Events the agent sends to the server.
pub mod outbound {
    /// Periodic resource snapshot.
    pub const STATUS_UPDATE: &str = "agent:status_update";
    /// Result of one command.
    pub const COMMAND_RESULT: &str = "agent:command_result";
    /// Update engine progress / terminal status.
    pub const UPDATE_STATUS: &str = "agent:update_status";
}

/// Payload of [`outbound::STATUS_UPDATE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// CPU utilisation percentage, one decimal.
    pub cpu_usage: f64,
    /// RAM utilisation percentage, one decimal.
    pub ram_usage: f64,
    /// Disk utilisation percentage, one decimal.
    pub disk_usage: f64,
}

/// Payload of [`outbound::UPDATE_STATUS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    /// Coarse status tag (`update_started`, `update_failed`).
    pub status: String,
    /// Version the update engine is acting on.
    pub target_version: String,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_update_round_trips() {
        let s = StatusUpdate {
            cpu_usage: 12.5,
            ram_usage: 48.1,
            disk_usage: 73.0,
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: StatusUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn update_status_omits_absent_message() {
        let s = UpdateStatus {
            status: "update_started".into(),
            target_version: "2.0.0".into(),
            message: None,
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("message"));
    }
}
