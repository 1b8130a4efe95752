// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire frames: one JSON text message per event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single control-channel message.
///
/// Both directions use the same envelope: an event name from the fixed
/// vocabulary plus an event-specific JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name (e.g. `command:execute`).
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

/// Frame decode failures.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The text message is not a frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Frame {
    /// Frame with an event name and payload.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Encode for the wire.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("frames serialize infallibly")
    }

    /// Decode a received text message.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }
}
