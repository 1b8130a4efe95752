// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared vocabulary for the Outpost endpoint agent.
//!
//! This crate defines the data model every other Outpost crate speaks:
//! agent identity, commands and their results, update descriptors and
//! manifests, the agent state machine, the control-channel event names,
//! the on-disk path layout, and the process exit codes.
//!
//! It is deliberately behaviour-free: no I/O, no tasks, no clocks beyond
//! timestamp capture.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod events;
pub mod hardware;
pub mod identity;
pub mod paths;
pub mod shutdown;
pub mod state;
pub mod token;
pub mod update;

mod exit;

pub use command::{Command, CommandKind, CommandValidationError, MAX_PAYLOAD_CHARS};
pub use command::{CommandResult, ResultOutcome};
pub use exit::ExitCode;
pub use hardware::HardwareReport;
pub use identity::{AgentIdentity, Position, PositionError};
pub use paths::AgentPaths;
pub use shutdown::ShutdownSignal;
pub use state::AgentState;
pub use token::{SealedToken, SealedTokenError, SharedToken};
pub use update::{checksum_matches, ManifestFile, UpdateDescriptor, UpdateManifest};

/// Current agent release version, taken from the crate metadata of the
/// binary that embeds this library.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Serde helpers for durations expressed as whole seconds on the wire.
pub mod serde_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize a `Duration` as integer seconds.
    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_secs().serialize(ser)
    }

    /// Deserialize integer seconds into a `Duration`.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs: u64 = u64::deserialize(de)?;
        Ok(Duration::from_secs(secs))
    }
}
