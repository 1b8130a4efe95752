// SPDX-License-Identifier: MIT OR Apache-2.0
//! Orchestration for the Outpost endpoint agent.
//!
//! This crate composes the vault, config store, HTTP client, control
//! channel, executor, telemetry, and update engine into one lifecycle:
//! the [`Agent`]. It also owns the serialized token-refresh procedure
//! and the enrolment (configure) flow.

#![deny(unsafe_code)]

mod configure;
mod orchestrator;
mod refresh;
mod state;

pub use configure::{configure, ConfigureError, ConfigureOptions};
pub use orchestrator::{Agent, RunError, RunExit, RuntimeOptions};
pub use refresh::{RefreshCoordinator, RefreshError};
pub use state::StateMachine;
