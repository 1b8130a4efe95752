// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command queue and executor.
//!
//! Commands arrive from the control channel, wait in a bounded FIFO, and
//! run on a semaphore-bounded worker pool. Every accepted command
//! produces exactly one [`CommandResult`](outpost_core::CommandResult)
//! on the results channel; rejected commands produce a synthesized
//! failure result through the same channel; nothing is silently
//! dropped. The orchestrator routes results to the control channel or,
//! while offline, to the [`OfflineSpool`].

#![deny(unsafe_code)]

mod executor;
mod handlers;
mod process;
mod service;
mod spool;
mod system;

pub use executor::{spawn, ExecutorConfig, ExecutorHandle, SubmitOutcome};
pub use handlers::{CommandHandler, ExecContext, HandlerRegistry, ShellHandler};
pub use service::{ServiceCommandHandler, ServiceController, ServiceVerb, SystemdController};
pub use spool::OfflineSpool;
pub use system::{SystemAction, SystemCommandHandler};
