// SPDX-License-Identifier: MIT OR Apache-2.0
//! Observable state machine.

use outpost_core::AgentState;
use tokio::sync::watch;
use tracing::{info, warn};

/// Publishes the agent's lifecycle state; transitions are validated
/// against the state-machine relation.
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<AgentState>,
}

impl StateMachine {
    /// Machine starting in `Initializing`.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AgentState::Initializing);
        Self { tx }
    }

    /// Current state snapshot.
    pub fn current(&self) -> AgentState {
        *self.tx.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch(&self) -> watch::Receiver<AgentState> {
        self.tx.subscribe()
    }

    /// Attempt a transition. Invalid transitions are refused and logged,
    /// never applied.
    pub fn transition(&self, next: AgentState) -> bool {
        let current = self.current();
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(
                target: "outpost.runtime",
                from = current.as_str(),
                to = next.as_str(),
                "refusing invalid state transition"
            );
            return false;
        }
        info!(
            target: "outpost.runtime",
            from = current.as_str(),
            to = next.as_str(),
            "state transition"
        );
        self.tx.send_replace(next);
        true
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
