// SPDX-License-Identifier: MIT OR Apache-2.0
//! The bounded queue, the dispatcher, and the worker pool.

use crate::handlers::{ExecContext, HandlerRegistry};
use outpost_core::{Command, CommandResult, ShutdownSignal};
use outpost_error::ErrorCode;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, info, warn};

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bounded FIFO capacity.
    pub max_queue_size: usize,
    /// Worker parallelism cap.
    pub max_parallel: usize,
    /// Default per-command timeout.
    pub default_timeout: Duration,
    /// Cooperative grace before running commands are killed on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_parallel: 4,
            default_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Outcome of a submit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued; exactly one result will follow on the results channel.
    Accepted,
    /// Rejected; a synthesized failure result was already delivered.
    Rejected {
        /// Stable reason tag.
        reason: &'static str,
    },
    /// Rejected because the executor is shutting down; no result is
    /// produced (the server will re-dispatch to the next session).
    ShuttingDown,
}

struct QueueState {
    pending: VecDeque<Command>,
    /// Ids pending or running; duplicates are rejected against this set.
    in_flight: HashSet<String>,
}

struct Inner {
    config: ExecutorConfig,
    state: Mutex<QueueState>,
    wakeup: Notify,
    results: mpsc::UnboundedSender<CommandResult>,
    shutdown: ShutdownSignal,
}

/// Handle used to feed commands into the executor.
#[derive(Clone)]
pub struct ExecutorHandle {
    inner: Arc<Inner>,
}

impl ExecutorHandle {
    /// Validate and enqueue `cmd`.
    ///
    /// Every rejection other than shutdown synthesizes a failure result
    /// through the normal delivery path, so the server always learns the
    /// command's fate.
    pub fn submit(&self, cmd: Command) -> SubmitOutcome {
        if self.inner.shutdown.is_triggered() {
            debug!(target: "outpost.exec", command_id = %cmd.command_id, "rejecting: shutting down");
            return SubmitOutcome::ShuttingDown;
        }

        if let Err(e) = cmd.validate() {
            warn!(target: "outpost.exec", command_id = %cmd.command_id, error = %e, "rejecting invalid command");
            self.deliver(CommandResult::failure(
                &cmd.command_id,
                cmd.kind,
                e.to_string(),
            ));
            return SubmitOutcome::Rejected { reason: "InvalidCommand" };
        }

        let verdict = {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            if state.in_flight.contains(&cmd.command_id) {
                Err(ErrorCode::DuplicateCommandId)
            } else if state.pending.len() >= self.inner.config.max_queue_size {
                Err(ErrorCode::QueueFull)
            } else {
                state.in_flight.insert(cmd.command_id.clone());
                state.pending.push_back(cmd.clone());
                Ok(())
            }
        };

        match verdict {
            Ok(()) => {
                self.inner.wakeup.notify_one();
                SubmitOutcome::Accepted
            }
            Err(code) => {
                warn!(
                    target: "outpost.exec",
                    command_id = %cmd.command_id,
                    reason = code.as_str(),
                    "command rejected"
                );
                self.deliver(CommandResult::failure(
                    &cmd.command_id,
                    cmd.kind,
                    code.as_str(),
                ));
                SubmitOutcome::Rejected {
                    reason: code.as_str(),
                }
            }
        }
    }

    /// Commands currently pending or running.
    pub fn in_flight(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("queue lock poisoned")
            .in_flight
            .len()
    }

    fn deliver(&self, result: CommandResult) {
        // The receiver outlives the executor; a send failure means the
        // orchestrator is gone and the result has nowhere to go.
        let _ = self.inner.results.send(result);
    }
}

/// Spawn the executor.
///
/// Returns the submit handle and the results channel. The channel closes
/// once shutdown has been observed and every worker has finished, which
/// is the orchestrator's signal that execution has drained.
pub fn spawn(
    config: ExecutorConfig,
    registry: HandlerRegistry,
    shutdown: ShutdownSignal,
) -> (ExecutorHandle, mpsc::UnboundedReceiver<CommandResult>) {
    let (results_tx, results_rx) = mpsc::unbounded_channel();

    let inner = Arc::new(Inner {
        config: config.clone(),
        state: Mutex::new(QueueState {
            pending: VecDeque::new(),
            in_flight: HashSet::new(),
        }),
        wakeup: Notify::new(),
        results: results_tx,
        shutdown: shutdown.clone(),
    });

    let handle = ExecutorHandle {
        inner: inner.clone(),
    };

    tokio::spawn(dispatch(inner, registry, config));

    (handle, results_rx)
}

/// Single dispatcher: drains the FIFO in order, waits on the worker
/// semaphore, then spawns one worker per command. Completion order is
/// unconstrained; dispatch order is arrival order.
async fn dispatch(inner: Arc<Inner>, registry: HandlerRegistry, config: ExecutorConfig) {
    let semaphore = Arc::new(Semaphore::new(config.max_parallel));
    let ctx = ExecContext {
        default_timeout: config.default_timeout,
        shutdown: inner.shutdown.clone(),
        shutdown_grace: config.shutdown_grace,
    };
    let mut workers = Vec::new();

    loop {
        // Hold a permit before taking a command so pending + running
        // never exceeds queue capacity + parallelism.
        let permit = tokio::select! {
            _ = inner.shutdown.triggered() => break,
            permit = semaphore.clone().acquire_owned() => {
                permit.expect("executor semaphore never closes")
            }
        };

        let cmd = loop {
            let popped = {
                let mut state = inner.state.lock().expect("queue lock poisoned");
                state.pending.pop_front()
            };
            if let Some(cmd) = popped {
                break Some(cmd);
            }
            tokio::select! {
                _ = inner.shutdown.triggered() => break None,
                _ = inner.wakeup.notified() => {}
            }
        };
        let Some(cmd) = cmd else {
            drop(permit);
            break;
        };

        let inner_for_worker = inner.clone();
        let registry = registry.clone();
        let ctx = ctx.clone();
        workers.push(tokio::spawn(async move {
            let _permit = permit;
            let command_id = cmd.command_id.clone();

            let result = match registry.get(cmd.kind) {
                Some(handler) => handler.handle(&cmd, &ctx).await,
                None => {
                    warn!(
                        target: "outpost.exec",
                        command_id = %command_id,
                        kind = %cmd.kind,
                        "no handler registered"
                    );
                    CommandResult::failure(
                        &command_id,
                        cmd.kind,
                        ErrorCode::UnsupportedCommandType.as_str(),
                    )
                }
            };

            {
                let mut state = inner_for_worker.state.lock().expect("queue lock poisoned");
                state.in_flight.remove(&command_id);
            }
            let _ = inner_for_worker.results.send(result);
        }));

        // Opportunistically reap finished workers so the vec stays small.
        workers.retain(|w| !w.is_finished());
    }

    // Shutdown: pending commands are abandoned (the server re-dispatches
    // to the next session); running workers get their grace period.
    let abandoned = {
        let mut state = inner.state.lock().expect("queue lock poisoned");
        let abandoned = state.pending.len();
        let drained: Vec<_> = state.pending.drain(..).collect();
        for cmd in drained {
            state.in_flight.remove(&cmd.command_id);
        }
        abandoned
    };
    if abandoned > 0 {
        info!(target: "outpost.exec", abandoned, "dropped pending commands on shutdown");
    }

    for worker in workers {
        let _ = worker.await;
    }
    debug!(target: "outpost.exec", "executor drained");
    // Dropping `inner`'s last results sender closes the channel once the
    // handle clones are gone too.
}
