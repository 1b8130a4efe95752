// SPDX-License-Identifier: MIT OR Apache-2.0
//! The orchestrator: composes every subsystem and owns the lifecycle.

use crate::refresh::RefreshCoordinator;
use crate::state::StateMachine;
use outpost_channel::{ChannelConfig, ChannelHandle, ChannelNotice, EmitHandle, InboundEvent};
use outpost_config::{ConfigError, ConfigStore};
use outpost_core::events::{outbound, StatusUpdate, UpdateStatus};
use outpost_core::{
    AgentPaths, AgentState, CommandResult, ExitCode, SharedToken, ShutdownSignal,
};
use outpost_exec::{ExecutorConfig, HandlerRegistry, OfflineSpool};
use outpost_http::{AgentHttpClient, ErrorReporter, HttpConfig};
use outpost_telemetry::{
    HardwareProbe, ResourceSampler, StatusEmitter, SysinfoProbe, SysinfoSampler,
};
use outpost_update::{UpdateConfig, UpdateEngine, UpdateOutcome};
use outpost_vault::{HostBoundVault, TokenVault};
use semver::Version;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Everything the service mode needs to run.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// REST base URL.
    pub server_url: Url,
    /// Control-channel websocket URL.
    pub channel_url: Url,
    /// Agent data directory (config, spool, update staging).
    pub data_dir: PathBuf,
    /// Whether the agent checks for updates on its own.
    pub auto_update: bool,
    /// Telemetry sampling interval.
    pub status_interval: Duration,
    /// Periodic update-check cadence.
    pub auto_update_interval: Duration,
    /// HTTP request timeout.
    pub request_timeout: Duration,
    /// First reconnect delay.
    pub reconnect_initial: Duration,
    /// Reconnect delay cap.
    pub reconnect_max: Duration,
    /// Executor tuning.
    pub executor: ExecutorConfig,
}

impl RuntimeOptions {
    /// Standard settings for the given endpoints and data directory.
    pub fn new(server_url: Url, channel_url: Url, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            server_url,
            channel_url,
            data_dir: data_dir.into(),
            auto_update: true,
            status_interval: Duration::from_secs(30),
            auto_update_interval: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
            reconnect_initial: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(300),
            executor: ExecutorConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Exit surface
// ---------------------------------------------------------------------------

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// Clean stop (signal or operator request).
    Stopped,
    /// The external updater was launched; the process must now exit so
    /// the updater can replace it.
    UpdaterHandoff {
        /// Version being installed.
        version: Version,
    },
}

/// Fatal run failures, each mapping to a stable process exit code.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Runtime config missing or incomplete.
    #[error("configuration incomplete: {0}")]
    ConfigIncomplete(String),
    /// Runtime config present but corrupt.
    #[error("configuration corrupt: {0}")]
    ConfigCorrupt(String),
    /// The sealed token does not unseal on this host.
    #[error("token unseal failed; re-configure this install")]
    Unseal,
    /// The server rejected authentication beyond recovery.
    #[error("server authentication failed: {0}")]
    AuthFailed(String),
    /// Anything else fatal.
    #[error("fatal runtime error: {0}")]
    Fatal(String),
}

impl RunError {
    /// The stable exit code for this failure.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RunError::ConfigIncomplete(_) | RunError::ConfigCorrupt(_) => {
                ExitCode::ConfigIncomplete
            }
            RunError::Unseal => ExitCode::TokenUnsealFailed,
            RunError::AuthFailed(_) => ExitCode::ServerAuthFailed,
            RunError::Fatal(_) => ExitCode::FatalRuntimeError,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// The composed agent. Construct, then [`Agent::run`].
pub struct Agent {
    options: RuntimeOptions,
    vault: Arc<dyn TokenVault>,
    probe: Arc<dyn HardwareProbe>,
    sampler: Arc<dyn ResourceSampler>,
    shutdown: ShutdownSignal,
    state: StateMachine,
}

impl Agent {
    /// Agent with the production capabilities (host-bound vault,
    /// sysinfo-backed probe and sampler).
    pub fn new(options: RuntimeOptions) -> Self {
        Self {
            options,
            vault: Arc::new(HostBoundVault::new()),
            probe: Arc::new(SysinfoProbe),
            sampler: Arc::new(SysinfoSampler::new()),
            shutdown: ShutdownSignal::new(),
            state: StateMachine::new(),
        }
    }

    /// Replace the vault capability (tests, alternate sealing backends).
    pub fn with_vault(mut self, vault: Arc<dyn TokenVault>) -> Self {
        self.vault = vault;
        self
    }

    /// Replace the hardware probe capability.
    pub fn with_probe(mut self, probe: Arc<dyn HardwareProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replace the resource sampler capability.
    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// The shutdown broadcast. The host shell wires signals into this.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Observe lifecycle state.
    pub fn state_watch(&self) -> tokio::sync::watch::Receiver<AgentState> {
        self.state.watch()
    }

    /// Run service mode to completion.
    pub async fn run(self) -> Result<RunExit, RunError> {
        let result = self.run_inner().await;
        match &result {
            Ok(exit) => {
                self.state.transition(AgentState::Stopped);
                info!(target: "outpost.runtime", ?exit, "agent stopped");
            }
            Err(e) => {
                self.state.transition(AgentState::Error);
                error!(target: "outpost.runtime", error = %e, "agent failed");
            }
        }
        result
    }

    async fn run_inner(&self) -> Result<RunExit, RunError> {
        // -- Initializing ------------------------------------------------
        let paths = AgentPaths::new(&self.options.data_dir);
        paths
            .ensure_layout()
            .map_err(|e| RunError::Fatal(format!("data layout: {e}")))?;
        let store = ConfigStore::new(paths.runtime_config());

        let config = store.load().map_err(|e| match e {
            ConfigError::Missing { .. } => RunError::ConfigIncomplete(e.to_string()),
            ConfigError::Incomplete { .. } => RunError::ConfigIncomplete(e.to_string()),
            ConfigError::Corrupt { .. } => RunError::ConfigCorrupt(e.to_string()),
            ConfigError::Io(e) => RunError::Fatal(format!("config read: {e}")),
        })?;
        let identity = config.identity();

        let plaintext = self
            .vault
            .unseal(&config.sealed_token, Some(identity.agent_id.as_bytes()))
            .map_err(|_| RunError::Unseal)?;
        let token = SharedToken::new(String::from_utf8(plaintext).map_err(|_| RunError::Unseal)?);

        // -- Composition -------------------------------------------------
        let mut http_config = HttpConfig::new(self.options.server_url.clone());
        http_config.request_timeout = self.options.request_timeout;
        let plain_http =
            AgentHttpClient::new(http_config, identity.agent_id.clone(), token.clone());
        let refresher = Arc::new(RefreshCoordinator::new(
            plain_http.clone(),
            self.vault.clone(),
            store.clone(),
            token.clone(),
            identity.clone(),
        ));
        let http = plain_http.with_refresher(refresher.clone());
        let reporter = ErrorReporter::new(http.clone());

        let (executor, mut results_rx) = outpost_exec::spawn(
            self.options.executor.clone(),
            HandlerRegistry::standard(),
            self.shutdown.clone(),
        );
        let spool = OfflineSpool::new(paths.offline_results());

        let mut channel_config =
            ChannelConfig::new(self.options.channel_url.clone(), identity.agent_id.clone());
        channel_config.reconnect_initial = self.options.reconnect_initial;
        channel_config.reconnect_max = self.options.reconnect_max;
        let mut channel: ChannelHandle =
            outpost_channel::spawn(channel_config, token.clone(), self.shutdown.clone());
        let emitter = channel.emitter();

        let current_version = Version::parse(outpost_core::AGENT_VERSION)
            .map_err(|e| RunError::Fatal(format!("own version unparsable: {e}")))?;
        let engine = UpdateEngine::new(
            http.clone(),
            reporter.clone(),
            store.clone(),
            paths.clone(),
            UpdateConfig::new(current_version),
            self.shutdown.clone(),
        );
        let (update_tx, mut update_rx) = mpsc::channel::<UpdateOutcome>(8);

        // -- Connecting --------------------------------------------------
        self.state.transition(AgentState::Connecting);

        let mut update_timer = tokio::time::interval(self.options.auto_update_interval);
        update_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        update_timer.tick().await; // the on-connect check covers startup

        let mut session_stop: Option<ShutdownSignal> = None;
        let mut refreshed_since_connect = false;
        let mut exit: Result<RunExit, RunError> = Ok(RunExit::Stopped);

        loop {
            tokio::select! {
                _ = self.shutdown.triggered() => break,

                maybe_notice = channel.next_notice() => {
                    let Some(notice) = maybe_notice else {
                        if self.shutdown.is_triggered() {
                            break;
                        }
                        exit = Err(RunError::Fatal("control channel supervisor died".into()));
                        break;
                    };
                    match notice {
                        ChannelNotice::Connected => {
                            self.state.transition(AgentState::Connected);
                            refreshed_since_connect = false;
                            self.on_connected(
                                &http,
                                &emitter,
                                &spool,
                                &engine,
                                &update_tx,
                                &mut session_stop,
                            );
                        }
                        ChannelNotice::Disconnected { reason } => {
                            debug!(target: "outpost.runtime", %reason, "session lost");
                            self.state.transition(AgentState::Disconnected);
                            if let Some(stop) = session_stop.take() {
                                stop.trigger();
                            }
                        }
                        ChannelNotice::AuthFailed { reason } => {
                            // Handshake rejections arrive while still
                            // Connecting; only a live session moves to
                            // Disconnected.
                            if self.state.current() == AgentState::Connected {
                                self.state.transition(AgentState::Disconnected);
                            }
                            if let Some(stop) = session_stop.take() {
                                stop.trigger();
                            }
                            if refreshed_since_connect {
                                exit = Err(RunError::AuthFailed(format!(
                                    "rejected again after refresh: {reason}"
                                )));
                                break;
                            }
                            refreshed_since_connect = true;
                            match refresher.refresh_token().await {
                                Ok(()) => {
                                    info!(target: "outpost.runtime", "token refreshed, reconnecting");
                                    channel.retrigger_reconnect();
                                }
                                Err(e) => {
                                    exit = Err(RunError::AuthFailed(e.to_string()));
                                    break;
                                }
                            }
                        }
                        ChannelNotice::ReconnectsExhausted => {
                            warn!(target: "outpost.runtime", "reconnect budget exhausted");
                        }
                        ChannelNotice::Event(InboundEvent::CommandExecute(cmd)) => {
                            let outcome = executor.submit(cmd);
                            debug!(target: "outpost.runtime", ?outcome, "command submitted");
                        }
                        ChannelNotice::Event(InboundEvent::NewVersionAvailable(descriptor)) => {
                            info!(
                                target: "outpost.runtime",
                                version = %descriptor.version,
                                "update push received"
                            );
                            let engine = engine.clone();
                            let tx = update_tx.clone();
                            tokio::spawn(async move {
                                let _ = tx.send(engine.apply(descriptor).await).await;
                            });
                        }
                        // Auth verdicts surface as dedicated notices.
                        ChannelNotice::Event(_) => {}
                    }
                }

                Some(result) = results_rx.recv() => {
                    deliver_result(&emitter, &spool, &result);
                }

                Some(outcome) = update_rx.recv() => {
                    match outcome {
                        UpdateOutcome::ShutdownRequested { version } => {
                            self.state.transition(AgentState::Updating);
                            let status = UpdateStatus {
                                status: "update_started".into(),
                                target_version: version.to_string(),
                                message: None,
                            };
                            // Best-effort: hand-off proceeds regardless.
                            if let Ok(payload) = serde_json::to_value(&status) {
                                let _ = emitter.emit(outbound::UPDATE_STATUS, payload);
                            }
                            exit = Ok(RunExit::UpdaterHandoff { version });
                            break;
                        }
                        outcome => {
                            debug!(target: "outpost.runtime", ?outcome, "update attempt finished");
                        }
                    }
                }

                _ = update_timer.tick(), if self.options.auto_update => {
                    let engine = engine.clone();
                    let tx = update_tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(engine.check().await).await;
                    });
                }
            }
        }

        // -- Stopping ----------------------------------------------------
        self.state.transition(AgentState::Stopping);
        self.shutdown.trigger();
        if let Some(stop) = session_stop.take() {
            stop.trigger();
        }

        // Drop our submit handle so the results channel closes once the
        // workers have drained, then collect stragglers within the grace
        // window.
        drop(executor);
        let grace = self.options.executor.shutdown_grace + Duration::from_secs(2);
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, results_rx.recv()).await {
                Ok(Some(result)) => deliver_result(&emitter, &spool, &result),
                Ok(None) | Err(_) => break,
            }
        }

        exit
    }

    /// Connected-entry actions, in contract order: hardware inventory,
    /// telemetry sampler, update check, spool drain.
    fn on_connected(
        &self,
        http: &AgentHttpClient,
        emitter: &EmitHandle,
        spool: &OfflineSpool,
        engine: &UpdateEngine,
        update_tx: &mpsc::Sender<UpdateOutcome>,
        session_stop: &mut Option<ShutdownSignal>,
    ) {
        let report = self.probe.probe();
        let http = http.clone();
        tokio::spawn(async move {
            match http.report_hardware(&report).await {
                Ok(_) => debug!(target: "outpost.runtime", "hardware inventory reported"),
                Err(e) => warn!(target: "outpost.runtime", error = %e, "hardware report failed"),
            }
        });

        let stop = ShutdownSignal::new();
        let sampler = self.sampler.clone();
        let status_emitter = ChannelStatusEmitter(emitter.clone());
        let interval = self.options.status_interval;
        {
            let stop = stop.clone();
            tokio::spawn(async move {
                outpost_telemetry::run_sampler(sampler.as_ref(), &status_emitter, interval, stop)
                    .await;
            });
        }
        *session_stop = Some(stop);

        if self.options.auto_update {
            let engine = engine.clone();
            let tx = update_tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(engine.check().await).await;
            });
        }

        drain_spool(spool, emitter);
    }
}

// ---------------------------------------------------------------------------
// Delivery helpers
// ---------------------------------------------------------------------------

struct ChannelStatusEmitter(EmitHandle);

impl StatusEmitter for ChannelStatusEmitter {
    fn emit_status(&self, snapshot: &StatusUpdate) -> bool {
        match serde_json::to_value(snapshot) {
            Ok(payload) => self.0.emit(outbound::STATUS_UPDATE, payload).is_ok(),
            Err(_) => false,
        }
    }
}

/// Emit a result when connected; spool it otherwise.
fn deliver_result(emitter: &EmitHandle, spool: &OfflineSpool, result: &CommandResult) {
    let payload = match serde_json::to_value(result) {
        Ok(payload) => payload,
        Err(e) => {
            error!(target: "outpost.runtime", error = %e, "unserializable command result");
            return;
        }
    };
    if emitter.emit(outbound::COMMAND_RESULT, payload).is_ok() {
        return;
    }
    match spool.append(result) {
        Ok(()) => debug!(
            target: "outpost.runtime",
            command_id = %result.command_id,
            "result spooled offline"
        ),
        Err(e) => error!(
            target: "outpost.runtime",
            command_id = %result.command_id,
            error = %e,
            "command result lost"
        ),
    }
}

/// Replay spooled results in FIFO order, emitting each once. The file is
/// truncated only after every entry was emitted; an interruption leaves
/// it intact for the next reconnect (at-least-once delivery).
fn drain_spool(spool: &OfflineSpool, emitter: &EmitHandle) {
    let entries = match spool.load() {
        Ok(entries) => entries,
        Err(e) => {
            warn!(target: "outpost.runtime", error = %e, "spool unreadable");
            return;
        }
    };
    if entries.is_empty() {
        return;
    }
    for (delivered, result) in entries.iter().enumerate() {
        let payload = match serde_json::to_value(result) {
            Ok(payload) => payload,
            Err(_) => continue,
        };
        if emitter.emit(outbound::COMMAND_RESULT, payload).is_err() {
            warn!(
                target: "outpost.runtime",
                delivered,
                total = entries.len(),
                "spool drain interrupted, keeping remainder"
            );
            return;
        }
    }
    info!(target: "outpost.runtime", count = entries.len(), "offline spool drained");
    if let Err(e) = spool.clear() {
        warn!(target: "outpost.runtime", error = %e, "spool truncate failed");
    }
}
