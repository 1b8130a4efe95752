// SPDX-License-Identifier: MIT OR Apache-2.0
//! Self-update engine.
//!
//! Discovery (periodic check or server push) produces an
//! [`UpdateDescriptor`]; the engine then downloads, verifies, stages,
//! and hands off to the external updater executable. Any terminal
//! failure between download and hand-off adds the version to the
//! persisted ignore set so the agent never loops on a broken release;
//! cancellation does not poison the version. At most one update runs at
//! a time, and a successful hand-off is reported to the orchestrator as
//! [`UpdateOutcome::ShutdownRequested`]; the engine never stops the
//! process itself.

#![deny(unsafe_code)]

mod package;

pub use package::StageError;

use outpost_config::ConfigStore;
use outpost_core::{AgentPaths, ShutdownSignal, UpdateDescriptor};
use outpost_error::{AgentError, ErrorCode};
use outpost_http::{AgentHttpClient, ErrorReporter, HttpError};
use semver::Version;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Update engine settings.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Version of the running agent.
    pub current_version: Version,
    /// File name of the updater executable inside `Updater/`.
    pub updater_exe: String,
    /// `--service-wait-timeout` passed to the updater; the agent also
    /// promises to exit within this window.
    pub service_wait_timeout: Duration,
    /// `--watchdog-period` passed to the updater.
    pub watchdog_period: Duration,
}

impl UpdateConfig {
    /// Standard settings for the running `current_version`.
    pub fn new(current_version: Version) -> Self {
        Self {
            current_version,
            updater_exe: default_updater_exe().to_string(),
            service_wait_timeout: Duration::from_secs(60),
            watchdog_period: Duration::from_secs(120),
        }
    }
}

fn default_updater_exe() -> &'static str {
    if cfg!(windows) {
        "outpost-updater.exe"
    } else {
        "outpost-updater"
    }
}

/// Terminal outcome of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No newer release, or the server advertised nothing usable.
    UpToDate,
    /// The version is in the persisted ignore set; nothing was fetched.
    Ignored,
    /// Another update attempt holds the slot.
    AlreadyInProgress,
    /// Shutdown was observed mid-attempt; the version is not poisoned.
    Cancelled,
    /// The attempt failed terminally; the version is now ignored.
    Failed {
        /// Stable classification of the failure.
        error: ErrorCode,
    },
    /// The updater was launched; the orchestrator must stop the process.
    ShutdownRequested {
        /// Version being handed off to.
        version: Version,
    },
}

/// The update engine. Cheap to clone; the single-update slot is shared.
#[derive(Clone)]
pub struct UpdateEngine {
    http: AgentHttpClient,
    reporter: ErrorReporter,
    store: ConfigStore,
    paths: AgentPaths,
    config: UpdateConfig,
    slot: Arc<Semaphore>,
    shutdown: ShutdownSignal,
}

impl UpdateEngine {
    /// Assemble the engine.
    pub fn new(
        http: AgentHttpClient,
        reporter: ErrorReporter,
        store: ConfigStore,
        paths: AgentPaths,
        config: UpdateConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            http,
            reporter,
            store,
            paths,
            config,
            slot: Arc::new(Semaphore::new(1)),
            shutdown,
        }
    }

    /// Ask the server for a candidate release and apply it if eligible.
    pub async fn check(&self) -> UpdateOutcome {
        let response = match self
            .http
            .check_for_updates(&self.config.current_version.to_string())
            .await
        {
            Ok(response) => response,
            Err(HttpError::AuthFailed) => {
                warn!(target: "outpost.update", "update check rejected: auth failed");
                return UpdateOutcome::Failed {
                    error: ErrorCode::ServerAuthFailed,
                };
            }
            Err(e) => {
                debug!(target: "outpost.update", error = %e, "update check unreachable");
                return UpdateOutcome::Failed {
                    error: ErrorCode::ServerUnreachable,
                };
            }
        };
        match response.into_descriptor() {
            Some(descriptor) => self.apply(descriptor).await,
            None => UpdateOutcome::UpToDate,
        }
    }

    /// Run the full pipeline for a known candidate.
    pub async fn apply(&self, descriptor: UpdateDescriptor) -> UpdateOutcome {
        let version = descriptor.version.clone();

        if version <= self.config.current_version {
            debug!(target: "outpost.update", %version, "candidate is not newer, skipping");
            return UpdateOutcome::UpToDate;
        }
        match self.store.is_ignored(&version.to_string()) {
            Ok(true) => {
                debug!(target: "outpost.update", %version, "version is ignored, skipping");
                return UpdateOutcome::Ignored;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(target: "outpost.update", error = %e, "ignore-list unreadable, proceeding");
            }
        }

        // Single-slot, non-blocking: a second trigger while one attempt
        // is in flight is dropped, not queued.
        let Ok(_permit) = self.slot.clone().try_acquire_owned() else {
            debug!(target: "outpost.update", %version, "update already in progress");
            return UpdateOutcome::AlreadyInProgress;
        };

        info!(target: "outpost.update", %version, url = %descriptor.download_url, "starting update");
        match self.run_pipeline(&descriptor).await {
            Ok(()) => {
                info!(target: "outpost.update", %version, "updater launched, requesting shutdown");
                UpdateOutcome::ShutdownRequested { version }
            }
            Err(PipelineError::Cancelled) => {
                info!(target: "outpost.update", %version, "update cancelled by shutdown");
                UpdateOutcome::Cancelled
            }
            Err(PipelineError::Step { code, message }) => {
                warn!(target: "outpost.update", %version, code = code.as_str(), %message, "update failed");
                self.reporter
                    .report(
                        &AgentError::new(code, message),
                        Some(&version.to_string()),
                    )
                    .await;
                if let Err(e) = self.store.add_ignored_version(&version.to_string()) {
                    warn!(target: "outpost.update", error = %e, "failed to persist ignored version");
                }
                UpdateOutcome::Failed { error: code }
            }
        }
    }

    async fn run_pipeline(&self, descriptor: &UpdateDescriptor) -> Result<(), PipelineError> {
        let version = &descriptor.version;
        let download_dir = self.paths.update_download_dir();
        let extracted = self.paths.update_extracted_dir(&version.to_string());

        // Stale residue from prior attempts never survives into a new one.
        package::remove_residue(&download_dir).await;
        tokio::fs::create_dir_all(&download_dir)
            .await
            .map_err(|e| step(ErrorCode::DownloadFailed, format!("create download dir: {e}")))?;

        self.checkpoint()?;

        // Download, hashing while streaming.
        let archive = download_dir.join(package_filename(descriptor));
        let digest = self
            .http
            .download(&descriptor.download_url, &archive)
            .await
            .map_err(|e| step(ErrorCode::DownloadFailed, e.to_string()))?;

        self.checkpoint()?;

        if !outpost_core::checksum_matches(&descriptor.checksum_sha256, &digest) {
            let _ = tokio::fs::remove_file(&archive).await;
            return Err(step(
                ErrorCode::ChecksumMismatch,
                format!(
                    "package digest {digest} does not match descriptor {}",
                    descriptor.checksum_sha256
                ),
            ));
        }

        // Extraction into a wiped staging directory.
        if let Err(e) = package::extract(&archive, &extracted).await {
            let _ = tokio::fs::remove_file(&archive).await;
            return Err(stage_to_step(e, ErrorCode::ExtractionFailed));
        }

        self.checkpoint()?;

        // Manifest: version equality, per-file existence and digests.
        let manifest = package::read_manifest(&extracted)
            .await
            .map_err(|e| stage_to_step(e, ErrorCode::InvalidPackage))?;
        package::verify_manifest(&manifest, version, &extracted)
            .await
            .map_err(|e| stage_to_step(e, ErrorCode::InvalidPackage))?;

        self.checkpoint()?;

        self.launch_updater(&extracted, version)?;
        Ok(())
    }

    /// Launch the external updater, detached: null stdio, own process
    /// group, child handle dropped so it survives our exit.
    fn launch_updater(&self, extracted: &PathBuf, version: &Version) -> Result<(), PipelineError> {
        let updater = extracted
            .join("Updater")
            .join(&self.config.updater_exe);
        if !updater.is_file() {
            return Err(step(
                ErrorCode::UpdateLaunchFailed,
                format!("updater executable missing: {}", updater.display()),
            ));
        }
        let source_path = std::fs::canonicalize(extracted)
            .map_err(|e| step(ErrorCode::UpdateLaunchFailed, format!("resolve source path: {e}")))?;

        let mut command = std::process::Command::new(&updater);
        command
            .arg("--new-version")
            .arg(version.to_string())
            .arg("--old-version")
            .arg(self.config.current_version.to_string())
            .arg("--source-path")
            .arg(&source_path)
            .arg("--service-wait-timeout")
            .arg(self.config.service_wait_timeout.as_secs().to_string())
            .arg("--watchdog-period")
            .arg(self.config.watchdog_period.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command
            .spawn()
            .map_err(|e| step(ErrorCode::UpdateLaunchFailed, format!("spawn updater: {e}")))?;
        // The child handle is dropped deliberately; the updater outlives us.
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.shutdown.is_triggered() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Derive the on-disk package name from the download URL.
fn package_filename(descriptor: &UpdateDescriptor) -> String {
    descriptor
        .download_url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("outpost-{}.zip", descriptor.version))
}

enum PipelineError {
    Cancelled,
    Step { code: ErrorCode, message: String },
}

fn step(code: ErrorCode, message: impl Into<String>) -> PipelineError {
    PipelineError::Step {
        code,
        message: message.into(),
    }
}

fn stage_to_step(error: StageError, default_code: ErrorCode) -> PipelineError {
    let code = match &error {
        StageError::Extraction(_) => ErrorCode::ExtractionFailed,
        StageError::FileChecksum { .. } => ErrorCode::ChecksumMismatch,
        StageError::InvalidPackage(_) => ErrorCode::InvalidPackage,
        StageError::Io(_) => default_code,
    };
    step(code, error.to_string())
}
