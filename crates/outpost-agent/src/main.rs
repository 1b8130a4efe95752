#![deny(unsafe_code)]
//! Outpost endpoint agent binary.
//!
//! Thin host shell over the runtime crate: argument parsing, logging
//! setup, the single-instance guard, OS signals, and exit-code mapping.
//! Service managers integrate against the three subcommands and the
//! stable exit codes.

use anyhow::Context;
use clap::{Parser, Subcommand};
use outpost_core::{ExitCode, SharedToken};
use outpost_guard::{lock_dir, lock_name, Acquire, InstanceGuard};
use outpost_http::{AgentHttpClient, HttpConfig};
use outpost_runtime::{
    configure, Agent, ConfigureError, ConfigureOptions, RunExit, RuntimeOptions,
};
use outpost_vault::HostBoundVault;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "outpost-agent", version, about = "Outpost endpoint agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Agent data directory (config, spool, update staging).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Deployment scope for the single-instance guard; distinct installs
    /// on one machine use distinct GUIDs.
    #[arg(long, global = true, default_value = "default")]
    deployment_guid: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run in service mode. Requires a completed configure.
    Start {
        /// Server REST base URL.
        #[arg(long)]
        server_url: Url,

        /// Control-channel URL; derived from the server URL when omitted.
        #[arg(long)]
        channel_url: Option<Url>,

        /// Disable periodic and on-connect update checks.
        #[arg(long)]
        no_auto_update: bool,
    },

    /// Enrol this workstation with the server and persist its identity.
    Configure {
        /// Server REST base URL.
        #[arg(long)]
        server_url: Url,

        /// Room this workstation sits in. Prompted for when omitted.
        #[arg(long)]
        room: Option<String>,

        /// Grid column. Prompted for when omitted.
        #[arg(long, allow_hyphen_values = true)]
        pos_x: Option<i64>,

        /// Grid row. Prompted for when omitted.
        #[arg(long, allow_hyphen_values = true)]
        pos_y: Option<i64>,

        /// MFA code, when enrolment policy requires one.
        #[arg(long)]
        mfa_code: Option<String>,
    },

    /// Signal a running instance to shut down gracefully.
    Stop,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("outpost=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("outpost=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let code = match cli.command {
        Commands::Start {
            server_url,
            channel_url,
            no_auto_update,
        } => run_start(server_url, channel_url, no_auto_update, data_dir, &cli.deployment_guid).await,
        Commands::Configure {
            server_url,
            room,
            pos_x,
            pos_y,
            mfa_code,
        } => run_configure(server_url, room, pos_x, pos_y, mfa_code, data_dir).await,
        Commands::Stop => run_stop(&cli.deployment_guid),
    };

    std::process::exit(code.code());
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("outpost-agent")
}

/// Control channel lives next to the REST API unless told otherwise.
fn derive_channel_url(server_url: &Url) -> anyhow::Result<Url> {
    let mut url = server_url.clone();
    let scheme = match server_url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| anyhow::anyhow!("cannot derive ws scheme from {server_url}"))?;
    Ok(url.join("agents/channel")?)
}

async fn run_start(
    server_url: Url,
    channel_url: Option<Url>,
    no_auto_update: bool,
    data_dir: PathBuf,
    deployment_guid: &str,
) -> ExitCode {
    // The guard must be held for the whole service lifetime.
    let _guard = match InstanceGuard::acquire(&lock_name(deployment_guid)) {
        Ok(Acquire::Acquired(guard)) => guard,
        Ok(Acquire::AlreadyHeld { holder_pid }) => {
            warn!(target: "outpost.agent", ?holder_pid, "another instance is already running");
            return ExitCode::AlreadyRunning;
        }
        Err(e) => {
            eprintln!("instance guard failed: {e}");
            return ExitCode::FatalRuntimeError;
        }
    };

    let channel_url = match channel_url.map(Ok).unwrap_or_else(|| derive_channel_url(&server_url)) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("invalid channel url: {e}");
            return ExitCode::FatalRuntimeError;
        }
    };

    let mut options = RuntimeOptions::new(server_url, channel_url, data_dir);
    options.auto_update = !no_auto_update;

    let agent = Agent::new(options);
    let shutdown = agent.shutdown_signal();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!(target: "outpost.agent", "shutdown signal received");
        shutdown.trigger();
    });

    match agent.run().await {
        Ok(RunExit::Stopped) => ExitCode::Success,
        Ok(RunExit::UpdaterHandoff { version }) => {
            info!(target: "outpost.agent", %version, "exiting for updater hand-off");
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run_configure(
    server_url: Url,
    room: Option<String>,
    pos_x: Option<i64>,
    pos_y: Option<i64>,
    mfa_code: Option<String>,
    data_dir: PathBuf,
) -> ExitCode {
    let store = outpost_config::ConfigStore::new(
        outpost_core::AgentPaths::new(&data_dir).runtime_config(),
    );
    let vault = HostBoundVault::new();
    let http = AgentHttpClient::new(
        HttpConfig::new(server_url),
        "pre-enrolment",
        SharedToken::default(),
    );

    let options = ConfigureOptions {
        room_name: match value_or_prompt(room, "Room name") {
            Ok(value) => value,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::ConfigIncomplete;
            }
        },
        pos_x: match numeric_or_prompt(pos_x, "Position X") {
            Ok(value) => value,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::ConfigIncomplete;
            }
        },
        pos_y: match numeric_or_prompt(pos_y, "Position Y") {
            Ok(value) => value,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::ConfigIncomplete;
            }
        },
        mfa_code,
    };

    // One interactive second chance when the server wants MFA and no
    // code was supplied up front.
    let mut attempt = options.clone();
    loop {
        match configure(attempt.clone(), &http, &vault, &store).await {
            Ok(identity) => {
                println!("configured agent {} at {}", identity.agent_id, identity.position);
                return ExitCode::Success;
            }
            Err(ConfigureError::MfaRequired) if attempt.mfa_code.is_none() => {
                match value_or_prompt(None, "MFA code") {
                    Ok(code) => {
                        attempt.mfa_code = Some(code);
                        continue;
                    }
                    Err(_) => {
                        eprintln!("an MFA code is required to enrol this agent");
                        return ExitCode::ServerAuthFailed;
                    }
                }
            }
            Err(e) => {
                eprintln!("{}", human_configure_message(&e));
                return configure_exit_code(&e);
            }
        }
    }
}

fn human_configure_message(error: &ConfigureError) -> String {
    match error {
        ConfigureError::InvalidPosition(e) => format!("position is invalid: {e}"),
        ConfigureError::PositionRejected(msg) => {
            format!("the server rejected the declared position: {msg}")
        }
        ConfigureError::MfaRequired => "an MFA code is required to enrol this agent".into(),
        ConfigureError::MfaRejected(msg) => format!("MFA verification failed: {msg}"),
        ConfigureError::Server(e) => format!("the server could not be reached: {e}"),
        ConfigureError::Vault(e) => format!("the token could not be protected on this host: {e}"),
        ConfigureError::Store(e) => format!("the configuration could not be saved: {e}"),
        ConfigureError::Rejected(msg) => format!("enrolment was rejected: {msg}"),
    }
}

fn configure_exit_code(error: &ConfigureError) -> ExitCode {
    match error {
        ConfigureError::InvalidPosition(_) | ConfigureError::PositionRejected(_) => {
            ExitCode::ConfigIncomplete
        }
        ConfigureError::MfaRequired
        | ConfigureError::MfaRejected(_)
        | ConfigureError::Rejected(_) => ExitCode::ServerAuthFailed,
        ConfigureError::Vault(_) => ExitCode::TokenUnsealFailed,
        ConfigureError::Server(_) | ConfigureError::Store(_) => ExitCode::FatalRuntimeError,
    }
}

fn value_or_prompt(value: Option<String>, label: &str) -> anyhow::Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }
    print!("{label}: ");
    std::io::stdout().flush().context("flush stdout")?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).context("read stdin")?;
    let line = line.trim().to_string();
    if line.is_empty() {
        anyhow::bail!("{label} must not be empty");
    }
    Ok(line)
}

fn numeric_or_prompt(value: Option<i64>, label: &str) -> anyhow::Result<i64> {
    if let Some(value) = value {
        return Ok(value);
    }
    let text = value_or_prompt(None, label)?;
    text.parse::<i64>()
        .with_context(|| format!("{label} must be an integer"))
}

fn run_stop(deployment_guid: &str) -> ExitCode {
    let name = lock_name(deployment_guid);
    let Some(pid) = InstanceGuard::read_holder_pid(&lock_dir(), &name) else {
        println!("no running instance found for deployment {deployment_guid}");
        return ExitCode::Success;
    };

    #[cfg(unix)]
    {
        // SIGTERM starts the same graceful path as the service manager.
        match std::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status()
        {
            Ok(status) if status.success() => {
                println!("sent stop signal to pid {pid}");
                ExitCode::Success
            }
            Ok(_) => {
                println!("pid {pid} is recorded but not signalable; assuming stopped");
                ExitCode::Success
            }
            Err(e) => {
                eprintln!("failed to signal pid {pid}: {e}");
                ExitCode::FatalRuntimeError
            }
        }
    }
    #[cfg(not(unix))]
    {
        eprintln!(
            "stop is delegated to the service manager on this platform (instance pid {pid})"
        );
        ExitCode::Success
    }
}
