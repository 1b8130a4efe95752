// SPDX-License-Identifier: MIT OR Apache-2.0
//! Orchestration-level tests: refresh coalescing, configure flow, and a
//! full agent session against in-process servers.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::routing::any;
use axum::Router;
use outpost_config::{ConfigStore, RuntimeConfig};
use outpost_core::{
    AgentIdentity, AgentPaths, Command, CommandKind, CommandResult, Position, SharedToken,
};
use outpost_exec::OfflineSpool;
use outpost_http::{AgentHttpClient, HttpConfig};
use outpost_runtime::{configure, Agent, ConfigureOptions, RefreshCoordinator, RuntimeOptions};
use outpost_vault::{HostBoundVault, TokenVault};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn position() -> Position {
    Position::new("Lab 3", 1, 2).unwrap()
}

fn http_client(server: &MockServer, agent_id: &str, token: &SharedToken) -> AgentHttpClient {
    let mut config = HttpConfig::new(Url::parse(&server.uri()).unwrap());
    config.request_timeout = Duration::from_secs(5);
    config.retry.max_retries = 0;
    AgentHttpClient::new(config, agent_id, token.clone())
}

// ---------------------------------------------------------------------------
// Refresh coalescing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn overlapping_refreshes_coalesce_into_one_identify() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agents/identify"))
        .and(body_partial_json(json!({"force_renew": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "agent_token": "T1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let vault = Arc::new(HostBoundVault::new());
    let identity = AgentIdentity {
        agent_id: "agent-1".into(),
        position: position(),
    };
    let token = SharedToken::new("T0");
    let store = ConfigStore::new(dir.path().join("runtime_config.json"));
    store
        .save(&RuntimeConfig::new(
            identity.clone(),
            vault.seal(b"T0", Some(b"agent-1")).unwrap(),
        ))
        .unwrap();

    let coordinator = Arc::new(RefreshCoordinator::new(
        http_client(&server, "agent-1", &token),
        vault.clone(),
        store.clone(),
        token.clone(),
        identity,
    ));

    // Two overlapping callers: one server call, one swap.
    let (a, b) = tokio::join!(
        coordinator.refresh_token(),
        coordinator.refresh_token(),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(token.get(), "T1");
    assert_eq!(coordinator.generation(), 1);

    // The sealed copy on disk unseals to the same bytes now in memory.
    let sealed = store.load().unwrap().sealed_token;
    assert_eq!(vault.unseal(&sealed, Some(b"agent-1")).unwrap(), b"T1");
}

#[tokio::test]
async fn refresh_surfaces_mfa_as_unrecoverable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agents/identify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "mfa_required"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let vault = Arc::new(HostBoundVault::new());
    let identity = AgentIdentity {
        agent_id: "agent-1".into(),
        position: position(),
    };
    let token = SharedToken::new("T0");
    let store = ConfigStore::new(dir.path().join("runtime_config.json"));
    store
        .save(&RuntimeConfig::new(
            identity.clone(),
            vault.seal(b"T0", Some(b"agent-1")).unwrap(),
        ))
        .unwrap();

    let coordinator = RefreshCoordinator::new(
        http_client(&server, "agent-1", &token),
        vault,
        store,
        token.clone(),
        identity,
    );
    let err = coordinator.refresh_token().await.unwrap_err();
    assert!(matches!(err, outpost_runtime::RefreshError::MfaRequired));
    // The old token stays in place.
    assert_eq!(token.get(), "T0");
}

// ---------------------------------------------------------------------------
// Configure flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn configure_seals_and_persists_the_issued_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agents/identify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "agent_token": "T0"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("runtime_config.json"));
    let vault = HostBoundVault::new();
    let token = SharedToken::new("");

    let identity = configure(
        ConfigureOptions {
            room_name: "Lab 3".into(),
            pos_x: 1,
            pos_y: 2,
            mfa_code: None,
        },
        &http_client(&server, "pre-enrol", &token),
        &vault,
        &store,
    )
    .await
    .unwrap();

    let config = store.load().unwrap();
    assert_eq!(config.agent_id, identity.agent_id);
    assert_eq!(config.position, position());
    let plaintext = vault
        .unseal(&config.sealed_token, Some(identity.agent_id.as_bytes()))
        .unwrap();
    assert_eq!(plaintext, b"T0");
}

#[tokio::test]
async fn configure_walks_the_mfa_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agents/identify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "mfa_required"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/agents/verify_mfa"))
        .and(body_partial_json(json!({"mfa_code": "123456"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "agent_token": "T0"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("runtime_config.json"));
    let vault = HostBoundVault::new();
    let token = SharedToken::new("");

    configure(
        ConfigureOptions {
            room_name: "Lab 3".into(),
            pos_x: 0,
            pos_y: 0,
            mfa_code: Some("123456".into()),
        },
        &http_client(&server, "pre-enrol", &token),
        &vault,
        &store,
    )
    .await
    .unwrap();

    assert!(store.exists());
}

#[tokio::test]
async fn configure_without_mfa_code_fails_cleanly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agents/identify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "mfa_required"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("runtime_config.json"));
    let token = SharedToken::new("");

    let err = configure(
        ConfigureOptions {
            room_name: "Lab 3".into(),
            pos_x: 0,
            pos_y: 0,
            mfa_code: None,
        },
        &http_client(&server, "pre-enrol", &token),
        &HostBoundVault::new(),
        &store,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, outpost_runtime::ConfigureError::MfaRequired));
    assert!(!store.exists());
}

#[tokio::test]
async fn configure_rejects_invalid_positions_locally() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("runtime_config.json"));
    let token = SharedToken::new("");

    let err = configure(
        ConfigureOptions {
            room_name: "Lab 3".into(),
            pos_x: -1,
            pos_y: 0,
            mfa_code: None,
        },
        &http_client(&server, "pre-enrol", &token),
        &HostBoundVault::new(),
        &store,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        outpost_runtime::ConfigureError::InvalidPosition(_)
    ));
    // Nothing was sent to the server.
    assert!(server.received_requests().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Full session: spool drain + command round trip
// ---------------------------------------------------------------------------

async fn start_ws_server() -> (SocketAddr, mpsc::Receiver<serde_json::Value>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, frames_rx) = mpsc::channel::<serde_json::Value>(64);

    let app = Router::new().route(
        "/channel",
        any(move |ws: WebSocketUpgrade| {
            let frames_tx = frames_tx.clone();
            async move {
                ws.on_upgrade(move |mut socket: WebSocket| async move {
                    let _ = socket
                        .send(WsMessage::Text(r#"{"event":"auth:success"}"#.into()))
                        .await;
                    let command = json!({
                        "event": "command:execute",
                        "data": {
                            "command_id": "c1",
                            "type": "console",
                            "payload": "echo hello"
                        }
                    });
                    let _ = socket
                        .send(WsMessage::Text(command.to_string().into()))
                        .await;
                    while let Some(Ok(msg)) = socket.recv().await {
                        if let WsMessage::Text(text) = msg {
                            if let Ok(value) = serde_json::from_str(text.as_str()) {
                                let _ = frames_tx.send(value).await;
                            }
                        }
                    }
                })
            }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, frames_rx)
}

#[cfg(unix)]
#[tokio::test]
async fn session_drains_the_spool_then_delivers_live_results() {
    let rest = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agents/hardware"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&rest)
        .await;

    let (ws_addr, mut frames) = start_ws_server().await;

    // Seed a configured install with two spooled results.
    let dir = tempfile::tempdir().unwrap();
    let paths = AgentPaths::new(dir.path());
    paths.ensure_layout().unwrap();
    let vault = HostBoundVault::new();
    let identity = AgentIdentity {
        agent_id: "agent-1".into(),
        position: position(),
    };
    ConfigStore::new(paths.runtime_config())
        .save(&RuntimeConfig::new(
            identity.clone(),
            vault.seal(b"T0", Some(b"agent-1")).unwrap(),
        ))
        .unwrap();

    let spool = OfflineSpool::new(paths.offline_results());
    for id in ["s1", "s2"] {
        spool
            .append(&CommandResult::completed(
                &Command {
                    command_id: id.into(),
                    kind: CommandKind::Console,
                    payload: "true".into(),
                    timeout_sec: None,
                    working_dir: None,
                },
                0,
                String::new(),
                String::new(),
            ))
            .unwrap();
    }

    let mut options = RuntimeOptions::new(
        Url::parse(&rest.uri()).unwrap(),
        Url::parse(&format!("ws://{ws_addr}/channel")).unwrap(),
        dir.path(),
    );
    options.auto_update = false;
    options.status_interval = Duration::from_secs(300);
    options.reconnect_initial = Duration::from_millis(100);

    let agent = Agent::new(options);
    let shutdown = agent.shutdown_signal();
    let run = tokio::spawn(agent.run());

    // Spooled results replay first, in FIFO order.
    let mut seen = Vec::new();
    while seen.len() < 3 {
        let frame = tokio::time::timeout(Duration::from_secs(10), frames.recv())
            .await
            .expect("frame within deadline")
            .expect("ws server alive");
        if frame["event"] == "agent:command_result" {
            seen.push(frame["data"].clone());
        }
    }
    assert_eq!(seen[0]["command_id"], "s1");
    assert_eq!(seen[1]["command_id"], "s2");
    assert_eq!(seen[2]["command_id"], "c1");
    assert_eq!(seen[2]["success"], true);
    assert!(seen[2]["stdout"].as_str().unwrap().contains("hello"));

    // The spool is empty after the drain.
    assert!(spool.is_empty().unwrap());

    shutdown.trigger();
    let exit = tokio::time::timeout(Duration::from_secs(15), run)
        .await
        .expect("agent stops promptly")
        .unwrap()
        .unwrap();
    assert_eq!(exit, outpost_runtime::RunExit::Stopped);
}

#[tokio::test]
async fn missing_config_maps_to_the_config_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let options = RuntimeOptions::new(
        Url::parse("http://127.0.0.1:9/").unwrap(),
        Url::parse("ws://127.0.0.1:9/channel").unwrap(),
        dir.path(),
    );
    let err = Agent::new(options).run().await.unwrap_err();
    assert_eq!(
        err.exit_code(),
        outpost_core::ExitCode::ConfigIncomplete
    );
}
