// SPDX-License-Identifier: MIT OR Apache-2.0
//! Update pipeline tests against a mock release server.

use outpost_config::{ConfigStore, RuntimeConfig};
use outpost_core::{AgentPaths, Position, SealedToken, SharedToken, ShutdownSignal, UpdateDescriptor};
use outpost_error::ErrorCode;
use outpost_http::{AgentHttpClient, ErrorReporter, HttpConfig};
use outpost_update::{UpdateConfig, UpdateEngine, UpdateOutcome};
use semver::Version;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

const UPDATER_SCRIPT: &str = "#!/bin/sh\nprintf '%s\\n' \"$@\" > \"$(dirname \"$0\")/invoked.txt\"\n";

fn sha(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Build a release zip: manifest + payload + updater script.
fn build_package(include_updater: bool) -> Vec<u8> {
    let payload = b"agent binary v2".as_slice();
    let manifest = serde_json::json!({
        "version": "2.0.0",
        "release_date": "2026-07-01",
        "files": [{"path": "files/agent.bin", "checksum": sha(payload)}]
    })
    .to_string();

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        writer
            .start_file("manifest.json", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(manifest.as_bytes()).unwrap();
        writer
            .start_file("files/agent.bin", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(payload).unwrap();
        if include_updater {
            writer
                .start_file(
                    "Updater/outpost-updater",
                    SimpleFileOptions::default().unix_permissions(0o755),
                )
                .unwrap();
            writer.write_all(UPDATER_SCRIPT.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

struct Harness {
    _dir: tempfile::TempDir,
    paths: AgentPaths,
    store: ConfigStore,
    engine: UpdateEngine,
    shutdown: ShutdownSignal,
}

async fn harness(server: &MockServer) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = AgentPaths::new(dir.path());
    paths.ensure_layout().unwrap();

    let store = ConfigStore::new(paths.runtime_config());
    store
        .save(&RuntimeConfig {
            agent_id: "agent-1".into(),
            sealed_token: SealedToken::from_bytes(vec![1, 2, 3]).unwrap(),
            position: Position::new("Lab 3", 0, 0).unwrap(),
            ignored_versions: Default::default(),
        })
        .unwrap();

    let mut http_config = HttpConfig::new(Url::parse(&server.uri()).unwrap());
    http_config.request_timeout = Duration::from_secs(5);
    http_config.retry.max_retries = 0;
    let http = AgentHttpClient::new(http_config, "agent-1", SharedToken::new("T0"));
    let reporter = ErrorReporter::new(http.clone());

    let shutdown = ShutdownSignal::new();
    let engine = UpdateEngine::new(
        http,
        reporter,
        store.clone(),
        paths.clone(),
        UpdateConfig::new(Version::new(1, 0, 0)),
        shutdown.clone(),
    );

    Harness {
        _dir: dir,
        paths,
        store,
        engine,
        shutdown,
    }
}

fn descriptor(server: &MockServer, checksum: String) -> UpdateDescriptor {
    UpdateDescriptor {
        version: Version::new(2, 0, 0),
        download_url: format!("{}/agents/updates/download/pkg.zip", server.uri()),
        checksum_sha256: checksum,
        release_notes: None,
    }
}

async fn mount_package(server: &MockServer, bytes: Vec<u8>, expect: u64) {
    Mock::given(method("GET"))
        .and(path("/agents/updates/download/pkg.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .expect(expect)
        .mount(server)
        .await;
}

async fn mount_error_sink(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/agents/errors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
        .mount(server)
        .await;
}

#[cfg(unix)]
#[tokio::test]
async fn happy_path_stages_verifies_and_launches_the_updater() {
    let server = MockServer::start().await;
    let package = build_package(true);
    let checksum = sha(&package).to_uppercase(); // case-insensitive compare
    mount_package(&server, package, 1).await;

    let h = harness(&server).await;
    let outcome = h.engine.apply(descriptor(&server, checksum)).await;
    assert_eq!(
        outcome,
        UpdateOutcome::ShutdownRequested {
            version: Version::new(2, 0, 0)
        }
    );

    let extracted = h.paths.update_extracted_dir("2.0.0");
    assert!(extracted.join("files").join("agent.bin").is_file());

    // The detached updater ran and recorded its arguments.
    let invoked = extracted.join("Updater").join("invoked.txt");
    let mut args = String::new();
    for _ in 0..50 {
        if let Ok(text) = std::fs::read_to_string(&invoked) {
            args = text;
            if !args.is_empty() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(args[0], "--new-version");
    assert_eq!(args[1], "2.0.0");
    assert_eq!(args[2], "--old-version");
    assert_eq!(args[3], "1.0.0");
    assert_eq!(args[4], "--source-path");
    assert!(args[5].ends_with("extracted/2.0.0"));
    assert_eq!(args[6], "--service-wait-timeout");
    assert_eq!(args[8], "--watchdog-period");

    // A launched hand-off never poisons the version.
    assert!(!h.store.is_ignored("2.0.0").unwrap());
}

#[tokio::test]
async fn checksum_mismatch_deletes_ignores_and_reports() {
    let server = MockServer::start().await;
    mount_package(&server, build_package(true), 1).await;
    mount_error_sink(&server).await;

    let h = harness(&server).await;
    let outcome = h
        .engine
        .apply(descriptor(&server, sha(b"some other bytes")))
        .await;
    assert_eq!(
        outcome,
        UpdateOutcome::Failed {
            error: ErrorCode::ChecksumMismatch
        }
    );

    // Downloaded file deleted, version ignored, updater never staged.
    assert!(!h
        .paths
        .update_download_dir()
        .join("pkg.zip")
        .exists());
    assert!(h.store.is_ignored("2.0.0").unwrap());
    assert!(!h.paths.update_extracted_dir("2.0.0").exists());

    // The failure was reported with the stable taxonomy string.
    let reports = server.received_requests().await.unwrap();
    let error_post = reports
        .iter()
        .find(|r| r.url.path() == "/agents/errors")
        .expect("error report posted");
    let body: serde_json::Value = serde_json::from_slice(&error_post.body).unwrap();
    assert_eq!(body["error_type"], "ChecksumMismatch");
    assert_eq!(body["target_version"], "2.0.0");
}

#[tokio::test]
async fn ignored_versions_skip_the_download_entirely() {
    let server = MockServer::start().await;
    // Zero downloads expected.
    mount_package(&server, build_package(true), 0).await;

    let h = harness(&server).await;
    h.store.add_ignored_version("2.0.0").unwrap();

    let outcome = h.engine.apply(descriptor(&server, sha(b"x"))).await;
    assert_eq!(outcome, UpdateOutcome::Ignored);
}

#[tokio::test]
async fn non_newer_versions_are_skipped() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    let mut d = descriptor(&server, sha(b"x"));
    d.version = Version::new(1, 0, 0);
    assert_eq!(h.engine.apply(d).await, UpdateOutcome::UpToDate);

    let mut d = descriptor(&server, sha(b"x"));
    d.version = Version::new(0, 9, 0);
    assert_eq!(h.engine.apply(d).await, UpdateOutcome::UpToDate);
}

#[tokio::test]
async fn missing_manifest_is_invalid_package() {
    let server = MockServer::start().await;
    // A zip with no manifest.json at all.
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        writer
            .start_file("files/agent.bin", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"v2").unwrap();
        writer.finish().unwrap();
    }
    let package = cursor.into_inner();
    let checksum = sha(&package);
    mount_package(&server, package, 1).await;
    mount_error_sink(&server).await;

    let h = harness(&server).await;
    let outcome = h.engine.apply(descriptor(&server, checksum)).await;
    assert_eq!(
        outcome,
        UpdateOutcome::Failed {
            error: ErrorCode::InvalidPackage
        }
    );
    assert!(h.store.is_ignored("2.0.0").unwrap());
}

#[tokio::test]
async fn cancellation_does_not_poison_the_version() {
    let server = MockServer::start().await;
    let h = harness(&server).await;
    h.shutdown.trigger();

    let outcome = h.engine.apply(descriptor(&server, sha(b"x"))).await;
    assert_eq!(outcome, UpdateOutcome::Cancelled);
    assert!(!h.store.is_ignored("2.0.0").unwrap());
}

#[tokio::test]
async fn check_flow_converts_the_server_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/agents/updates/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "update_available": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server).await;
    assert_eq!(h.engine.check().await, UpdateOutcome::UpToDate);
}
