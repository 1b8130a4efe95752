// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end executor tests with the real interpreter handlers.

#![cfg(unix)]

use outpost_core::{Command, CommandKind, ShutdownSignal};
use outpost_exec::{spawn, ExecutorConfig, HandlerRegistry, SubmitOutcome};
use std::time::Duration;

fn console(id: &str, payload: &str) -> Command {
    Command {
        command_id: id.into(),
        kind: CommandKind::Console,
        payload: payload.into(),
        timeout_sec: None,
        working_dir: None,
    }
}

#[tokio::test]
async fn echo_round_trip() {
    let shutdown = ShutdownSignal::new();
    let (handle, mut results) = spawn(
        ExecutorConfig::default(),
        HandlerRegistry::standard(),
        shutdown.clone(),
    );

    assert_eq!(
        handle.submit(console("c1", "echo hello")),
        SubmitOutcome::Accepted
    );

    let result = tokio::time::timeout(Duration::from_secs(2), results.recv())
        .await
        .expect("result within two seconds")
        .unwrap();
    assert_eq!(result.command_id, "c1");
    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.stdout.contains("hello"));
    shutdown.trigger();
}

#[tokio::test]
async fn completion_order_may_differ_from_dispatch_order() {
    let shutdown = ShutdownSignal::new();
    let config = ExecutorConfig {
        max_parallel: 2,
        ..ExecutorConfig::default()
    };
    let (handle, mut results) = spawn(config, HandlerRegistry::standard(), shutdown.clone());

    handle.submit(console("slow", "sleep 0.4; echo slow"));
    handle.submit(console("fast", "echo fast"));

    let first = results.recv().await.unwrap();
    let second = results.recv().await.unwrap();
    assert_eq!(first.command_id, "fast");
    assert_eq!(second.command_id, "slow");
    shutdown.trigger();
}

#[tokio::test]
async fn payload_timeout_override_is_enforced() {
    let shutdown = ShutdownSignal::new();
    let (handle, mut results) = spawn(
        ExecutorConfig::default(),
        HandlerRegistry::standard(),
        shutdown.clone(),
    );

    let mut cmd = console("t1", "sleep 30");
    cmd.timeout_sec = Some(1);
    handle.submit(cmd);

    let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
        .await
        .expect("timeout enforced promptly")
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("CommandTimeout"));
    shutdown.trigger();
}

#[tokio::test]
async fn working_dir_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "present").unwrap();

    let shutdown = ShutdownSignal::new();
    let (handle, mut results) = spawn(
        ExecutorConfig::default(),
        HandlerRegistry::standard(),
        shutdown.clone(),
    );

    let mut cmd = console("w1", "cat marker.txt");
    cmd.working_dir = Some(dir.path().to_path_buf());
    handle.submit(cmd);

    let result = results.recv().await.unwrap();
    assert!(result.success);
    assert!(result.stdout.contains("present"));
    shutdown.trigger();
}
