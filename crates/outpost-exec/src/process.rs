// SPDX-License-Identifier: MIT OR Apache-2.0
//! Supervised child-process execution with capture and timeout.

use outpost_core::{Command, CommandResult, ShutdownSignal};
use outpost_error::ErrorCode;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for pipe readers to settle after the child is gone.
/// Grandchildren that inherited the pipes can keep them open; captured
/// output up to this point is still returned.
const READER_SETTLE: Duration = Duration::from_millis(500);

/// Run `argv` for `cmd`, capturing stdout/stderr, enforcing `timeout`,
/// and honouring the two-phase shutdown (cooperative wait for
/// `shutdown_grace`, then kill).
pub(crate) async fn run_argv(
    cmd: &Command,
    argv: &[String],
    timeout: Duration,
    shutdown: &ShutdownSignal,
    shutdown_grace: Duration,
) -> CommandResult {
    debug_assert!(!argv.is_empty());

    let mut command = tokio::process::Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &cmd.working_dir {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(
                target: "outpost.exec",
                command_id = %cmd.command_id,
                program = %argv[0],
                error = %e,
                "spawn failed"
            );
            return CommandResult::failure(
                &cmd.command_id,
                cmd.kind,
                format!("{}: {e}", ErrorCode::CommandSpawnFailed.as_str()),
            );
        }
    };

    let (out_task, out_buf) = spawn_reader(child.stdout.take());
    let (err_task, err_buf) = spawn_reader(child.stderr.take());

    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Outcome::Exited(status.code().unwrap_or(-1)),
            Err(e) => Outcome::WaitFailed(e.to_string()),
        },
        _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
        _ = shutdown.triggered() => {
            // Grace period for the command to finish on its own.
            match tokio::time::timeout(shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => Outcome::Exited(status.code().unwrap_or(-1)),
                Ok(Err(e)) => Outcome::WaitFailed(e.to_string()),
                Err(_) => Outcome::ShutdownKilled,
            }
        }
    };

    if matches!(outcome, Outcome::TimedOut | Outcome::ShutdownKilled) {
        let _ = child.kill().await;
    }

    let stdout = settle_reader(out_task, out_buf).await;
    let stderr = settle_reader(err_task, err_buf).await;

    match outcome {
        Outcome::Exited(code) => {
            debug!(
                target: "outpost.exec",
                command_id = %cmd.command_id,
                exit_code = code,
                "command completed"
            );
            CommandResult::completed(cmd, code, stdout, stderr)
        }
        Outcome::TimedOut => {
            warn!(
                target: "outpost.exec",
                command_id = %cmd.command_id,
                timeout_sec = timeout.as_secs(),
                "command timed out, process terminated"
            );
            CommandResult::failure(&cmd.command_id, cmd.kind, ErrorCode::CommandTimeout.as_str())
                .with_captured(stdout, stderr)
        }
        Outcome::ShutdownKilled => CommandResult::failure(
            &cmd.command_id,
            cmd.kind,
            "terminated by agent shutdown",
        )
        .with_captured(stdout, stderr),
        Outcome::WaitFailed(reason) => CommandResult::failure(
            &cmd.command_id,
            cmd.kind,
            format!("{}: {reason}", ErrorCode::CommandSpawnFailed.as_str()),
        ),
    }
}

enum Outcome {
    Exited(i32),
    TimedOut,
    ShutdownKilled,
    WaitFailed(String),
}

type Captured = Arc<Mutex<Vec<u8>>>;

/// Read a pipe incrementally into a shared buffer, so a kill mid-stream
/// still leaves the captured-so-far bytes available.
fn spawn_reader<R>(pipe: Option<R>) -> (Option<JoinHandle<()>>, Captured)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let buf: Captured = Arc::new(Mutex::new(Vec::new()));
    let Some(mut pipe) = pipe else {
        return (None, buf);
    };
    let sink = buf.clone();
    let task = tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().expect("capture lock poisoned").extend_from_slice(&chunk[..n]),
            }
        }
    });
    (Some(task), buf)
}

async fn settle_reader(task: Option<JoinHandle<()>>, buf: Captured) -> String {
    if let Some(mut task) = task {
        if tokio::time::timeout(READER_SETTLE, &mut task).await.is_err() {
            // A grandchild still holds the pipe; take what we have.
            task.abort();
        }
    }
    let bytes = buf.lock().expect("capture lock poisoned").clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::CommandKind;

    fn cmd(payload: &str) -> Command {
        Command {
            command_id: "p1".into(),
            kind: CommandKind::Console,
            payload: payload.into(),
            timeout_sec: None,
            working_dir: None,
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let c = cmd("echo hello");
        let result = run_argv(
            &c,
            &sh("echo hello"),
            Duration::from_secs(5),
            &ShutdownSignal::new(),
            Duration::from_secs(1),
        )
        .await;
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_failed() {
        let c = cmd("exit 3");
        let result = run_argv(
            &c,
            &sh("echo oops >&2; exit 3"),
            Duration::from_secs(5),
            &ShutdownSignal::new(),
            Duration::from_secs(1),
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.stderr.contains("oops"));
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn timeout_kills_and_returns_partial_output() {
        let c = cmd("slow");
        let start = std::time::Instant::now();
        let result = run_argv(
            &c,
            &sh("echo early; sleep 30"),
            Duration::from_millis(300),
            &ShutdownSignal::new(),
            Duration::from_secs(1),
        )
        .await;
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.error_message.as_deref(), Some("CommandTimeout"));
        assert!(result.stdout.contains("early"));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let c = cmd("x");
        let result = run_argv(
            &c,
            &["outpost-test-no-such-binary".to_string()],
            Duration::from_secs(1),
            &ShutdownSignal::new(),
            Duration::from_secs(1),
        )
        .await;
        assert!(!result.success);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("CommandSpawnFailed"));
    }

    #[tokio::test]
    async fn shutdown_grace_lets_fast_commands_finish() {
        let c = cmd("quick");
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let result = run_argv(
            &c,
            &sh("sleep 0.1; echo done"),
            Duration::from_secs(5),
            &shutdown,
            Duration::from_secs(5),
        )
        .await;
        assert!(result.success);
        assert!(result.stdout.contains("done"));
    }

    #[tokio::test]
    async fn shutdown_kills_after_grace() {
        let c = cmd("stubborn");
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let start = std::time::Instant::now();
        let result = run_argv(
            &c,
            &sh("sleep 30"),
            Duration::from_secs(60),
            &shutdown,
            Duration::from_millis(200),
        )
        .await;
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some("terminated by agent shutdown")
        );
    }

    #[tokio::test]
    async fn invalid_utf8_output_is_replaced_not_lost() {
        let c = cmd("bytes");
        let result = run_argv(
            &c,
            &sh("printf 'ok\\377end'"),
            Duration::from_secs(5),
            &ShutdownSignal::new(),
            Duration::from_secs(1),
        )
        .await;
        assert!(result.success);
        assert!(result.stdout.starts_with("ok"));
        assert!(result.stdout.contains('\u{FFFD}'));
        assert!(result.stdout.ends_with("end"));
    }
}
