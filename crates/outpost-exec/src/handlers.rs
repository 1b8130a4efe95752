// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-kind command handlers.

use crate::process::run_argv;
use outpost_core::{Command, CommandKind, CommandResult, ShutdownSignal};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Execution context threaded into every handler invocation.
#[derive(Clone)]
pub struct ExecContext {
    /// Timeout applied when the command does not override it.
    pub default_timeout: Duration,
    /// Shutdown broadcast observed by long-running handlers.
    pub shutdown: ShutdownSignal,
    /// Cooperative grace before a running process is killed on shutdown.
    pub shutdown_grace: Duration,
}

impl ExecContext {
    /// Effective timeout for `cmd`.
    pub fn timeout_for(&self, cmd: &Command) -> Duration {
        cmd.timeout_sec
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }
}

/// One command kind's execution strategy.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute `cmd`, producing its result. Handlers never panic on bad
    /// payloads; they synthesize failure results instead.
    async fn handle(&self, cmd: &Command, ctx: &ExecContext) -> CommandResult;
}

/// Kind → handler dispatch table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard production registry: interpreters, system verbs, and
    /// service control.
    pub fn standard() -> Self {
        let shell: Arc<dyn CommandHandler> = Arc::new(ShellHandler);
        let mut registry = Self::new();
        registry.register(CommandKind::Console, shell.clone());
        registry.register(CommandKind::Cmd, shell.clone());
        registry.register(CommandKind::Powershell, shell.clone());
        registry.register(CommandKind::Bash, shell);
        registry.register(CommandKind::System, Arc::new(crate::SystemCommandHandler::new()));
        registry.register(
            CommandKind::Service,
            Arc::new(crate::ServiceCommandHandler::platform_default()),
        );
        registry
    }

    /// Register (or replace) the handler for `kind`.
    pub fn register(&mut self, kind: CommandKind, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Look up the handler for `kind`.
    pub fn get(&self, kind: CommandKind) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

/// Interpreter dispatch for `console` / `cmd` / `powershell` / `bash`.
///
/// The payload is handed to the interpreter verbatim; stdout and stderr
/// are captured as UTF-8 with replacement on invalid bytes.
pub struct ShellHandler;

impl ShellHandler {
    /// Interpreter argv for a command kind.
    ///
    /// Kinds whose interpreter does not exist on this platform fail at
    /// spawn time with `CommandSpawnFailed`, which is the honest answer.
    pub fn argv(kind: CommandKind, payload: &str) -> Vec<String> {
        let (program, flag) = match kind {
            CommandKind::Cmd => ("cmd", "/C"),
            CommandKind::Powershell => {
                if cfg!(windows) {
                    ("powershell", "-Command")
                } else {
                    ("pwsh", "-Command")
                }
            }
            CommandKind::Bash => ("bash", "-c"),
            // console and anything routed here defaults to the platform shell
            _ => {
                if cfg!(windows) {
                    ("cmd", "/C")
                } else {
                    ("sh", "-c")
                }
            }
        };
        vec![program.to_string(), flag.to_string(), payload.to_string()]
    }
}

#[async_trait::async_trait]
impl CommandHandler for ShellHandler {
    async fn handle(&self, cmd: &Command, ctx: &ExecContext) -> CommandResult {
        let argv = Self::argv(cmd.kind, &cmd.payload);
        run_argv(
            cmd,
            &argv,
            ctx.timeout_for(cmd),
            &ctx.shutdown,
            ctx.shutdown_grace,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_override_wins() {
        let ctx = ExecContext {
            default_timeout: Duration::from_secs(60),
            shutdown: ShutdownSignal::new(),
            shutdown_grace: Duration::from_secs(10),
        };
        let mut cmd = Command {
            command_id: "c".into(),
            kind: CommandKind::Bash,
            payload: "true".into(),
            timeout_sec: None,
            working_dir: None,
        };
        assert_eq!(ctx.timeout_for(&cmd), Duration::from_secs(60));
        cmd.timeout_sec = Some(5);
        assert_eq!(ctx.timeout_for(&cmd), Duration::from_secs(5));
    }

    #[test]
    fn shell_argv_per_kind() {
        let argv = ShellHandler::argv(CommandKind::Bash, "echo hi");
        assert_eq!(argv, vec!["bash", "-c", "echo hi"]);

        let argv = ShellHandler::argv(CommandKind::Cmd, "dir");
        assert_eq!(argv, vec!["cmd", "/C", "dir"]);

        let argv = ShellHandler::argv(CommandKind::Console, "echo hi");
        if cfg!(windows) {
            assert_eq!(argv[0], "cmd");
        } else {
            assert_eq!(argv[..2], ["sh".to_string(), "-c".to_string()]);
        }
    }

    #[test]
    fn standard_registry_covers_all_kinds() {
        let registry = HandlerRegistry::standard();
        for kind in [
            CommandKind::Console,
            CommandKind::Cmd,
            CommandKind::Powershell,
            CommandKind::Bash,
            CommandKind::System,
            CommandKind::Service,
        ] {
            assert!(registry.get(kind).is_some(), "missing handler for {kind}");
        }
    }
}
