// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable host facts the sealing key is derived from.

use std::sync::Once;
use tracing::warn;

static WEAK_BINDING_WARNING: Once = Once::new();

/// Stable facts identifying the machine and account context.
///
/// `machine_id` is the strongest binding; when it cannot be read the
/// vault falls back to the hostname, which survives fewer attack models
/// (a cloned disk keeps its hostname) but still blocks plain config-file
/// exfiltration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// OS-installed machine identifier, when available.
    pub machine_id: Option<String>,
    /// Machine hostname.
    pub hostname: String,
    /// Account the agent runs under.
    pub account: String,
}

impl HostContext {
    /// Collect the context of the current process.
    pub fn detect() -> Self {
        let machine_id = read_machine_id();
        if machine_id.is_none() {
            WEAK_BINDING_WARNING.call_once(|| {
                warn!(
                    target: "outpost.vault",
                    "no machine-id source found; sealing falls back to hostname binding"
                );
            });
        }
        Self {
            machine_id,
            hostname: read_hostname(),
            account: read_account(),
        }
    }

    /// The machine component of the key derivation: machine id when
    /// present, hostname otherwise.
    pub fn machine_binding(&self) -> &str {
        self.machine_id.as_deref().unwrap_or(&self.hostname)
    }
}

#[cfg(unix)]
fn read_machine_id() -> Option<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(text) = std::fs::read_to_string(path) {
            let id = text.trim();
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

#[cfg(not(unix))]
fn read_machine_id() -> Option<String> {
    // Windows exposes MachineGuid only through the registry; the computer
    // name is the portable stand-in.
    std::env::var("COMPUTERNAME").ok().filter(|s| !s.is_empty())
}

fn read_hostname() -> String {
    #[cfg(unix)]
    if let Ok(name) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

fn read_account() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
