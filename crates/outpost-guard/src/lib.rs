// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-instance guard: a machine-global named lock.
//!
//! At most one agent process per deployment GUID may run at a time. The
//! guard is an exclusive advisory lock on a world-readable lock file, so
//! unrelated sessions can observe it and fail fast, and the OS transfers
//! ownership to the next acquirer when the holder dies, so abandoned locks
//! never deadlock.
//!
//! Losing the race is a normal condition (distinct clean exit code), not
//! an error report.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Errors acquiring the guard, other than the normal already-held case.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The lock file could not be created or opened.
    #[error("cannot open lock file {path}: {source}")]
    Open {
        /// Lock file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An unexpected I/O failure while locking.
    #[error("lock operation failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of an acquisition attempt.
#[derive(Debug)]
pub enum Acquire {
    /// This process now owns the guard; keep the value alive for the
    /// lifetime of the instance.
    Acquired(InstanceGuard),
    /// Another live process holds the guard.
    AlreadyHeld {
        /// Pid recorded by the holder, when readable.
        holder_pid: Option<u32>,
    },
}

/// An owned machine-global lock. Released on drop and on process death.
#[derive(Debug)]
pub struct InstanceGuard {
    file: File,
    path: PathBuf,
}

impl InstanceGuard {
    /// Try to acquire the guard named `name` (derived from the
    /// deployment GUID). Non-blocking.
    pub fn acquire(name: &str) -> Result<Acquire, GuardError> {
        Self::acquire_in(&lock_dir(), name)
    }

    /// Try to acquire the guard in an explicit directory. Tests use this
    /// to sandbox the lock namespace.
    pub fn acquire_in(dir: &Path, name: &str) -> Result<Acquire, GuardError> {
        std::fs::create_dir_all(dir).map_err(|source| GuardError::Open {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!("{}.lock", sanitize(name)));

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| GuardError::Open {
                path: path.clone(),
                source,
            })?;

        // Everyone may read the file to observe the holder pid.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = file.metadata().and_then(|m| {
                let mut perms = m.permissions();
                perms.set_mode(0o644);
                std::fs::set_permissions(&path, perms)
            });
        }

        match file.try_lock_exclusive() {
            Ok(()) => {
                // Lock is ours; record our pid for diagnostics and the
                // stop entry point.
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                writeln!(file, "{}", std::process::id())?;
                file.flush()?;
                debug!(target: "outpost.guard", path = %path.display(), "instance guard acquired");
                Ok(Acquire::Acquired(InstanceGuard { file, path }))
            }
            Err(e) if e.kind() != fs2::lock_contended_error().kind() => Err(GuardError::Io(e)),
            Err(_) => {
                let mut text = String::new();
                let holder_pid = file
                    .read_to_string(&mut text)
                    .ok()
                    .and_then(|_| text.trim().parse::<u32>().ok());
                debug!(
                    target: "outpost.guard",
                    path = %path.display(),
                    ?holder_pid,
                    "instance guard already held"
                );
                Ok(Acquire::AlreadyHeld { holder_pid })
            }
        }
    }

    /// Path of the lock file backing this guard.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the holder pid recorded in a lock file, if any.
    pub fn read_holder_pid(dir: &Path, name: &str) -> Option<u32> {
        let path = dir.join(format!("{}.lock", sanitize(name)));
        let text = std::fs::read_to_string(path).ok()?;
        text.trim().parse().ok()
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        // Unlock is best-effort; process exit releases it regardless.
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Machine-global directory hosting the lock files.
pub fn lock_dir() -> PathBuf {
    std::env::temp_dir().join("outpost-agent")
}

/// Derive the lock name for a deployment GUID.
pub fn lock_name(deployment_guid: &str) -> String {
    format!("outpost-{deployment_guid}")
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
