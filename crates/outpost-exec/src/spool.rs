// SPDX-License-Identifier: MIT OR Apache-2.0
//! Offline result spool: a JSONL file of undelivered command results.
//!
//! Single writer (the delivery path), single reader (the orchestrator's
//! reconnect drain). Append-then-truncate keeps the file crash-safe: a
//! crash mid-drain re-delivers (at-least-once), never loses.

use outpost_core::CommandResult;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// On-disk FIFO of pending command results.
#[derive(Debug, Clone)]
pub struct OfflineSpool {
    path: PathBuf,
}

impl OfflineSpool {
    /// Spool backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one result.
    pub fn append(&self, result: &CommandResult) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(result)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    /// Read all spooled results in FIFO order. Corrupt lines (torn
    /// writes from a crash) are skipped with a warning.
    pub fn load(&self) -> std::io::Result<Vec<CommandResult>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut results = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CommandResult>(line) {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(
                        target: "outpost.exec",
                        line = idx + 1,
                        error = %e,
                        "skipping corrupt spool line"
                    );
                }
            }
        }
        Ok(results)
    }

    /// Number of readable entries.
    pub fn len(&self) -> std::io::Result<usize> {
        Ok(self.load()?.len())
    }

    /// Whether the spool has no readable entries.
    pub fn is_empty(&self) -> std::io::Result<bool> {
        Ok(self.load()?.is_empty())
    }

    /// Truncate after a successful drain.
    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::CommandKind;

    fn result(id: &str) -> CommandResult {
        CommandResult::failure(id, CommandKind::Console, "QueueFull")
    }

    fn spool() -> (tempfile::TempDir, OfflineSpool) {
        let dir = tempfile::tempdir().unwrap();
        let spool = OfflineSpool::new(dir.path().join("queues").join("command_results_offline.jsonl"));
        (dir, spool)
    }

    #[test]
    fn append_preserves_fifo_order() {
        let (_dir, spool) = spool();
        spool.append(&result("c1")).unwrap();
        spool.append(&result("c2")).unwrap();
        spool.append(&result("c3")).unwrap();

        let loaded = spool.load().unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.command_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn missing_file_is_an_empty_spool() {
        let (_dir, spool) = spool();
        assert!(spool.load().unwrap().is_empty());
        assert!(spool.is_empty().unwrap());
        spool.clear().unwrap();
    }

    #[test]
    fn clear_empties_the_spool() {
        let (_dir, spool) = spool();
        spool.append(&result("c1")).unwrap();
        assert_eq!(spool.len().unwrap(), 1);
        spool.clear().unwrap();
        assert!(spool.is_empty().unwrap());
    }

    #[test]
    fn corrupt_lines_are_skipped_not_fatal() {
        let (_dir, spool) = spool();
        spool.append(&result("c1")).unwrap();
        // Simulate a torn write.
        {
            let mut file = OpenOptions::new().append(true).open(spool.path()).unwrap();
            writeln!(file, "{{\"command_id\": \"torn").unwrap();
        }
        spool.append(&result("c2")).unwrap();

        let loaded = spool.load().unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.command_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn results_round_trip_through_the_spool() {
        let (_dir, spool) = spool();
        let original = CommandResult::completed(
            &outpost_core::Command {
                command_id: "c9".into(),
                kind: CommandKind::Bash,
                payload: "echo hi".into(),
                timeout_sec: None,
                working_dir: None,
            },
            0,
            "hi\n".into(),
            String::new(),
        );
        spool.append(&original).unwrap();
        assert_eq!(spool.load().unwrap(), vec![original]);
    }
}
