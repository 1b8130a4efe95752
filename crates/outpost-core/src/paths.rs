// SPDX-License-Identifier: MIT OR Apache-2.0
//! On-disk layout under the agent data directory.

use std::path::{Path, PathBuf};

/// Resolved filesystem layout for one agent install.
///
/// ```text
/// <data_dir>/
///   runtime_config.json
///   updates/download/
///   updates/extracted/<version>/
///   queues/command_results_offline.jsonl
///   logs/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    data_dir: PathBuf,
}

impl AgentPaths {
    /// Layout rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// The data directory root.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Persisted runtime configuration.
    pub fn runtime_config(&self) -> PathBuf {
        self.data_dir.join("runtime_config.json")
    }

    /// Directory update packages are downloaded into.
    pub fn update_download_dir(&self) -> PathBuf {
        self.data_dir.join("updates").join("download")
    }

    /// Staging directory for one extracted release.
    pub fn update_extracted_dir(&self, version: &str) -> PathBuf {
        self.data_dir.join("updates").join("extracted").join(version)
    }

    /// Offline spool of pending command results.
    pub fn offline_results(&self) -> PathBuf {
        self.data_dir.join("queues").join("command_results_offline.jsonl")
    }

    /// Log directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Create every directory of the layout that must pre-exist.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.update_download_dir())?;
        std::fs::create_dir_all(self.data_dir.join("updates").join("extracted"))?;
        std::fs::create_dir_all(self.data_dir.join("queues"))?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_contract() {
        let p = AgentPaths::new("/var/lib/outpost");
        assert_eq!(
            p.runtime_config(),
            PathBuf::from("/var/lib/outpost/runtime_config.json")
        );
        assert_eq!(
            p.update_extracted_dir("2.0.0"),
            PathBuf::from("/var/lib/outpost/updates/extracted/2.0.0")
        );
        assert_eq!(
            p.offline_results(),
            PathBuf::from("/var/lib/outpost/queues/command_results_offline.jsonl")
        );
    }

    #[test]
    fn ensure_layout_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let p = AgentPaths::new(tmp.path().join("agent"));
        p.ensure_layout().unwrap();
        assert!(p.update_download_dir().is_dir());
        assert!(p.logs_dir().is_dir());
        assert!(p.offline_results().parent().unwrap().is_dir());
    }
}
