// SPDX-License-Identifier: MIT OR Apache-2.0
//! Package staging: extraction and manifest verification.

use outpost_core::{checksum_matches, UpdateManifest};
use semver::Version;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Step-level failures with their stable classification.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The archive could not be extracted.
    #[error("extraction failed: {0}")]
    Extraction(String),
    /// `manifest.json` is missing, unreadable, or inconsistent.
    #[error("invalid package: {0}")]
    InvalidPackage(String),
    /// A staged file's digest does not match the manifest.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    FileChecksum {
        /// Manifest-relative path.
        path: String,
        /// Digest the manifest promises.
        expected: String,
        /// Digest the staged file has.
        actual: String,
    },
    /// Filesystem failure while staging.
    #[error("staging I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// SHA-256 of a file, lowercase hex, streamed in chunks.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Extract `archive` into `target`, wiping any prior directory of the
/// same name first.
pub async fn extract(archive: &Path, target: &Path) -> Result<(), StageError> {
    match tokio::fs::remove_dir_all(target).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(StageError::Io(e)),
    }
    tokio::fs::create_dir_all(target).await?;

    let archive = archive.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), StageError> {
        let file = std::fs::File::open(&archive)
            .map_err(|e| StageError::Extraction(format!("open archive: {e}")))?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| StageError::Extraction(format!("read archive: {e}")))?;
        zip.extract(&target)
            .map_err(|e| StageError::Extraction(e.to_string()))
    })
    .await
    .map_err(|e| StageError::Extraction(format!("extraction task failed: {e}")))?
}

/// Read and structurally validate `manifest.json` from an extracted
/// package.
pub async fn read_manifest(extracted: &Path) -> Result<UpdateManifest, StageError> {
    let path = extracted.join("manifest.json");
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| StageError::InvalidPackage(format!("manifest.json unreadable: {e}")))?;
    let manifest: UpdateManifest = serde_json::from_str(&text)
        .map_err(|e| StageError::InvalidPackage(format!("manifest.json malformed: {e}")))?;
    for entry in &manifest.files {
        if !is_safe_relative(&entry.path) {
            return Err(StageError::InvalidPackage(format!(
                "manifest path escapes the package: {}",
                entry.path
            )));
        }
    }
    Ok(manifest)
}

/// Verify the manifest against a descriptor version and the staged tree:
/// version equality, then existence + SHA-256 of every listed file.
pub async fn verify_manifest(
    manifest: &UpdateManifest,
    expected_version: &Version,
    extracted: &Path,
) -> Result<(), StageError> {
    if manifest.version != *expected_version {
        return Err(StageError::InvalidPackage(format!(
            "manifest version {} does not match descriptor {expected_version}",
            manifest.version
        )));
    }

    for entry in &manifest.files {
        let staged = extracted.join(&entry.path);
        if !staged.is_file() {
            return Err(StageError::InvalidPackage(format!(
                "manifest lists missing file: {}",
                entry.path
            )));
        }
        let actual = hash_file(&staged).await?;
        if !checksum_matches(&entry.checksum, &actual) {
            return Err(StageError::FileChecksum {
                path: entry.path.clone(),
                expected: entry.checksum.clone(),
                actual,
            });
        }
    }
    Ok(())
}

/// Manifest paths must stay inside the extracted tree.
fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    if path.is_absolute() {
        return false;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Best-effort recursive delete for staging residue.
pub async fn remove_residue(path: &PathBuf) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::debug!(target: "outpost.update", path = %path.display(), error = %e, "residue cleanup failed");
        }
    }
}
