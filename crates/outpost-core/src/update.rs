// SPDX-License-Identifier: MIT OR Apache-2.0
//! Release descriptors and package manifests.

use semver::Version;
use serde::{Deserialize, Serialize};

/// Pointer to a downloadable agent release.
///
/// Produced either by the periodic update check or by an
/// `agent:new_version_available` push event. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    /// Release version.
    pub version: Version,
    /// Where to fetch the package.
    pub download_url: String,
    /// Expected SHA-256 of the package file, hex encoded.
    pub checksum_sha256: String,
    /// Optional human-readable notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

/// One file inventoried by an [`UpdateManifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path relative to the extracted package root.
    pub path: String,
    /// Expected SHA-256 of the file, hex encoded.
    pub checksum: String,
}

/// `manifest.json` packaged inside a release.
///
/// Invariant: `version` equals the descriptor's version, and every listed
/// file exists post-extraction with a matching checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    /// Release version; must match the descriptor that fetched it.
    pub version: Version,
    /// Release date as published by the server.
    pub release_date: String,
    /// Inventory of staged files.
    pub files: Vec<ManifestFile>,
}

/// Case-insensitive comparison of two hex digests.
///
/// Servers disagree on digest casing; the hex digits themselves are what
/// must match.
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}
