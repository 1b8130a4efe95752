// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request and response DTOs for the agent-facing REST endpoints.

use outpost_core::{Position, UpdateDescriptor};
use semver::Version;
use serde::{Deserialize, Serialize};

pub use outpost_core::HardwareReport;

/// Body of `POST /agents/identify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyRequest {
    /// Agent id (generated locally at first configure).
    pub agent_id: String,
    /// Declared workstation position.
    pub position: Position,
    /// Request a fresh token even though one may still be valid.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_renew: bool,
}

/// Body of `POST /agents/verify_mfa`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaRequest {
    /// Agent id under enrolment.
    pub agent_id: String,
    /// One-time code entered by the operator.
    pub mfa_code: String,
}

/// Status discriminator shared by identify and MFA responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrolmentStatus {
    /// Accepted; `agent_token` is present.
    Success,
    /// An MFA code must be verified before a token is issued.
    MfaRequired,
    /// The declared position was rejected.
    PositionError,
    /// Any status this agent version does not recognize.
    #[serde(other)]
    Other,
}

/// Response of identify / verify_mfa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyResponse {
    /// Outcome discriminator.
    pub status: EnrolmentStatus,
    /// Bearer token, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_token: Option<String>,
    /// Human-readable detail for non-success statuses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Generic `{status}` acknowledgement body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server-side outcome tag.
    pub status: String,
}

/// Response of `GET /agents/updates/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCheckResponse {
    /// Whether the server advertises a newer release.
    pub update_available: bool,
    /// Advertised version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    /// Package URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Expected package digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
    /// Release notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

impl UpdateCheckResponse {
    /// Convert into a descriptor when the response is complete.
    pub fn into_descriptor(self) -> Option<UpdateDescriptor> {
        if !self.update_available {
            return None;
        }
        Some(UpdateDescriptor {
            version: self.version?,
            download_url: self.download_url?,
            checksum_sha256: self.checksum_sha256?,
            release_notes: self.release_notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_request_omits_default_force_renew() {
        let req = IdentifyRequest {
            agent_id: "a".into(),
            position: Position::new("Lab", 0, 0).unwrap(),
            force_renew: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("force_renew"));

        let req = IdentifyRequest { force_renew: true, ..req };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"force_renew\":true"));
    }

    #[test]
    fn unknown_status_maps_to_other() {
        let resp: IdentifyResponse =
            serde_json::from_str(r#"{"status":"rate_limited","message":"slow down"}"#).unwrap();
        assert_eq!(resp.status, EnrolmentStatus::Other);
    }

    #[test]
    fn known_statuses_parse() {
        for (text, status) in [
            ("success", EnrolmentStatus::Success),
            ("mfa_required", EnrolmentStatus::MfaRequired),
            ("position_error", EnrolmentStatus::PositionError),
        ] {
            let resp: IdentifyResponse =
                serde_json::from_str(&format!(r#"{{"status":"{text}"}}"#)).unwrap();
            assert_eq!(resp.status, status);
        }
    }

    #[test]
    fn incomplete_update_check_yields_no_descriptor() {
        let resp: UpdateCheckResponse =
            serde_json::from_str(r#"{"update_available":true,"version":"2.0.0"}"#).unwrap();
        assert!(resp.into_descriptor().is_none());

        let resp: UpdateCheckResponse =
            serde_json::from_str(r#"{"update_available":false}"#).unwrap();
        assert!(resp.into_descriptor().is_none());
    }

    #[test]
    fn complete_update_check_yields_descriptor() {
        let resp: UpdateCheckResponse = serde_json::from_str(
            r#"{"update_available":true,"version":"2.0.0","download_url":"https://s/p.zip","checksum_sha256":"AB"}"#,
        )
        .unwrap();
        let d = resp.into_descriptor().unwrap();
        assert_eq!(d.version, Version::new(2, 0, 0));
        assert_eq!(d.checksum_sha256, "AB");
    }
}
