// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured error submission to the server.

use crate::{AgentHttpClient, HttpError};
use outpost_error::{AgentError, ErrorReport};
use tracing::warn;

/// Posts [`ErrorReport`]s via the HTTP client.
///
/// Transport failures are logged and swallowed: error reporting must
/// never take the agent down, and the HTTP layer's retry policy is the
/// only retry applied.
#[derive(Clone)]
pub struct ErrorReporter {
    client: AgentHttpClient,
}

impl ErrorReporter {
    /// Reporter posting through `client`.
    pub fn new(client: AgentHttpClient) -> Self {
        Self { client }
    }

    /// Report an agent error, best-effort.
    pub async fn report(&self, error: &AgentError, target_version: Option<&str>) {
        self.submit(error.to_report(target_version)).await;
    }

    /// Submit a pre-built report, best-effort.
    pub async fn submit(&self, report: ErrorReport) {
        match self.client.report_error(&report).await {
            Ok(_) => {}
            Err(HttpError::AuthFailed) => {
                warn!(
                    target: "outpost.report",
                    error_type = %report.error_type,
                    "error report rejected: auth failed"
                );
            }
            Err(e) => {
                warn!(
                    target: "outpost.report",
                    error_type = %report.error_type,
                    error = %e,
                    "error report not delivered"
                );
            }
        }
    }
}
