// SPDX-License-Identifier: MIT OR Apache-2.0
//! Authenticated HTTP client for the Outpost server REST API.
//!
//! Every request carries the agent identification headers; transport
//! errors and 5xx responses are retried with exponential backoff, 4xx
//! never are, and a 401 triggers at most one token refresh followed by
//! exactly one retry of the original request.

#![deny(unsafe_code)]

pub mod report;
pub mod retry;
pub mod wire;

pub use report::ErrorReporter;
pub use retry::RetryConfig;

use outpost_core::SharedToken;
use retry::compute_delay;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;
use wire::{
    HardwareReport, IdentifyRequest, IdentifyResponse, MfaRequest, StatusResponse,
    UpdateCheckResponse,
};

/// Errors from the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Connection, DNS, or timeout failure.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// Non-success status outside the auth path.
    #[error("server returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
    /// The server rejected the bearer token (401).
    #[error("server rejected agent credentials")]
    AuthFailed,
    /// The response body could not be decoded.
    #[error("response decode failed: {0}")]
    Decode(#[source] reqwest::Error),
    /// Streaming a download to disk failed.
    #[error("download I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The request URL could not be formed.
    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl HttpError {
    /// Transport failures and 5xx responses are worth another attempt;
    /// everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Transport(_) => true,
            HttpError::Status { status } => *status >= 500,
            _ => false,
        }
    }
}

/// Hook invoked on a 401 to obtain a fresh token.
///
/// Implementations must be serialized internally: overlapping callers
/// coalesce into one refresh. On success the shared token cell already
/// holds the new value.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refresh the shared token. Errors mean auth is unrecoverable for
    /// this request.
    async fn refresh(&self) -> Result<(), HttpError>;
}

/// Configuration for [`AgentHttpClient`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Server base URL, e.g. `https://server.example/`.
    pub base_url: Url,
    /// Process-wide request timeout.
    pub request_timeout: Duration,
    /// Retry/backoff policy.
    pub retry: RetryConfig,
}

impl HttpConfig {
    /// Config with the standard timeouts for `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Authenticated client for the agent-facing REST endpoints.
#[derive(Clone)]
pub struct AgentHttpClient {
    inner: reqwest::Client,
    config: HttpConfig,
    agent_id: String,
    token: SharedToken,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl AgentHttpClient {
    /// Build a client for `agent_id` reading its bearer token from
    /// `token`.
    pub fn new(config: HttpConfig, agent_id: impl Into<String>, token: SharedToken) -> Self {
        let inner = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client construction is infallible with these options");
        Self {
            inner,
            config,
            agent_id: agent_id.into(),
            token,
            refresher: None,
        }
    }

    /// Attach the refresh hook used on 401 responses.
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// The agent id placed in `X-Agent-Id`.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    // -- Endpoints ------------------------------------------------------

    /// POST `/agents/identify`. Unauthenticated: this is how tokens are
    /// obtained in the first place.
    pub async fn identify(&self, req: &IdentifyRequest) -> Result<IdentifyResponse, HttpError> {
        self.post_json("agents/identify", req, false).await
    }

    /// POST `/agents/verify_mfa`.
    pub async fn verify_mfa(&self, req: &MfaRequest) -> Result<IdentifyResponse, HttpError> {
        self.post_json("agents/verify_mfa", req, false).await
    }

    /// POST `/agents/hardware`.
    pub async fn report_hardware(&self, report: &HardwareReport) -> Result<StatusResponse, HttpError> {
        self.post_json("agents/hardware", report, true).await
    }

    /// GET `/agents/updates/check?current_version=…`.
    pub async fn check_for_updates(
        &self,
        current_version: &str,
    ) -> Result<UpdateCheckResponse, HttpError> {
        let path = format!(
            "agents/updates/check?current_version={}",
            urlencode(current_version)
        );
        self.get_json(&path, true).await
    }

    /// POST `/agents/errors`.
    pub async fn report_error(
        &self,
        report: &outpost_error::ErrorReport,
    ) -> Result<StatusResponse, HttpError> {
        self.post_json("agents/errors", report, true).await
    }

    /// Stream `url` to `dest`, hashing as it goes. The body is never
    /// held in memory; the returned digest is lowercase hex.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<String, HttpError> {
        let url = Url::parse(url)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let send = || async {
            let resp = self
                .request(reqwest::Method::GET, url.clone(), true)
                .send()
                .await
                .map_err(HttpError::Transport)?;
            check_status(resp)
        };

        let mut resp = match self.with_retry("download", send).await {
            Err(HttpError::AuthFailed) => {
                let Some(refresher) = self.refresher.clone() else {
                    return Err(HttpError::AuthFailed);
                };
                warn!(target: "outpost.http", url = %url, "401 received, refreshing token");
                refresher.refresh().await?;
                self.with_retry("download", send).await?
            }
            other => other?,
        };

        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        loop {
            let chunk = match resp.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(HttpError::Transport(e));
                }
            };
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        let digest = hex::encode(hasher.finalize());
        debug!(
            target: "outpost.http",
            url = %url,
            bytes = written,
            sha256 = %digest,
            "download complete"
        );
        Ok(digest)
    }

    // -- Request plumbing -----------------------------------------------

    fn endpoint(&self, path: &str) -> Result<Url, HttpError> {
        Ok(self.config.base_url.join(path)?)
    }

    fn request(&self, method: reqwest::Method, url: Url, authed: bool) -> reqwest::RequestBuilder {
        let mut builder = self
            .inner
            .request(method, url)
            .header("X-Agent-Id", &self.agent_id)
            .header("X-Client-Type", "agent")
            .header(reqwest::header::ACCEPT, "application/json");
        if authed {
            builder = builder.bearer_auth(self.token.get());
        }
        builder
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        authed: bool,
    ) -> Result<T, HttpError> {
        let url = self.endpoint(path)?;
        let body = serde_json::to_value(body)
            .expect("request DTOs serialize infallibly");
        self.json_round_trip(reqwest::Method::POST, url, Some(body), authed)
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, authed: bool) -> Result<T, HttpError> {
        let url = self.endpoint(path)?;
        self.json_round_trip(reqwest::Method::GET, url, None, authed)
            .await
    }

    async fn json_round_trip<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: Url,
        body: Option<serde_json::Value>,
        authed: bool,
    ) -> Result<T, HttpError> {
        match self.json_attempt(&method, &url, &body, authed).await {
            Err(HttpError::AuthFailed) if authed => {
                let Some(refresher) = self.refresher.clone() else {
                    return Err(HttpError::AuthFailed);
                };
                warn!(target: "outpost.http", url = %url, "401 received, refreshing token");
                refresher.refresh().await?;
                // Exactly one retry with the refreshed token.
                self.json_attempt(&method, &url, &body, authed).await
            }
            other => other,
        }
    }

    async fn json_attempt<T: DeserializeOwned>(
        &self,
        method: &reqwest::Method,
        url: &Url,
        body: &Option<serde_json::Value>,
        authed: bool,
    ) -> Result<T, HttpError> {
        let send = || async {
            let mut builder = self.request(method.clone(), url.clone(), authed);
            if let Some(body) = body {
                builder = builder.json(body);
            }
            let resp = builder.send().await.map_err(HttpError::Transport)?;
            check_status(resp)
        };
        let resp = self.with_retry(url.path(), send).await?;
        resp.json::<T>().await.map_err(HttpError::Decode)
    }

    /// Run `op` with the configured backoff. Only retryable errors are
    /// attempted again; the last error is returned as-is.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, HttpError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, HttpError>>,
    {
        let retry = &self.config.retry;
        let max_attempts = retry.max_retries + 1;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = compute_delay(retry, attempt);
                    warn!(
                        target: "outpost.http",
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable request failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = resp.status();
    if status.as_u16() == 401 {
        return Err(HttpError::AuthFailed);
    }
    if !status.is_success() {
        return Err(HttpError::Status {
            status: status.as_u16(),
        });
    }
    Ok(resp)
}

/// Minimal percent-encoding for query values (version strings only
/// contain a narrow character set, but `+` in build metadata matters).
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
