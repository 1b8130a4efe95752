// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistent bidirectional control channel to the Outpost server.
//!
//! One logical connection at a time. The handshake places the agent id
//! and bearer token in connection headers; the server answers with an
//! `auth:success` or `auth:failed` event. A supervisor task owns the
//! connection and the reconnect loop (exponential backoff with jitter);
//! the rest of the agent talks to it through a [`ChannelHandle`] (typed
//! notices in, [`EmitHandle`] out).
//!
//! Inbound events are delivered in arrival order within a connection; no
//! replay is attempted across reconnects, and outbound frames queued at
//! disconnect time are discarded rather than replayed into the next
//! session.

#![deny(unsafe_code)]

mod frame;
mod inbound;

pub use frame::{Frame, FrameError};
pub use inbound::InboundEvent;

use futures_util::{SinkExt, StreamExt};
use outpost_core::{SharedToken, ShutdownSignal};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound queue depth; emits beyond this while the writer is busy are
/// reported as failures, not buffered unboundedly.
const OUTBOUND_QUEUE: usize = 256;
/// Inbound notice queue depth.
const NOTICE_QUEUE: usize = 256;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection and reconnect settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Websocket endpoint, e.g. `ws://server.example/agents/channel`.
    pub url: Url,
    /// Agent id placed in the handshake headers.
    pub agent_id: String,
    /// How long to wait for the server's auth verdict after the
    /// websocket handshake.
    pub auth_timeout: Duration,
    /// First reconnect delay.
    pub reconnect_initial: Duration,
    /// Reconnect delay cap.
    pub reconnect_max: Duration,
    /// Consecutive failed attempts before the supervisor goes dormant
    /// until [`ChannelHandle::retrigger_reconnect`]. `None` retries
    /// forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl ChannelConfig {
    /// Standard settings for `url`.
    pub fn new(url: Url, agent_id: impl Into<String>) -> Self {
        Self {
            url,
            agent_id: agent_id.into(),
            auth_timeout: Duration::from_secs(10),
            reconnect_initial: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(300),
            max_reconnect_attempts: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The handshake request could not be built.
    #[error("invalid handshake request: {0}")]
    InvalidRequest(String),
    /// Websocket-level failure.
    #[error("transport error: {0}")]
    Transport(#[source] tokio_tungstenite::tungstenite::Error),
    /// The server closed the socket before answering the auth handshake.
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,
    /// No auth verdict arrived in time.
    #[error("authentication timed out")]
    AuthTimeout,
    /// The server rejected the credentials.
    #[error("authentication rejected: {reason}")]
    AuthRejected {
        /// Server-provided reason.
        reason: String,
    },
}

/// Errors from [`EmitHandle::emit`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    /// The channel is not connected; the frame was not queued.
    #[error("control channel is not connected")]
    NotConnected,
    /// The outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Notices delivered to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotice {
    /// Authenticated session established.
    Connected,
    /// The session ended; the reconnect loop is running.
    Disconnected {
        /// Why the session ended.
        reason: String,
    },
    /// The server rejected the current token.
    AuthFailed {
        /// Server-provided reason.
        reason: String,
    },
    /// The configured attempt budget ran out; dormant until retriggered.
    ReconnectsExhausted,
    /// A typed inbound event.
    Event(InboundEvent),
}

/// Fire-and-forget emitter. Cheap to clone; valid only while connected.
#[derive(Clone)]
pub struct EmitHandle {
    connected: watch::Receiver<bool>,
    tx: mpsc::Sender<Frame>,
}

impl EmitHandle {
    /// Emit `event` with `data`. Errors only when the channel cannot
    /// accept the frame; delivery is not acknowledged.
    pub fn emit(&self, event: &str, data: Value) -> Result<(), EmitError> {
        if !*self.connected.borrow() {
            return Err(EmitError::NotConnected);
        }
        self.tx
            .try_send(Frame::new(event, data))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EmitError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => EmitError::NotConnected,
            })
    }

    /// Whether the channel is currently connected.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

/// The orchestrator's view of the channel.
pub struct ChannelHandle {
    notices: mpsc::Receiver<ChannelNotice>,
    emit: EmitHandle,
    status: watch::Receiver<bool>,
    retrigger: Arc<Notify>,
}

impl ChannelHandle {
    /// Receive the next notice; `None` once the supervisor has stopped.
    pub async fn next_notice(&mut self) -> Option<ChannelNotice> {
        self.notices.recv().await
    }

    /// A cloneable emitter.
    pub fn emitter(&self) -> EmitHandle {
        self.emit.clone()
    }

    /// Single source of truth for send readiness.
    pub fn is_connected(&self) -> bool {
        *self.status.borrow()
    }

    /// A watch on connectivity, for tasks that gate on it.
    pub fn status_watch(&self) -> watch::Receiver<bool> {
        self.status.clone()
    }

    /// Wake a dormant supervisor (after [`ChannelNotice::ReconnectsExhausted`]).
    pub fn retrigger_reconnect(&self) {
        self.retrigger.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Spawn the channel supervisor.
///
/// The returned handle is the only way to observe or talk to the
/// channel; dropping it does not stop the supervisor (shutdown does).
pub fn spawn(config: ChannelConfig, token: SharedToken, shutdown: ShutdownSignal) -> ChannelHandle {
    let (notice_tx, notice_rx) = mpsc::channel(NOTICE_QUEUE);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let (status_tx, status_rx) = watch::channel(false);
    let retrigger = Arc::new(Notify::new());

    let emit = EmitHandle {
        connected: status_rx.clone(),
        tx: outbound_tx,
    };

    tokio::spawn(supervise(
        config,
        token,
        shutdown,
        notice_tx,
        outbound_rx,
        status_tx,
        retrigger.clone(),
    ));

    ChannelHandle {
        notices: notice_rx,
        emit,
        status: status_rx,
        retrigger,
    }
}

async fn supervise(
    config: ChannelConfig,
    token: SharedToken,
    shutdown: ShutdownSignal,
    notices: mpsc::Sender<ChannelNotice>,
    mut outbound: mpsc::Receiver<Frame>,
    status: watch::Sender<bool>,
    retrigger: Arc<Notify>,
) {
    let mut attempt: u32 = 0;
    loop {
        if shutdown.is_triggered() {
            break;
        }

        match establish(&config, &token).await {
            Ok(ws) => {
                attempt = 0;
                status.send_replace(true);
                info!(target: "outpost.channel", url = %config.url, "control channel connected");
                if notices.send(ChannelNotice::Connected).await.is_err() {
                    break;
                }

                let cause = serve_connection(ws, &mut outbound, &notices, &shutdown).await;

                status.send_replace(false);
                discard_queued(&mut outbound);

                match cause {
                    CloseCause::Shutdown => break,
                    CloseCause::AuthRejected(reason) => {
                        warn!(target: "outpost.channel", %reason, "session auth rejected");
                        if notices
                            .send(ChannelNotice::AuthFailed { reason })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    CloseCause::Lost(reason) => {
                        warn!(target: "outpost.channel", %reason, "control channel lost");
                        if notices
                            .send(ChannelNotice::Disconnected { reason })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
            Err(ChannelError::AuthRejected { reason }) => {
                warn!(target: "outpost.channel", %reason, "handshake auth rejected");
                if notices
                    .send(ChannelNotice::AuthFailed { reason })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                debug!(target: "outpost.channel", error = %e, "connection attempt failed");
            }
        }

        attempt = attempt.saturating_add(1);
        if let Some(max) = config.max_reconnect_attempts {
            if attempt > max {
                let _ = notices.send(ChannelNotice::ReconnectsExhausted).await;
                tokio::select! {
                    _ = shutdown.triggered() => break,
                    _ = retrigger.notified() => {
                        attempt = 0;
                        continue;
                    }
                }
            }
        }

        let delay = reconnect_delay(&config, attempt);
        debug!(
            target: "outpost.channel",
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect backoff"
        );
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = retrigger.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    status.send_replace(false);
    debug!(target: "outpost.channel", "channel supervisor stopped");
}

/// Backoff delay for a one-indexed attempt, with subtractive jitter so
/// a fleet of agents does not reconnect in lockstep.
fn reconnect_delay(config: &ChannelConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt.saturating_sub(1).min(16));
    let nominal_ms = (config.reconnect_initial.as_millis() as u64)
        .saturating_mul(exp)
        .min(config.reconnect_max.as_millis() as u64);
    let jitter = rand::thread_rng().gen_range(0.0..=0.25);
    Duration::from_millis(nominal_ms - ((nominal_ms as f64 * jitter) as u64))
}

/// Open the websocket and wait for the server's auth verdict.
async fn establish(config: &ChannelConfig, token: &SharedToken) -> Result<Ws, ChannelError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ChannelError::InvalidRequest(e.to_string()))?;
    {
        let headers = request.headers_mut();
        headers.insert(
            "X-Agent-Id",
            HeaderValue::from_str(&config.agent_id)
                .map_err(|e| ChannelError::InvalidRequest(e.to_string()))?,
        );
        headers.insert("X-Client-Type", HeaderValue::from_static("agent"));
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", token.get()))
                .map_err(|e| ChannelError::InvalidRequest(e.to_string()))?,
        );
    }

    let (mut ws, _response) = connect_async(request).await.map_err(ChannelError::Transport)?;

    let verdict = tokio::time::timeout(config.auth_timeout, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let Ok(frame) = Frame::decode(text.as_str()) else {
                        continue;
                    };
                    match InboundEvent::parse(&frame) {
                        Some(InboundEvent::AuthSuccess) => return Ok(()),
                        Some(InboundEvent::AuthFailed { reason }) => {
                            return Err(ChannelError::AuthRejected { reason });
                        }
                        _ => {}
                    }
                }
                Ok(Message::Close(_)) => return Err(ChannelError::ClosedDuringHandshake),
                Ok(_) => {}
                Err(e) => return Err(ChannelError::Transport(e)),
            }
        }
        Err(ChannelError::ClosedDuringHandshake)
    })
    .await
    .map_err(|_| ChannelError::AuthTimeout)?;

    verdict?;
    Ok(ws)
}

enum CloseCause {
    Shutdown,
    AuthRejected(String),
    Lost(String),
}

async fn serve_connection(
    ws: Ws,
    outbound: &mut mpsc::Receiver<Frame>,
    notices: &mpsc::Sender<ChannelNotice>,
    shutdown: &ShutdownSignal,
) -> CloseCause {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            _ = shutdown.triggered() => {
                let _ = sink.send(Message::Close(None)).await;
                return CloseCause::Shutdown;
            }
            maybe_frame = outbound.recv() => {
                let Some(frame) = maybe_frame else {
                    return CloseCause::Lost("outbound queue closed".into());
                };
                if let Err(e) = sink.send(Message::text(frame.encode())).await {
                    // Partial sends surface as a lost connection; the
                    // frame is reported undelivered by the caller's
                    // spool path.
                    return CloseCause::Lost(format!("send failed: {e}"));
                }
            }
            maybe_msg = stream.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::decode(text.as_str()) {
                            Ok(frame) => match InboundEvent::parse(&frame) {
                                Some(InboundEvent::AuthFailed { reason }) => {
                                    return CloseCause::AuthRejected(reason);
                                }
                                Some(InboundEvent::AuthSuccess) => {}
                                Some(event) => {
                                    if notices.send(ChannelNotice::Event(event)).await.is_err() {
                                        return CloseCause::Lost("notice consumer gone".into());
                                    }
                                }
                                None => {}
                            },
                            Err(e) => {
                                warn!(target: "outpost.channel", error = %e, "dropping malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return CloseCause::Lost("closed by server".into());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return CloseCause::Lost(e.to_string());
                    }
                }
            }
        }
    }
}

/// Drop frames queued while the connection was dying; outbound traffic
/// is never replayed into a later session.
fn discard_queued(outbound: &mut mpsc::Receiver<Frame>) {
    let mut dropped = 0usize;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(target: "outpost.channel", dropped, "discarded queued outbound frames");
    }
}
