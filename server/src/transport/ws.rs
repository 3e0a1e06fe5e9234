//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! WebSocket transport.
//!
//! WebSocket is message-oriented underneath; this module flattens it into
//! the byte-pipe shape of [`Transport`](super::Transport). Incoming text and
//! binary frames are concatenated into a byte queue that `read_some`
//! drains; each `write_all` becomes a single frame. The handshake routes by
//! request path (session endpoint vs monitor endpoint), enforces the Origin
//! allowlist, and caps frame sizes; the transport owns the ping/pong
//! heartbeat, and a missed pong is a fatal transport failure.

use super::Transport;
use crate::error::{Result, ServerError};
use crate::monitor::SUBSCRIBER_QUEUE;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// WebSocket endpoint settings for one server.
#[derive(Debug, Clone)]
pub struct WsEndpoint {
    /// Path that carries session traffic
    pub session_path: String,
    /// Path that carries monitor subscriptions, when monitoring is mounted
    pub monitor_path: Option<String>,
    /// Origin allowlist; `"*"` admits any origin
    pub allow_origins: Vec<String>,
    /// Heartbeat ping interval
    pub ping_interval: Duration,
    /// Grace period after `ping_interval` before a missing pong is fatal
    pub ping_timeout: Duration,
    /// Send session bytes as binary frames instead of text
    pub binary_frames: bool,
    /// Upper bound on a single frame or message
    pub max_frame_bytes: usize,
}

/// What a completed handshake turned out to be.
pub enum WsUpgrade {
    /// A client session on the session path
    Session(WsTransport),
    /// An observer on the monitor path
    Monitor(MonitorChannel),
}

/// A monitor observer connection, reduced to channels.
///
/// `events` is the subscriber's bounded queue: the bus publishes with
/// `try_send` and a full queue is grounds for disconnection.
pub struct MonitorChannel {
    /// The observer's address
    pub peer_addr: SocketAddr,
    /// Parsed-out text frames (subscriber commands)
    pub commands: mpsc::Receiver<String>,
    /// Outbound JSON events, drained by the writer task
    pub events: mpsc::Sender<String>,
    /// Cancelled to tear the connection down
    pub shutdown: CancellationToken,
}

/// Transport faults recorded by the background pump tasks.
#[derive(Debug, Clone)]
enum WsFault {
    Protocol(String),
    Transport(String),
}

impl From<WsFault> for ServerError {
    fn from(fault: WsFault) -> Self {
        match fault {
            WsFault::Protocol(reason) => ServerError::Protocol(reason),
            WsFault::Transport(reason) => ServerError::TransportFault(reason),
        }
    }
}

fn classify_ws_error(err: &WsError) -> WsFault {
    match err {
        WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => WsFault::Protocol(
            format!("websocket message of {size} bytes exceeds the {max_size} byte cap"),
        ),
        WsError::Capacity(other) => WsFault::Protocol(other.to_string()),
        WsError::Protocol(violation) => WsFault::Protocol(violation.to_string()),
        other => WsFault::Transport(other.to_string()),
    }
}

fn forbidden(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

fn not_found(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Performs the WebSocket handshake on an accepted stream and routes it to
/// the session pipeline or the monitor endpoint by request path.
///
/// Origins outside the allowlist are rejected during the handshake with
/// HTTP 403; unknown paths with HTTP 404. No session is created in either
/// case.
pub async fn upgrade<S>(stream: S, peer_addr: SocketAddr, endpoint: &WsEndpoint) -> Result<WsUpgrade>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let requested_path: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let callback_path = requested_path.clone();
    let session_path = endpoint.session_path.clone();
    let monitor_path = endpoint.monitor_path.clone();
    let allow_origins = endpoint.allow_origins.clone();

    let callback = move |request: &Request, response: Response| {
        if let Some(origin) = request
            .headers()
            .get("Origin")
            .and_then(|value| value.to_str().ok())
        {
            let allowed = allow_origins.iter().any(|entry| entry == "*" || entry == origin);
            if !allowed {
                warn!(origin, "rejecting websocket origin");
                return Err(forbidden("Origin not allowed"));
            }
        }

        let path = request.uri().path().to_string();
        if path != session_path && monitor_path.as_deref() != Some(path.as_str()) {
            warn!(%path, "rejecting websocket connection to unknown path");
            return Err(not_found("no such endpoint"));
        }
        *callback_path.lock().unwrap() = Some(path);
        Ok(response)
    };

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(endpoint.max_frame_bytes);
    config.max_frame_size = Some(endpoint.max_frame_bytes);

    let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config))
        .await
        .map_err(|err| ServerError::TransportFault(format!("websocket handshake failed: {err}")))?;

    let path = requested_path
        .lock()
        .unwrap()
        .take()
        .unwrap_or_else(|| endpoint.session_path.clone());

    if endpoint.monitor_path.as_deref() == Some(path.as_str()) {
        Ok(WsUpgrade::Monitor(spawn_monitor_pumps(ws, peer_addr)))
    } else {
        Ok(WsUpgrade::Session(WsTransport::spawn(ws, peer_addr, endpoint)))
    }
}

/// A WebSocket client session behind the [`Transport`] contract.
///
/// The stream halves live in background pump tasks; the transport itself
/// only holds channels, so it stays object-safe regardless of whether TLS
/// sits underneath.
pub struct WsTransport {
    peer_addr: SocketAddr,
    data_rx: mpsc::Receiver<Bytes>,
    out_tx: mpsc::Sender<Message>,
    residue: BytesMut,
    binary_frames: bool,
    fault: Arc<Mutex<Option<WsFault>>>,
    shutdown: CancellationToken,
    closed: bool,
}

impl WsTransport {
    fn spawn<S>(
        ws: tokio_tungstenite::WebSocketStream<S>,
        peer_addr: SocketAddr,
        endpoint: &WsEndpoint,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (data_tx, data_rx) = mpsc::channel::<Bytes>(32);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);
        let fault: Arc<Mutex<Option<WsFault>>> = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();
        let last_pong = Arc::new(Mutex::new(Instant::now()));

        // Reader pump: frames in, bytes out. tungstenite answers peer pings
        // internally; pongs only refresh the heartbeat clock.
        {
            let fault = fault.clone();
            let shutdown = shutdown.clone();
            let last_pong = last_pong.clone();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        message = stream.next() => message,
                        _ = shutdown.cancelled() => break,
                    };
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if data_tx.send(Bytes::from(text.into_bytes())).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(payload))) => {
                            if data_tx.send(Bytes::from(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            *last_pong.lock().unwrap() = Instant::now();
                        }
                        Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(err)) => {
                            *fault.lock().unwrap() = Some(classify_ws_error(&err));
                            break;
                        }
                    }
                }
                // Dropping data_tx surfaces EOF (or the recorded fault).
            });
        }

        // Writer pump: owns the sink half.
        {
            let fault = fault.clone();
            tokio::spawn(async move {
                while let Some(message) = out_rx.recv().await {
                    if let Err(err) = sink.send(message).await {
                        let mut slot = fault.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(classify_ws_error(&err));
                        }
                        break;
                    }
                }
                let _ = sink.close().await;
            });
        }

        // Heartbeat: ping on the interval, fail the transport on a missed
        // pong.
        {
            let fault = fault.clone();
            let shutdown = shutdown.clone();
            let out_tx = out_tx.clone();
            let last_pong = last_pong.clone();
            let ping_interval = endpoint.ping_interval;
            let deadline = endpoint.ping_interval + endpoint.ping_timeout;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(ping_interval);
                ticker.tick().await; // immediate first tick
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.cancelled() => break,
                    }
                    if last_pong.lock().unwrap().elapsed() > deadline {
                        let mut slot = fault.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(WsFault::Transport("missed websocket pong".into()));
                        }
                        drop(slot);
                        shutdown.cancel();
                        break;
                    }
                    if out_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            peer_addr,
            data_rx,
            out_tx,
            residue: BytesMut::new(),
            binary_frames: endpoint.binary_frames,
            fault,
            shutdown,
            closed: false,
        }
    }

    fn take_fault(&self) -> Option<ServerError> {
        self.fault.lock().unwrap().clone().map(ServerError::from)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn read_some(&mut self, max: usize) -> Result<Bytes> {
        if self.closed {
            return Err(ServerError::TransportClosed);
        }
        if self.residue.is_empty() {
            match self.data_rx.recv().await {
                Some(bytes) => self.residue.extend_from_slice(&bytes),
                None => {
                    // Pump ended: fault if one was recorded, orderly EOF
                    // otherwise.
                    return match self.take_fault() {
                        Some(err) => Err(err),
                        None => Ok(Bytes::new()),
                    };
                }
            }
        }
        let take = self.residue.len().min(max);
        Ok(self.residue.split_to(take).freeze())
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ServerError::TransportClosed);
        }
        let message = if self.binary_frames {
            Message::Binary(data.to_vec())
        } else {
            Message::Text(String::from_utf8_lossy(data).into_owned())
        };
        self.out_tx
            .send(message)
            .await
            .map_err(|_| self.take_fault().unwrap_or(ServerError::TransportClosed))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.out_tx.try_send(Message::Close(None));
        self.shutdown.cancel();
        Ok(())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Reduces a monitor observer's stream to command/event channels. The event
/// channel doubles as the subscriber's bounded backpressure queue.
fn spawn_monitor_pumps<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    peer_addr: SocketAddr,
) -> MonitorChannel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (command_tx, commands) = mpsc::channel::<String>(32);
    let (events, mut event_rx) = mpsc::channel::<String>(SUBSCRIBER_QUEUE);
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = stream.next() => message,
                    _ = shutdown.cancelled() => break,
                };
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if command_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(payload))) => {
                        let text = String::from_utf8_lossy(&payload).into_owned();
                        if command_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("monitor subscriber read failed: {err}");
                        break;
                    }
                    None => break,
                }
            }
        });
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = event_rx.recv() => event,
                    _ = shutdown.cancelled() => break,
                };
                match event {
                    Some(json) => {
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            let _ = sink.close().await;
        });
    }

    MonitorChannel {
        peer_addr,
        commands,
        events,
        shutdown,
    }
}
