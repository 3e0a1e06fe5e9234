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

//! Single-transport acceptor.
//!
//! A `Server` owns one listener, the registry of live sessions on it, and
//! the accept loop that feeds the registry. The registry never exceeds
//! `max_connections`: sockets accepted at capacity get one busy line and
//! are closed without a session. Shutdown stops accepting, notifies and
//! cancels every live session, and drains the registry under a deadline
//! before force-closing stragglers.

use crate::error::{Result, ServerError};
use crate::handler::{HandlerFactory, PushMessage};
use crate::metrics::ServerMetrics;
use crate::monitor::{self, MonitorBus};
use crate::session::{Session, SessionConfig};
use crate::transport::{BoxedTransport, TcpTransport, Transport, WsEndpoint, WsUpgrade, ws_upgrade};
use crate::types::{
    DisconnectReason, ServerInfo, SessionId, SessionInfo, SessionState, TransportKind,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, SystemTime};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// The single line written to clients accepted while at capacity.
pub const BUSY_MESSAGE: &str = "Server busy. Try again later.";
/// The notice broadcast to live sessions when a graceful shutdown begins.
pub const SHUTDOWN_NOTICE: &str = "Server is shutting down. Goodbye!";

/// Runtime configuration for one server.
#[derive(Clone)]
pub struct ServerConfig {
    /// Name of the config block, used in logs
    pub name: String,
    /// Which transport this server accepts
    pub transport: TransportKind,
    /// `host:port` to bind
    pub listen: String,
    /// Upper bound on live sessions
    pub max_connections: usize,
    /// Per-session tunables (welcome, prompt, timeouts)
    pub session: SessionConfig,
    /// Factory producing one handler per session
    pub handler_factory: HandlerFactory,
    /// WebSocket endpoint settings, for WebSocket transports
    pub ws: Option<WsEndpoint>,
    /// TLS acceptor, for WebSocket transports with `use_ssl`
    pub tls: Option<TlsAcceptor>,
    /// Cap on the graceful shutdown drain
    pub shutdown_timeout: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("listen", &self.listen)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Registry entry for one live session.
struct SessionEntry {
    cancel: tokio_util::sync::CancellationToken,
    push_tx: tokio::sync::mpsc::Sender<PushMessage>,
    state: Arc<AtomicU8>,
    remote_addr: SocketAddr,
    created_at: SystemTime,
    task: Option<JoinHandle<()>>,
}

/// One listening server on one transport.
pub struct Server {
    config: ServerConfig,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    registry: Arc<DashMap<SessionId, SessionEntry>>,
    /// Serializes the capacity check against registry insertion so the
    /// bound holds even when WebSocket handshakes land concurrently.
    admission: std::sync::Mutex<()>,
    metrics: Arc<ServerMetrics>,
    monitor: MonitorBus,
    running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    started_at: Instant,
}

impl Server {
    /// Binds the listener. Accepting starts with [`start`](Self::start).
    pub async fn bind(config: ServerConfig, monitor: MonitorBus) -> Result<Arc<Self>> {
        let listener =
            TcpListener::bind(&config.listen)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: config.listen.clone(),
                    source,
                })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: config.listen.clone(),
            source,
        })?;
        info!(
            server = %config.name,
            transport = %config.transport,
            addr = %local_addr,
            "server bound"
        );
        Ok(Arc::new(Self {
            config,
            listener: Mutex::new(Some(listener)),
            local_addr,
            registry: Arc::new(DashMap::new()),
            admission: std::sync::Mutex::new(()),
            metrics: Arc::new(ServerMetrics::new()),
            monitor,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            accept_handle: Mutex::new(None),
            started_at: Instant::now(),
        }))
    }

    /// The bound address (useful when the configured port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Server metrics handle.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// Point-in-time server snapshot.
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            transport: self.config.transport,
            listen_addr: self.local_addr,
            active_sessions: self.session_count(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Consistent snapshot of the live sessions in this server's registry.
    /// The youngest session (greatest creation time, ties by id) carries
    /// `is_newest`.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let newest = self
            .registry
            .iter()
            .filter(|entry| {
                !SessionState::from_u8(entry.state.load(Ordering::Acquire)).is_terminal()
            })
            .max_by_key(|entry| (entry.created_at, *entry.key()))
            .map(|entry| *entry.key());
        self.registry
            .iter()
            .map(|entry| SessionInfo {
                id: *entry.key(),
                transport: self.config.transport,
                remote_addr: entry.remote_addr,
                created_at: entry.created_at,
                is_newest: newest == Some(*entry.key()),
            })
            .collect()
    }

    /// Starts the accept loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::Config("server already running".to_string()));
        }
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| ServerError::Config("server already consumed".to_string()))?;

        let server = self.clone();
        let handle = tokio::spawn(async move {
            server.accept_loop(listener).await;
        });
        *self.accept_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        info!(server = %self.config.name, addr = %self.local_addr, "accepting connections");
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = self.shutdown_notify.notified() => break,
            };
            match accepted {
                Ok((socket, peer_addr)) => {
                    debug!(server = %self.config.name, peer = %peer_addr, "accepted connection");
                    self.clone().handle_accept(socket, peer_addr);
                }
                Err(err) => {
                    error!(server = %self.config.name, "accept failed: {err}");
                    // Back off so a persistent failure cannot spin the loop.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        info!(server = %self.config.name, "accept loop terminated");
    }

    fn handle_accept(self: Arc<Self>, socket: TcpStream, peer_addr: SocketAddr) {
        match self.config.transport {
            TransportKind::Telnet | TransportKind::Tcp => {
                let transport = Box::new(TcpTransport::new(socket, peer_addr));
                self.install_session(transport);
            }
            TransportKind::WebSocket | TransportKind::WsTelnet => {
                // Capacity is enforced after path routing: monitor
                // subscribers do not occupy session slots.
                tokio::spawn(async move {
                    if let Err(err) = self.accept_websocket(socket, peer_addr).await {
                        debug!(peer = %peer_addr, "websocket accept failed: {err}");
                    }
                });
            }
        }
    }

    async fn accept_websocket(
        self: Arc<Self>,
        socket: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        let endpoint = self
            .config
            .ws
            .clone()
            .ok_or_else(|| ServerError::Config("websocket server without endpoint".into()))?;

        let upgrade = match &self.config.tls {
            Some(acceptor) => {
                let tls = acceptor
                    .accept(socket)
                    .await
                    .map_err(|err| ServerError::TransportFault(format!("tls accept: {err}")))?;
                ws_upgrade(tls, peer_addr, &endpoint).await?
            }
            None => ws_upgrade(socket, peer_addr, &endpoint).await?,
        };

        match upgrade {
            WsUpgrade::Session(transport) => {
                self.install_session(Box::new(transport));
            }
            WsUpgrade::Monitor(channel) => {
                tokio::spawn(monitor::serve_subscriber(self.monitor.clone(), channel));
            }
        }
        Ok(())
    }

    /// Writes the busy line and closes, without creating a session.
    fn reject_busy(&self, mut transport: BoxedTransport) {
        self.metrics.session_rejected();
        warn!(
            server = %self.config.name,
            peer = %transport.peer_addr(),
            limit = self.config.max_connections,
            "rejecting connection at capacity"
        );
        tokio::spawn(async move {
            let _ = tokio::time::timeout(
                Duration::from_millis(100),
                transport.write_all(format!("{BUSY_MESSAGE}\r\n").as_bytes()),
            )
            .await;
            let _ = transport.close().await;
        });
    }

    /// Creates a session for an accepted transport, installs it in the
    /// registry, and spawns its pipeline task. At capacity the transport
    /// gets the busy line instead and no session exists at any point.
    fn install_session(self: &Arc<Self>, transport: BoxedTransport) {
        let id = SessionId::next();
        let remote_addr = transport.peer_addr();
        let handler = (self.config.handler_factory)();
        let cancel = tokio_util::sync::CancellationToken::new();
        let state = Arc::new(AtomicU8::new(SessionState::Opening.as_u8()));
        let created_at = SystemTime::now();

        let (session, push_tx) = Session::new(
            id,
            self.config.transport,
            transport,
            handler,
            self.monitor.clone(),
            cancel.clone(),
            self.config.session.clone(),
            state.clone(),
        );

        // Check-and-insert under the admission lock: the registry size
        // never exceeds the bound, even with concurrent installs.
        {
            let _guard = self.admission.lock().unwrap();
            if self.registry.len() >= self.config.max_connections {
                drop(_guard);
                self.reject_busy(session.into_transport());
                return;
            }
            self.registry.insert(
                id,
                SessionEntry {
                    cancel,
                    push_tx,
                    state,
                    remote_addr,
                    created_at,
                    task: None,
                },
            );
        }
        self.metrics.session_opened();
        // The started event precedes every data event for this session.
        self.monitor
            .session_started(id, self.config.transport, remote_addr, created_at);

        let server = self.clone();
        let task = tokio::spawn(async move {
            let reason = session.run().await;
            match reason {
                DisconnectReason::Idle => server.metrics.idle_timeout(),
                DisconnectReason::HandlerFault
                | DisconnectReason::HandlerTimeout
                | DisconnectReason::Protocol
                | DisconnectReason::TransportFailure => server.metrics.session_error(),
                _ => {}
            }
            server.registry.remove(&id);
            server.metrics.session_closed();
        });
        if let Some(mut entry) = self.registry.get_mut(&id) {
            entry.task = Some(task);
        }
    }

    /// Gracefully shuts the server down: stop accepting, notify and cancel
    /// every live session, drain bounded by `shutdown_timeout`, then
    /// force-close stragglers. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!(server = %self.config.name, "shutting down");
        self.shutdown_notify.notify_waiters();

        if let Some(handle) = self.accept_handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        // Shutdown notice first, then cancellation, so sessions still
        // draining their queues get the line out.
        for entry in self.registry.iter() {
            let _ = entry.push_tx.try_send(PushMessage::Line(SHUTDOWN_NOTICE.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        for entry in self.registry.iter() {
            entry.cancel.cancel();
        }

        let deadline = Instant::now() + self.config.shutdown_timeout;
        while !self.registry.is_empty() {
            if Instant::now() >= deadline {
                warn!(
                    server = %self.config.name,
                    stragglers = self.registry.len(),
                    "drain deadline passed, force closing"
                );
                let ids: Vec<SessionId> =
                    self.registry.iter().map(|entry| *entry.key()).collect();
                for id in ids {
                    if let Some((_, entry)) = self.registry.remove(&id) {
                        if let Some(task) = entry.task {
                            task.abort();
                        }
                        entry.state.store(SessionState::Closed.as_u8(), Ordering::Release);
                        self.monitor.session_ended(id);
                        self.metrics.session_closed();
                    }
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        info!(server = %self.config.name, "shutdown complete");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.config.name)
            .field("transport", &self.config.transport)
            .field("addr", &self.local_addr)
            .field("sessions", &self.session_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!(server = %self.config.name, "server dropped while still running");
            self.running.store(false, Ordering::SeqCst);
            self.shutdown_notify.notify_waiters();
        }
    }
}
