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

//! Core types shared across the server crate

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Process-wide session id counter. Ids are unique across every server in
/// the process so the monitor bus can key traffic by id alone.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session (monotonically increasing, never reused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocates the next session id.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Builds a session id from a raw value. Intended for tests.
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The underlying numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

/// Which wire a session arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// RFC 854 Telnet over TCP, with option negotiation
    #[serde(rename = "telnet")]
    Telnet,
    /// Raw TCP line protocol, no negotiation
    #[serde(rename = "tcp")]
    Tcp,
    /// WebSocket carrying the plain session byte stream
    #[serde(rename = "websocket")]
    WebSocket,
    /// WebSocket additionally running the Telnet codec
    #[serde(rename = "ws_telnet")]
    WsTelnet,
}

impl TransportKind {
    /// Whether sessions on this transport run the Telnet codec.
    pub fn is_telnet(self) -> bool {
        matches!(self, TransportKind::Telnet | TransportKind::WsTelnet)
    }

    /// Whether this transport is carried over WebSocket.
    pub fn is_websocket(self) -> bool {
        matches!(self, TransportKind::WebSocket | TransportKind::WsTelnet)
    }

    /// The configuration-file name of this transport.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Telnet => "telnet",
            TransportKind::Tcp => "tcp",
            TransportKind::WebSocket => "websocket",
            TransportKind::WsTelnet => "ws_telnet",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "telnet" => Ok(TransportKind::Telnet),
            "tcp" => Ok(TransportKind::Tcp),
            "websocket" => Ok(TransportKind::WebSocket),
            "ws_telnet" => Ok(TransportKind::WsTelnet),
            other => Err(format!("unsupported transport: {other}")),
        }
    }
}

/// Session lifecycle states. A session only ever advances through these in
/// order; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Accepted, welcome not yet written
    Opening = 0,
    /// Welcome written, initial option negotiation in flight
    Negotiating = 1,
    /// Serving the command loop
    Running = 2,
    /// Terminal trigger observed; no further reads, writes may flush
    Closing = 3,
    /// Flushed, deregistered, transport closed
    Closed = 4,
}

impl SessionState {
    /// Convert from the atomic representation.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Opening,
            1 => Self::Negotiating,
            2 => Self::Running,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Convert to the atomic representation.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the session has begun tearing down.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Negotiating => write!(f, "negotiating"),
            Self::Running => write!(f, "running"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session reached `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent quit/exit/q
    ClientQuit,
    /// Client sent Ctrl-C
    ClientInterrupt,
    /// Orderly end of stream (EOF or Ctrl-D on an empty line)
    ClientEof,
    /// No activity within the connection timeout
    Idle,
    /// Server or supervisor shutdown
    Shutdown,
    /// Handler asked for the session to end
    HandlerRequest,
    /// Handler exceeded its callback deadline
    HandlerTimeout,
    /// Handler returned an unexpected failure
    HandlerFault,
    /// Malformed protocol traffic
    Protocol,
    /// Transport reset or unexpected I/O failure
    TransportFailure,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientQuit => write!(f, "client-quit"),
            Self::ClientInterrupt => write!(f, "client-interrupt"),
            Self::ClientEof => write!(f, "client-eof"),
            Self::Idle => write!(f, "idle"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::HandlerRequest => write!(f, "handler-request"),
            Self::HandlerTimeout => write!(f, "handler-timeout"),
            Self::HandlerFault => write!(f, "handler-fault"),
            Self::Protocol => write!(f, "protocol-error"),
            Self::TransportFailure => write!(f, "transport-failure"),
        }
    }
}

/// Snapshot of a live session, taken from the registry.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// Which wire the session arrived over
    pub transport: TransportKind,
    /// Textual peer address
    pub remote_addr: SocketAddr,
    /// Wall-clock creation time
    pub created_at: SystemTime,
    /// True for the youngest live session
    pub is_newest: bool,
}

/// Snapshot of a running server, for logs and diagnostics.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Which transport the server accepts
    pub transport: TransportKind,
    /// Bound listen address
    pub listen_addr: SocketAddr,
    /// Number of live sessions
    pub active_sessions: usize,
    /// How long the server has been accepting
    pub uptime: Duration,
}

/// Seconds since the Unix epoch as a float, the timestamp format used on
/// the monitor wire.
pub(crate) fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
