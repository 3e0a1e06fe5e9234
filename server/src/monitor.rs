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

//! Process-wide monitor bus.
//!
//! Publishes session lifecycle and traffic events to external observers
//! connected over the WebSocket monitor endpoint. The bus is an explicit
//! value constructed at startup and passed by reference to every server and
//! session; there is no ambient global.
//!
//! Every subscriber owns a bounded queue. Publishing never blocks: a
//! subscriber whose queue overflows is disconnected as a slow consumer.

use crate::transport::MonitorChannel;
use crate::types::{SessionId, TransportKind, epoch_seconds};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bound on a subscriber's event queue; overflow disconnects the
/// subscriber without blocking publishers.
pub const SUBSCRIBER_QUEUE: usize = 1024;

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

/// The `client` block of a [`SessionSummary`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRef {
    /// Textual peer address
    pub remote_addr: String,
}

/// A session as it appears on the monitor wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    /// Session id
    pub id: String,
    /// Transport name (`telnet`, `tcp`, `websocket`, `ws_telnet`)
    pub transport: String,
    /// Peer address
    pub client: ClientRef,
    /// True for the youngest live session
    pub is_newest: bool,
    /// Creation time, seconds since the Unix epoch
    pub created_at: f64,
}

/// Payload of a traffic event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrafficData {
    /// The line or character batch
    pub text: String,
    /// Event time, seconds since the Unix epoch
    pub ts: f64,
}

/// Reference to an ended session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRef {
    /// Session id
    pub id: String,
}

/// Events published to monitor subscribers, JSON-tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Snapshot sent to a new subscriber immediately
    ActiveSessions {
        /// Every live session
        sessions: Vec<SessionSummary>,
    },
    /// A session entered the registry
    SessionStarted {
        /// The new session
        session: SessionSummary,
    },
    /// A session left the registry
    SessionEnded {
        /// The ended session
        session: SessionRef,
    },
    /// A cleaned line read from a watched session
    ClientInput {
        /// Which session produced the input
        session_id: String,
        /// The input itself
        data: TrafficData,
    },
    /// A line written to a watched session
    ServerMessage {
        /// Which session the message went to
        session_id: String,
        /// The message itself
        data: TrafficData,
    },
    /// Reply to a subscriber command
    WatchResponse {
        /// The session the command named
        session_id: String,
        /// `success` for watch, `stopped` for stop
        status: String,
        /// Present when the command could not be honored
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Commands a subscriber may send, JSON-tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorCommand {
    /// Deliver traffic events for the named session to this subscriber
    WatchSession {
        /// The session to watch
        session_id: String,
    },
    /// Stop delivering traffic events for the named session
    StopWatching {
        /// The session to stop watching
        session_id: String,
    },
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

struct SessionRecord {
    id: SessionId,
    transport: TransportKind,
    remote_addr: SocketAddr,
    created_at: SystemTime,
}

struct Subscriber {
    tx: mpsc::Sender<String>,
    watched: RwLock<HashSet<String>>,
}

struct BusInner {
    subscribers: DashMap<u64, Subscriber>,
    sessions: DashMap<SessionId, SessionRecord>,
    next_subscriber: AtomicU64,
}

/// Handle to the process-wide monitor bus. Cheap to clone.
#[derive(Clone)]
pub struct MonitorBus {
    inner: Arc<BusInner>,
}

impl Default for MonitorBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                sessions: DashMap::new(),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Id of the youngest live session: greatest `created_at`, ties broken
    /// by id.
    fn newest_session(&self) -> Option<SessionId> {
        self.inner
            .sessions
            .iter()
            .max_by_key(|entry| (entry.created_at, entry.id))
            .map(|entry| entry.id)
    }

    fn summarize(record: &SessionRecord, newest: Option<SessionId>) -> SessionSummary {
        SessionSummary {
            id: record.id.to_string(),
            transport: record.transport.to_string(),
            client: ClientRef {
                remote_addr: record.remote_addr.to_string(),
            },
            is_newest: newest == Some(record.id),
            created_at: epoch_seconds(record.created_at),
        }
    }

    fn snapshot(&self) -> Vec<SessionSummary> {
        let newest = self.newest_session();
        self.inner
            .sessions
            .iter()
            .map(|entry| Self::summarize(&entry, newest))
            .collect()
    }

    /// Registers a subscriber around its bounded event queue and sends the
    /// `active_sessions` snapshot.
    pub fn subscribe(&self, tx: mpsc::Sender<String>) -> u64 {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.insert(
            id,
            Subscriber {
                tx,
                watched: RwLock::new(HashSet::new()),
            },
        );
        info!(subscriber = id, "monitor subscriber connected");
        let snapshot = MonitorEvent::ActiveSessions {
            sessions: self.snapshot(),
        };
        self.send_to(id, &snapshot);
        id
    }

    /// Removes a subscriber. Safe to call for an already-removed id.
    pub fn unsubscribe(&self, subscriber: u64) {
        if self.inner.subscribers.remove(&subscriber).is_some() {
            info!(subscriber, "monitor subscriber disconnected");
        }
    }

    /// Applies a subscriber command and queues the `watch_response`.
    pub fn handle_command(&self, subscriber: u64, command: MonitorCommand) {
        let response = match &command {
            MonitorCommand::WatchSession { session_id } => {
                if let Some(entry) = self.inner.subscribers.get(&subscriber) {
                    entry.watched.write().unwrap().insert(session_id.clone());
                }
                MonitorEvent::WatchResponse {
                    session_id: session_id.clone(),
                    status: "success".to_string(),
                    error: None,
                }
            }
            MonitorCommand::StopWatching { session_id } => {
                if let Some(entry) = self.inner.subscribers.get(&subscriber) {
                    // Removing an unwatched session is a no-op, not an error.
                    entry.watched.write().unwrap().remove(session_id);
                }
                MonitorEvent::WatchResponse {
                    session_id: session_id.clone(),
                    status: "stopped".to_string(),
                    error: None,
                }
            }
        };
        self.send_to(subscriber, &response);
    }

    /// Publishes `session_started`. Call after the session is installed in
    /// its server's registry and before any traffic event for it.
    pub fn session_started(
        &self,
        id: SessionId,
        transport: TransportKind,
        remote_addr: SocketAddr,
        created_at: SystemTime,
    ) {
        let record = SessionRecord {
            id,
            transport,
            remote_addr,
            created_at,
        };
        self.inner.sessions.insert(id, record);
        let newest = self.newest_session();
        let event = {
            let entry = self.inner.sessions.get(&id).expect("just inserted");
            MonitorEvent::SessionStarted {
                session: Self::summarize(&entry, newest),
            }
        };
        self.broadcast(&event);
    }

    /// Publishes `session_ended` and drops the session from the index.
    pub fn session_ended(&self, id: SessionId) {
        if self.inner.sessions.remove(&id).is_none() {
            return;
        }
        self.broadcast(&MonitorEvent::SessionEnded {
            session: SessionRef { id: id.to_string() },
        });
    }

    /// Publishes a cleaned input line to the session's watchers.
    pub fn client_input(&self, id: SessionId, text: &str) {
        self.publish_traffic(id, text, true);
    }

    /// Publishes an outbound line to the session's watchers.
    pub fn server_message(&self, id: SessionId, text: &str) {
        self.publish_traffic(id, text, false);
    }

    fn publish_traffic(&self, id: SessionId, text: &str, inbound: bool) {
        if self.inner.subscribers.is_empty() {
            return;
        }
        let session_id = id.to_string();
        let data = TrafficData {
            text: text.to_string(),
            ts: epoch_seconds(SystemTime::now()),
        };
        let event = if inbound {
            MonitorEvent::ClientInput { session_id, data }
        } else {
            MonitorEvent::ServerMessage { session_id, data }
        };
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to encode monitor event: {err}");
                return;
            }
        };
        let key = id.to_string();
        let mut dead = Vec::new();
        for entry in self.inner.subscribers.iter() {
            if !entry.watched.read().unwrap().contains(&key) {
                continue;
            }
            if let Err(reason) = Self::offer(&entry.tx, json.clone()) {
                dead.push((*entry.key(), reason));
            }
        }
        self.reap(dead);
    }

    fn broadcast(&self, event: &MonitorEvent) {
        if self.inner.subscribers.is_empty() {
            return;
        }
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to encode monitor event: {err}");
                return;
            }
        };
        let mut dead = Vec::new();
        for entry in self.inner.subscribers.iter() {
            if let Err(reason) = Self::offer(&entry.tx, json.clone()) {
                dead.push((*entry.key(), reason));
            }
        }
        self.reap(dead);
    }

    fn send_to(&self, subscriber: u64, event: &MonitorEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to encode monitor event: {err}");
                return;
            }
        };
        let mut dead = Vec::new();
        if let Some(entry) = self.inner.subscribers.get(&subscriber) {
            if let Err(reason) = Self::offer(&entry.tx, json) {
                dead.push((subscriber, reason));
            }
        }
        self.reap(dead);
    }

    fn offer(tx: &mpsc::Sender<String>, json: String) -> std::result::Result<(), &'static str> {
        match tx.try_send(json) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err("slow-consumer"),
            Err(mpsc::error::TrySendError::Closed(_)) => Err("closed"),
        }
    }

    fn reap(&self, dead: Vec<(u64, &'static str)>) {
        for (subscriber, reason) in dead {
            if self.inner.subscribers.remove(&subscriber).is_some() {
                warn!(subscriber, reason, "dropping monitor subscriber");
            }
        }
    }
}

impl std::fmt::Debug for MonitorBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorBus")
            .field("subscribers", &self.inner.subscribers.len())
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}

/// Drives one observer connection: registers it with the bus, applies its
/// commands, and unregisters when the connection drops.
pub async fn serve_subscriber(bus: MonitorBus, channel: MonitorChannel) {
    let MonitorChannel {
        peer_addr,
        mut commands,
        events,
        shutdown,
    } = channel;
    debug!(peer = %peer_addr, "monitor subscriber attached");
    let id = bus.subscribe(events);

    while let Some(text) = commands.recv().await {
        match serde_json::from_str::<MonitorCommand>(&text) {
            Ok(command) => bus.handle_command(id, command),
            Err(err) => {
                debug!(subscriber = id, "ignoring malformed monitor command: {err}");
            }
        }
    }

    bus.unsubscribe(id);
    shutdown.cancel();
}
