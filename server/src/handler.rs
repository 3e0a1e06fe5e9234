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

//! Application handler abstraction.
//!
//! A session owns a Telnet codec, a line editor, and one handler value;
//! behavioral variation lives in handler instances, not a type hierarchy.
//! Handlers are produced per session by factories looked up in a
//! string-keyed [`HandlerRegistry`] populated at program start.

use crate::error::{Result, ServerError};
use crate::types::{SessionId, TransportKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages a handler may push into a session from outside the line loop
/// (periodic feeds, notifications). Push producers never touch the
/// transport; the session task serializes every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// Write a line to the client
    Line(String),
    /// Ask the session to terminate cooperatively
    Disconnect,
}

/// What a session looks like from inside a handler.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Session id
    pub id: SessionId,
    /// Which wire the session arrived over
    pub transport: TransportKind,
    /// The peer's address
    pub remote_addr: SocketAddr,
    push_tx: mpsc::Sender<PushMessage>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        transport: TransportKind,
        remote_addr: SocketAddr,
        push_tx: mpsc::Sender<PushMessage>,
    ) -> Self {
        Self {
            id,
            transport,
            remote_addr,
            push_tx,
        }
    }

    /// Queues a line for the client outside the request/response cycle.
    /// Fails once the session has begun closing.
    pub async fn push_line(&self, line: impl Into<String>) -> Result<()> {
        self.push_tx
            .send(PushMessage::Line(line.into()))
            .await
            .map_err(|_| ServerError::TransportClosed)
    }

    /// Requests cooperative termination of the session.
    pub async fn disconnect(&self) -> Result<()> {
        self.push_tx
            .send(PushMessage::Disconnect)
            .await
            .map_err(|_| ServerError::TransportClosed)
    }
}

/// Whether the session keeps running after a handler reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionAction {
    /// Keep serving the command loop
    #[default]
    Continue,
    /// Close the session after the reply lines are written
    Disconnect,
}

/// A handler's answer to one input line.
#[derive(Debug, Clone, Default)]
pub struct LineReply {
    /// Lines to write back, in order
    pub lines: Vec<String>,
    /// Whether to keep the session open
    pub action: SessionAction,
}

impl LineReply {
    /// A reply of one line, continuing the session.
    pub fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            action: SessionAction::Continue,
        }
    }

    /// An empty reply, continuing the session.
    pub fn none() -> Self {
        Self::default()
    }

    /// A reply that closes the session after writing its lines.
    pub fn closing(lines: Vec<String>) -> Self {
        Self {
            lines,
            action: SessionAction::Disconnect,
        }
    }
}

/// Per-session application callbacks.
///
/// All methods have do-nothing defaults except [`on_line`](Self::on_line),
/// which is the sole extension point for command behavior.
#[async_trait]
pub trait SessionHandler: Send {
    /// Called once the session reaches `Running`, before the first prompt.
    /// Returned lines are written to the client.
    async fn on_connect(&mut self, _session: &SessionHandle) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Called with each complete input line, already stripped of trailing
    /// whitespace.
    async fn on_line(&mut self, session: &SessionHandle, line: &str) -> Result<LineReply>;

    /// Called exactly once when the session ends, whatever the reason.
    async fn on_disconnect(&mut self, _session: &SessionHandle) {}

    /// Opt out of the built-in quit/exit/q handling and receive those lines
    /// in [`on_line`](Self::on_line) instead.
    fn intercepts_quit(&self) -> bool {
        false
    }
}

/// Factory producing a fresh handler per session.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn SessionHandler> + Send + Sync>;

/// String-keyed registry of handler factories, populated at program start.
/// The configuration's `handler_class` identifier maps into this registry;
/// there is no runtime code loading.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in handlers registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("echo", || Box::new(EchoHandler));
        registry
    }

    /// Registers a factory under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn SessionHandler> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Looks up the factory registered under `name`.
    pub fn get(&self, name: &str) -> Option<HandlerFactory> {
        self.factories.get(name).cloned()
    }

    /// Instantiates a handler, or fails with a configuration error when the
    /// identifier is unknown.
    pub fn create(&self, name: &str) -> Result<Box<dyn SessionHandler>> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(ServerError::Config(format!(
                "unknown handler_class: {name}"
            ))),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The built-in `echo` handler: repeats every line back.
pub struct EchoHandler;

#[async_trait]
impl SessionHandler for EchoHandler {
    async fn on_line(&mut self, _session: &SessionHandle, line: &str) -> Result<LineReply> {
        Ok(LineReply::line(format!("Echo: {line}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, mpsc::Receiver<PushMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = SessionHandle::new(
            SessionId::from_raw(7),
            TransportKind::Tcp,
            "127.0.0.1:4000".parse().unwrap(),
            tx,
        );
        (handle, rx)
    }

    #[tokio::test]
    async fn echo_handler_prefixes_lines() {
        let (session, _rx) = handle();
        let mut handler = EchoHandler;
        let reply = handler.on_line(&session, "hello").await.unwrap();
        assert_eq!(reply.lines, vec!["Echo: hello".to_string()]);
        assert_eq!(reply.action, SessionAction::Continue);
    }

    #[tokio::test]
    async fn registry_resolves_known_handlers() {
        let registry = HandlerRegistry::with_defaults();
        assert!(registry.create("echo").is_ok());

        let err = match registry.create("missing") {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[tokio::test]
    async fn pushes_reach_the_session_channel() {
        let (session, mut rx) = handle();
        session.push_line("tick").await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(rx.recv().await, Some(PushMessage::Line("tick".into())));
        assert_eq!(rx.recv().await, Some(PushMessage::Disconnect));
    }
}
