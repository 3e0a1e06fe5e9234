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

//! Per-connection session pipeline.
//!
//! One task owns the whole stack for a connection: transport reads flow
//! through the Telnet codec (on Telnet wires) into the line editor, whole
//! lines reach the dispatcher, and responses flow back out through the
//! codec. Handler pushes arrive over a channel so every write is serialized
//! by this task. All CPU work runs synchronously between suspension points;
//! the suspension points are transport I/O, timers, and nothing else.

use crate::editor::{DEFAULT_PROMPT, LineEditor, LineEvent};
use crate::error::{Result, ServerError};
use crate::handler::{PushMessage, SessionAction, SessionHandle, SessionHandler};
use crate::monitor::MonitorBus;
use crate::transport::BoxedTransport;
use crate::types::{DisconnectReason, SessionId, SessionState, TransportKind};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wireline_telnetcodec::{
    TelnetCodec, TelnetEvent, TelnetOption, TelnetSide, TelnetSubnegotiation, WindowSize,
};

/// Bytes requested per transport read.
const READ_CHUNK: usize = 1024;
/// Cap on the welcome banner write.
const WELCOME_TIMEOUT: Duration = Duration::from_secs(2);
/// Window after the last option reply before negotiation is considered
/// quiesced.
const NEGOTIATION_QUIESCENCE: Duration = Duration::from_millis(500);
/// Cap on flushing queued writes while closing.
const CLOSING_FLUSH: Duration = Duration::from_secs(2);

/// Per-session tunables, derived from the server configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Banner written on connect; `None` writes nothing
    pub welcome_message: Option<String>,
    /// Prompt written after each response
    pub prompt: String,
    /// Idle disconnect threshold
    pub idle_timeout: Duration,
    /// Deadline for each handler callback
    pub handler_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            welcome_message: None,
            prompt: DEFAULT_PROMPT.to_string(),
            idle_timeout: Duration::from_secs(300),
            handler_timeout: Duration::from_secs(30),
        }
    }
}

/// One live connection through the full pipeline.
pub struct Session {
    id: SessionId,
    kind: TransportKind,
    remote_addr: SocketAddr,
    transport: BoxedTransport,
    codec: Option<TelnetCodec>,
    editor: LineEditor,
    handler: Box<dyn SessionHandler>,
    handle: SessionHandle,
    push_rx: mpsc::Receiver<PushMessage>,
    monitor: MonitorBus,
    cancel: CancellationToken,
    config: SessionConfig,
    state: Arc<AtomicU8>,
    last_activity: Instant,
    /// Negotiated terminal type, when the client states one
    terminal_type: Option<String>,
    /// Negotiated window size, when the client states one
    window_size: Option<WindowSize>,
    /// Line mode: the client assembles lines itself, no server echo
    line_mode: bool,
}

impl Session {
    /// Builds a session around an accepted transport. Returns the session
    /// and the push sender used for handler-driven and server-driven
    /// writes.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        kind: TransportKind,
        transport: BoxedTransport,
        handler: Box<dyn SessionHandler>,
        monitor: MonitorBus,
        cancel: CancellationToken,
        config: SessionConfig,
        state: Arc<AtomicU8>,
    ) -> (Self, mpsc::Sender<PushMessage>) {
        let remote_addr = transport.peer_addr();
        let (push_tx, push_rx) = mpsc::channel(64);
        let handle = SessionHandle::new(id, kind, remote_addr, push_tx.clone());
        let session = Self {
            id,
            kind,
            remote_addr,
            transport,
            codec: kind.is_telnet().then(TelnetCodec::new),
            editor: LineEditor::new(),
            handler,
            handle,
            push_rx,
            monitor,
            cancel,
            config,
            state,
            last_activity: Instant::now(),
            terminal_type: None,
            window_size: None,
            // Non-telnet wires never negotiate; clients edit locally.
            line_mode: !kind.is_telnet(),
        };
        (session, push_tx)
    }

    /// Tears an unstarted session apart, recovering its transport. Used
    /// when admission fails before the pipeline runs.
    pub(crate) fn into_transport(self) -> BoxedTransport {
        self.transport
    }

    /// Drives the session to completion and returns why it ended.
    pub async fn run(mut self) -> DisconnectReason {
        info!(session = %self.id, peer = %self.remote_addr, transport = %self.kind, "session opened");
        let reason = match self.serve().await {
            Ok(reason) => reason,
            Err(err) => {
                if !err.is_disconnect() {
                    warn!(session = %self.id, "session failed: {err}");
                }
                reason_for(&err)
            }
        };
        self.finish(reason).await;
        info!(session = %self.id, reason = %reason, "session closed");
        reason
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    async fn serve(&mut self) -> Result<DisconnectReason> {
        // Opening: welcome banner, bounded.
        if let Some(welcome) = self.config.welcome_message.clone() {
            match timeout(WELCOME_TIMEOUT, self.write_line(&welcome)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ServerError::TransportFault(
                        "welcome write timed out".to_string(),
                    ));
                }
            }
        }
        self.set_state(SessionState::Negotiating);

        // Lines the client typed before Running are dispatched afterwards.
        let mut backlog = Vec::new();
        if self.kind.is_telnet() {
            if let Some(reason) = self.negotiate(&mut backlog).await? {
                return Ok(reason);
            }
        }
        self.set_state(SessionState::Running);

        let connect_lines = match timeout(
            self.config.handler_timeout,
            self.handler.on_connect(&self.handle),
        )
        .await
        {
            Ok(lines) => lines.map_err(|err| ServerError::HandlerFault(err.to_string()))?,
            Err(_) => return Err(ServerError::HandlerTimeout(self.config.handler_timeout)),
        };
        for line in connect_lines {
            self.write_line(&line).await?;
        }

        for event in backlog {
            if let Some(reason) = self.handle_line_event(event).await? {
                return Ok(reason);
            }
        }

        self.command_loop().await
    }

    /// Telnet opening: send the initial option offers immediately after the
    /// welcome, then wait out the quiescence window. A client that never
    /// answers simply quiesces with everything disabled and is served in
    /// character mode without echo, which is how raw connects to the
    /// Telnet port behave.
    async fn negotiate(&mut self, backlog: &mut Vec<LineEvent>) -> Result<Option<DisconnectReason>> {
        let opening = self
            .codec
            .as_mut()
            .expect("telnet codec on telnet transport")
            .begin_negotiation();
        self.transport.write_all(&opening).await?;
        debug!(session = %self.id, "initial telnet negotiation sent");

        // Quiesce: done once no option traffic arrives for the window.
        let mut deadline = Instant::now() + NEGOTIATION_QUIESCENCE;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                _ = self.cancel.cancelled() => return Ok(Some(DisconnectReason::Shutdown)),
                read = self.transport.read_some(READ_CHUNK) => {
                    let bytes = read?;
                    if bytes.is_empty() {
                        return Ok(Some(DisconnectReason::ClientEof));
                    }
                    if self.process_input(&bytes, backlog).await? {
                        deadline = Instant::now() + NEGOTIATION_QUIESCENCE;
                    }
                }
            }
        }
        debug!(
            session = %self.id,
            terminal_type = self.terminal_type.as_deref().unwrap_or("unknown"),
            window_size = %self.window_size.map(|size| size.to_string()).unwrap_or_else(|| "unknown".into()),
            line_mode = self.line_mode,
            "telnet negotiation quiesced"
        );
        Ok(None)
    }

    async fn command_loop(&mut self) -> Result<DisconnectReason> {
        loop {
            let idle_at = self.last_activity + self.config.idle_timeout;
            let mut events = Vec::new();
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(DisconnectReason::Shutdown),
                _ = sleep_until(idle_at) => {
                    debug!(session = %self.id, "idle timeout");
                    return Ok(DisconnectReason::Idle);
                }
                push = self.push_rx.recv() => {
                    match push {
                        Some(PushMessage::Line(line)) => {
                            self.write_line(&line).await?;
                        }
                        Some(PushMessage::Disconnect) | None => {
                            return Ok(DisconnectReason::HandlerRequest);
                        }
                    }
                }
                read = self.transport.read_some(READ_CHUNK) => {
                    let bytes = read?;
                    if bytes.is_empty() {
                        return Ok(DisconnectReason::ClientEof);
                    }
                    self.last_activity = Instant::now();
                    self.process_input(&bytes, &mut events).await?;
                }
            }
            for event in events {
                if let Some(reason) = self.handle_line_event(event).await? {
                    return Ok(reason);
                }
            }
        }
    }

    /// Runs a chunk of transport bytes through the codec and editor.
    /// Completed lines and control actions land in `events`; returns
    /// whether any option traffic was seen (for the quiescence clock).
    async fn process_input(&mut self, bytes: &[u8], events: &mut Vec<LineEvent>) -> Result<bool> {
        let mut echo = BytesMut::new();
        let mut saw_negotiation = false;

        if let Some(codec) = self.codec.as_mut() {
            let mut src = BytesMut::from(bytes);
            let mut decoded = Vec::new();
            while let Some(event) = codec.decode(&mut src)? {
                decoded.push(event);
            }
            let replies = codec.take_replies();
            for event in decoded {
                match event {
                    TelnetEvent::Data(byte) => {
                        if let Some(line_event) = self.editor.feed(byte, &mut echo) {
                            events.push(line_event);
                        }
                    }
                    TelnetEvent::OptionStatus(option, side, enabled) => {
                        saw_negotiation = true;
                        self.apply_option(option, side, enabled);
                    }
                    TelnetEvent::Subnegotiation(argument) => {
                        saw_negotiation = true;
                        self.apply_subnegotiation(argument);
                    }
                }
            }
            if let Some(replies) = replies {
                saw_negotiation = true;
                self.transport.write_all(&replies).await?;
            }
        } else {
            for byte in bytes {
                if let Some(line_event) = self.editor.feed(*byte, &mut echo) {
                    events.push(line_event);
                }
            }
        }

        if !echo.is_empty() {
            self.write_encoded(&echo).await?;
        }
        Ok(saw_negotiation)
    }

    fn apply_option(&mut self, option: TelnetOption, side: TelnetSide, enabled: bool) {
        match (option, side) {
            (TelnetOption::Echo, TelnetSide::Local) => {
                self.refresh_echo();
            }
            (TelnetOption::Linemode, _) => {
                self.line_mode = enabled;
                self.refresh_echo();
                debug!(session = %self.id, line_mode = enabled, "input mode changed");
            }
            _ => {}
        }
    }

    /// Server echo is on only in character mode with ECHO negotiated.
    fn refresh_echo(&mut self) {
        let echo = !self.line_mode
            && self
                .codec
                .as_ref()
                .is_some_and(|codec| codec.local_enabled(TelnetOption::Echo));
        self.editor.set_echo(echo);
    }

    fn apply_subnegotiation(&mut self, argument: TelnetSubnegotiation) {
        match argument {
            TelnetSubnegotiation::TerminalTypeIs(name) => {
                debug!(session = %self.id, terminal_type = %name, "terminal type reported");
                self.terminal_type = Some(name);
            }
            TelnetSubnegotiation::WindowSize(size) => {
                debug!(session = %self.id, size = %size, "window size reported");
                self.window_size = Some(size);
            }
            TelnetSubnegotiation::TerminalTypeSend | TelnetSubnegotiation::Unknown(..) => {}
        }
    }

    async fn handle_line_event(&mut self, event: LineEvent) -> Result<Option<DisconnectReason>> {
        match event {
            LineEvent::Line(line) => self.dispatch(line).await,
            LineEvent::Interrupt => {
                debug!(session = %self.id, "client interrupt");
                Ok(Some(DisconnectReason::ClientInterrupt))
            }
            LineEvent::EndOfInput => Ok(Some(DisconnectReason::ClientEof)),
        }
    }

    /// The command dispatcher: built-in quit handling, then the handler
    /// callback under its deadline, then the prompt.
    async fn dispatch(&mut self, line: String) -> Result<Option<DisconnectReason>> {
        self.monitor.client_input(self.id, &line);
        let line = line.trim_end();

        if line.is_empty() {
            self.write_prompt().await?;
            return Ok(None);
        }

        if !self.handler.intercepts_quit()
            && matches!(line.to_ascii_lowercase().as_str(), "quit" | "exit" | "q")
        {
            self.write_line("Goodbye!").await?;
            return Ok(Some(DisconnectReason::ClientQuit));
        }

        let reply = match timeout(
            self.config.handler_timeout,
            self.handler.on_line(&self.handle, line),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                warn!(session = %self.id, "handler fault: {err}");
                let _ = self.write_line("Internal error.").await;
                return Ok(Some(DisconnectReason::HandlerFault));
            }
            Err(_) => {
                warn!(
                    session = %self.id,
                    deadline = ?self.config.handler_timeout,
                    "handler exceeded its deadline"
                );
                return Ok(Some(DisconnectReason::HandlerTimeout));
            }
        };

        for line in &reply.lines {
            self.write_line(line).await?;
        }
        if reply.action == SessionAction::Disconnect {
            return Ok(Some(DisconnectReason::HandlerRequest));
        }
        self.write_prompt().await?;
        Ok(None)
    }

    /// Writes one line with CRLF, publishing it to the monitor bus.
    /// Outbound writes count as activity for the idle clock.
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut bytes = BytesMut::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.write_encoded(&bytes).await?;
        self.last_activity = Instant::now();
        self.monitor.server_message(self.id, line);
        Ok(())
    }

    /// No prompt is written before `Running`.
    async fn write_prompt(&mut self) -> Result<()> {
        if self.state() != SessionState::Running {
            return Ok(());
        }
        let prompt = self.config.prompt.clone();
        self.write_encoded(prompt.as_bytes()).await
    }

    /// Every outbound write passes through the Telnet encoder on Telnet
    /// wires so literal 0xFF bytes stay escaped.
    async fn write_encoded(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(codec) = self.codec.as_ref() {
            let mut encoded = BytesMut::with_capacity(bytes.len());
            codec.encode_data(bytes, &mut encoded);
            self.transport.write_all(&encoded).await
        } else {
            self.transport.write_all(bytes).await
        }
    }

    /// Closing: flush queued pushes under a cap, notify, close, deregister.
    async fn finish(&mut self, reason: DisconnectReason) {
        self.set_state(SessionState::Closing);

        // No new reads; queued writes may still flush.
        let flush_deadline = Instant::now() + CLOSING_FLUSH;
        while let Ok(push) = self.push_rx.try_recv() {
            if Instant::now() >= flush_deadline {
                break;
            }
            if let PushMessage::Line(line) = push {
                if timeout(CLOSING_FLUSH, self.write_line(&line)).await.is_err() {
                    break;
                }
            }
        }

        self.handler.on_disconnect(&self.handle).await;
        self.monitor.session_ended(self.id);
        let _ = self.transport.close().await;
        self.set_state(SessionState::Closed);
        debug!(session = %self.id, reason = %reason, "session teardown complete");
    }

    /// The negotiated terminal type, if the client reported one.
    pub fn terminal_type(&self) -> Option<&str> {
        self.terminal_type.as_deref()
    }

    /// The negotiated window size, if the client reported one.
    pub fn window_size(&self) -> Option<WindowSize> {
        self.window_size
    }
}

fn reason_for(err: &ServerError) -> DisconnectReason {
    match err {
        ServerError::TransportClosed => DisconnectReason::ClientEof,
        ServerError::Protocol(_) => DisconnectReason::Protocol,
        ServerError::HandlerTimeout(_) => DisconnectReason::HandlerTimeout,
        ServerError::HandlerFault(_) => DisconnectReason::HandlerFault,
        _ => DisconnectReason::TransportFailure,
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("transport", &self.kind)
            .field("peer", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}
