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

//! # Wireline Server
//!
//! A multi-transport interactive server framework. One application handler
//! serves clients arriving over raw TCP, RFC 854 Telnet with option
//! negotiation, or WebSocket (optionally tunneling Telnet), with uniform
//! session semantics: welcome banner, line editing, command dispatch,
//! prompt, idle timeout, and graceful shutdown.
//!
//! ## Architecture
//!
//! Bytes flow through a fixed pipeline per connection:
//!
//! ```text
//! transport -> telnet codec -> line editor -> dispatcher -> handler
//!     ^                                                        |
//!     +----- telnet encode <- echo/prompt/response lines <-----+
//! ```
//!
//! - [`transport`]: the byte pipes (TCP and WebSocket)
//! - [`TelnetCodec`](wireline_telnetcodec::TelnetCodec): IAC parsing and
//!   Q-Method option negotiation (the `wireline-telnetcodec` crate)
//! - [`LineEditor`]: echo, backspace, CR/LF folding, control keys
//! - [`SessionHandler`]: the application seam; one handler per session
//! - [`Session`]: one task driving the pipeline for one connection
//! - [`Server`]: accept loop, capacity guard, session registry
//! - [`Supervisor`]: several servers, one coordinated shutdown
//! - [`MonitorBus`]: live pub/sub of every session's lifecycle and traffic
//!
//! ## Quick start
//!
//! ```no_run
//! use wireline_server::{AppConfig, HandlerRegistry, MonitorBus, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = HandlerRegistry::with_defaults();
//!     let config = AppConfig::parse("port: 8023\nhandler_class: echo\n")?;
//!     let supervisor =
//!         Supervisor::bind(config.build(&registry)?, MonitorBus::new()).await?;
//!     supervisor.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod editor;
mod error;
mod handler;
mod metrics;
mod monitor;
mod server;
mod session;
mod supervisor;
pub mod transport;
mod types;

pub use self::config::{
    AppConfig, DEFAULT_MONITOR_PATH, DEFAULT_WS_PATH, MAX_WS_FRAME_BYTES, ServerSpec,
    build_tls_acceptor,
};
pub use self::editor::{DEFAULT_PROMPT, LineEditor, LineEvent};
pub use self::error::{Result, ServerError};
pub use self::handler::{
    EchoHandler, HandlerFactory, HandlerRegistry, LineReply, PushMessage, SessionAction,
    SessionHandle, SessionHandler,
};
pub use self::metrics::{MetricsSnapshot, ServerMetrics};
pub use self::monitor::{
    ClientRef, MonitorBus, MonitorCommand, MonitorEvent, SUBSCRIBER_QUEUE, SessionRef,
    SessionSummary, TrafficData, serve_subscriber,
};
pub use self::server::{BUSY_MESSAGE, SHUTDOWN_NOTICE, Server, ServerConfig};
pub use self::session::{Session, SessionConfig};
pub use self::supervisor::{RunOutcome, Supervisor};
pub use self::types::{
    DisconnectReason, ServerInfo, SessionId, SessionInfo, SessionState, TransportKind,
};

// The codec types sessions and handlers commonly touch.
pub use wireline_telnetcodec::{TelnetCodec, TelnetOption, WindowSize};
