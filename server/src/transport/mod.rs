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

//! Byte-pipe abstraction over the supported wires.
//!
//! A [`Transport`] is the only thing a session sees of the network: a byte
//! pipe with suspension points at `read_some` and `write_all`. Telnet
//! semantics live a layer up in the codec; the WebSocket implementation
//! flattens its message frames into the same byte-stream shape.

mod tcp;
mod ws;

pub use self::tcp::TcpTransport;
pub use self::ws::{MonitorChannel, WsEndpoint, WsTransport, WsUpgrade, upgrade as ws_upgrade};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

/// A connected byte pipe.
///
/// `read_some` returns an empty buffer on orderly end-of-stream and fails
/// with [`ServerError::TransportClosed`](crate::ServerError::TransportClosed)
/// on reset. `close` is idempotent.
#[async_trait]
pub trait Transport: Send {
    /// Reads up to `max` bytes, suspending until data is available.
    async fn read_some(&mut self, max: usize) -> Result<Bytes>;

    /// Writes the whole buffer to the peer.
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Closes the pipe. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;

    /// The peer's address.
    fn peer_addr(&self) -> SocketAddr;
}

/// Owned, type-erased transport handed to a session.
pub type BoxedTransport = Box<dyn Transport>;
