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

//! Raw TCP transport. Also carries Telnet-over-TCP; the codec lives above.

use super::Transport;
use crate::error::{Result, ServerError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A plain TCP stream behind the [`Transport`] contract.
pub struct TcpTransport {
    stream: TcpStream,
    peer_addr: SocketAddr,
    closed: bool,
}

impl TcpTransport {
    /// Wraps an accepted stream.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            closed: false,
        }
    }
}

fn map_io_error(err: std::io::Error) -> ServerError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof
        | ErrorKind::NotConnected => ServerError::TransportClosed,
        _ => ServerError::TransportFault(err.to_string()),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_some(&mut self, max: usize) -> Result<Bytes> {
        if self.closed {
            return Err(ServerError::TransportClosed);
        }
        // read_buf fills at most the reserved capacity, so this is one
        // network read of up to `max` bytes; zero bytes means orderly EOF.
        let mut buffer = BytesMut::with_capacity(max);
        self.stream
            .read_buf(&mut buffer)
            .await
            .map_err(map_io_error)?;
        Ok(buffer.freeze())
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ServerError::TransportClosed);
        }
        self.stream.write_all(data).await.map_err(map_io_error)?;
        self.stream.flush().await.map_err(map_io_error)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Peer may already be gone; that is not an error for close.
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}
