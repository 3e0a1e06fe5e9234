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

//! Error types for the server crate

use std::time::Duration;
use thiserror::Error;

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error taxonomy.
///
/// Within a session everything except `Config` and `Bind` is handled
/// locally: the session transitions to `Closing` with a recorded reason and
/// its termination is an ordinary event for the server and the monitor bus.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed configuration or missing handler factory
    #[error("configuration error: {0}")]
    Config(String),

    /// Listener creation failed
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound
        addr: String,
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Peer EOF or reset; ordinary
    #[error("transport closed")]
    TransportClosed,

    /// Unexpected I/O failure on a transport
    #[error("transport fault: {0}")]
    TransportFault(String),

    /// Malformed protocol traffic, fatal for the session
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Application callback exceeded its deadline
    #[error("handler exceeded its {0:?} deadline")]
    HandlerTimeout(Duration),

    /// Application callback returned an unexpected failure
    #[error("handler fault: {0}")]
    HandlerFault(String),

    /// Monitor subscriber overran its event queue
    #[error("monitor subscriber overran its queue")]
    SlowConsumer,

    /// Accept while the session registry is full
    #[error("server at capacity ({0} sessions)")]
    Overcapacity(usize),

    /// Miscellaneous I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Whether this error is an ordinary end-of-connection.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ServerError::TransportClosed)
    }

    /// Whether this error must escalate to the supervisor instead of being
    /// absorbed by a session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::Config(_) | ServerError::Bind { .. })
    }
}

impl From<wireline_telnetcodec::CodecError> for ServerError {
    fn from(err: wireline_telnetcodec::CodecError) -> Self {
        ServerError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifiers() {
        assert!(ServerError::TransportClosed.is_disconnect());
        assert!(!ServerError::Overcapacity(10).is_disconnect());
        assert!(ServerError::Config("bad".into()).is_fatal());
        assert!(!ServerError::SlowConsumer.is_fatal());
    }

    #[test]
    fn codec_errors_map_to_protocol() {
        let err = ServerError::from(wireline_telnetcodec::CodecError::SubnegotiationOverflow {
            option: 24,
            limit: 1024,
        });
        assert!(matches!(err, ServerError::Protocol(_)));
    }
}
