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

//! Error types for the Telnet codec

use thiserror::Error;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors produced while decoding or encoding the Telnet protocol.
#[derive(Debug, Error)]
pub enum CodecError {
    /// I/O error from the underlying buffer plumbing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An option negotiation frame could not be processed
    #[error("negotiation error: {reason}")]
    Negotiation {
        /// Description of what went wrong during negotiation
        reason: String,
    },

    /// A subnegotiation ran past the sane payload bound without `IAC SE`
    #[error("subnegotiation for option {option} exceeded {limit} bytes")]
    SubnegotiationOverflow {
        /// The option code being subnegotiated
        option: u8,
        /// The enforced payload bound
        limit: usize,
    },
}

impl CodecError {
    /// Whether this error should terminate the session it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::Io(_) | CodecError::SubnegotiationOverflow { .. }
        )
    }
}
