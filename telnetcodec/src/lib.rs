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

//! # Wireline Telnet Protocol Codec
//!
//! A stateful, byte-oriented codec for the Telnet protocol (RFC 854/855),
//! designed to sit under asynchronous byte transports via
//! `tokio_util::codec`.
//!
//! The codec handles:
//!
//! - **Data transmission**: raw bytes with IAC (Interpret As Command)
//!   escaping undone on decode and applied on encode
//! - **Option negotiation**: `DO`/`DONT`/`WILL`/`WONT` tracked per option
//!   and per side with the RFC 1143 Q-Method, which guarantees no request
//!   is ever issued while a matching request is outstanding
//! - **Subnegotiation**: TERMINAL-TYPE (`IS`/`SEND`) and NAWS payloads,
//!   with a 1 KiB bound on accumulated payloads
//!
//! Supported options are ECHO (1), SUPPRESS-GO-AHEAD (3),
//! TERMINAL-TYPE (24), NAWS (31), and LINEMODE (34); everything else is
//! refused during negotiation and its subnegotiations are passed through
//! unparsed.
//!
//! ## Usage
//!
//! ```
//! use wireline_telnetcodec::{TelnetCodec, TelnetEvent};
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut codec = TelnetCodec::new();
//! let opening = codec.begin_negotiation(); // bytes to send to the peer
//!
//! let mut input = BytesMut::from(&b"hi\xFF\xFF"[..]);
//! while let Some(event) = codec.decode(&mut input).unwrap() {
//!     match event {
//!         TelnetEvent::Data(byte) => { /* feed the line editor */ }
//!         TelnetEvent::OptionStatus(option, side, enabled) => { /* mode switches */ }
//!         TelnetEvent::Subnegotiation(arg) => { /* terminal type, window size */ }
//!     }
//! }
//! if let Some(replies) = codec.take_replies() {
//!     // put the queued negotiation replies on the wire
//! }
//! ```

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod codec;
pub mod consts;
mod event;
mod frame;
mod options;
mod result;
mod subneg;

pub use self::codec::TelnetCodec;
pub use self::event::TelnetEvent;
pub use self::frame::TelnetFrame;
pub use self::options::{TelnetOption, TelnetOptions, TelnetSide};
pub use self::result::{CodecError, CodecResult};
pub use self::subneg::{TelnetSubnegotiation, WindowSize};
