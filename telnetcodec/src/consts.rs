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

//! Telnet protocol constants (RFC 854 / RFC 855)

/// End of subnegotiation parameters
pub const SE: u8 = 240;
/// No operation
pub const NOP: u8 = 241;
/// Data Mark - the data stream portion of a Synch
pub const DM: u8 = 242;
/// Break - NVT character BRK
pub const BRK: u8 = 243;
/// Interrupt Process
pub const IP: u8 = 244;
/// Abort Output
pub const AO: u8 = 245;
/// Are You There
pub const AYT: u8 = 246;
/// Erase Character
pub const EC: u8 = 247;
/// Erase Line
pub const EL: u8 = 248;
/// Go Ahead
pub const GA: u8 = 249;
/// Begin subnegotiation of the indicated option
pub const SB: u8 = 250;
/// Indicates the desire to begin performing the indicated option
pub const WILL: u8 = 251;
/// Indicates the refusal to perform the indicated option
pub const WONT: u8 = 252;
/// Indicates the request that the other party perform the indicated option
pub const DO: u8 = 253;
/// Indicates the demand that the other party stop performing the option
pub const DONT: u8 = 254;
/// Interpret As Command
pub const IAC: u8 = 255;

/// NVT NUL
pub const NUL: u8 = 0;
/// Line Feed
pub const LF: u8 = 0x0A;
/// Carriage Return
pub const CR: u8 = 0x0D;

/// Telnet option codes supported by this codec.
pub mod option {
    /// Echo [RFC857](https://tools.ietf.org/html/rfc857)
    pub const ECHO: u8 = 1;
    /// Suppress Go Ahead [RFC858](https://tools.ietf.org/html/rfc858)
    pub const SGA: u8 = 3;
    /// Terminal Type [RFC1091](https://tools.ietf.org/html/rfc1091)
    pub const TTYPE: u8 = 24;
    /// Negotiate About Window Size [RFC1073](https://tools.ietf.org/html/rfc1073)
    pub const NAWS: u8 = 31;
    /// Linemode [RFC1184](https://tools.ietf.org/html/rfc1184)
    pub const LINEMODE: u8 = 34;
}

/// TERMINAL-TYPE subnegotiation commands [RFC1091]
pub mod ttype {
    /// The sender of this command states the terminal type in the payload
    pub const IS: u8 = 0;
    /// The sender of this command requests the receiver transmit its terminal type
    pub const SEND: u8 = 1;
}

/// Upper bound on accumulated subnegotiation payload before the stream is
/// considered malformed.
pub const MAX_SUBNEGOTIATION_LEN: usize = 1024;
