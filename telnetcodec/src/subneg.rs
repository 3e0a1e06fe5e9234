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

//! Subnegotiation payloads for TERMINAL-TYPE and NAWS.

use crate::{TelnetOption, consts};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

/// Negotiate About Window Size payload: four bytes, columns then rows,
/// both big-endian [RFC1073].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSize {
    /// Terminal width in character columns
    pub cols: u16,
    /// Terminal height in character rows
    pub rows: u16,
}

impl WindowSize {
    /// Creates a new `WindowSize` with the given dimensions.
    pub fn new(cols: u16, rows: u16) -> Self {
        WindowSize { cols, rows }
    }

    /// Decodes a NAWS payload. Returns `None` unless exactly four bytes.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != 4 {
            return None;
        }
        Some(WindowSize {
            cols: BigEndian::read_u16(&payload[0..2]),
            rows: BigEndian::read_u16(&payload[2..4]),
        })
    }

    fn write(&self, dst: &mut BytesMut) {
        let mut buf = [0u8; 4];
        BigEndian::write_u16(&mut buf[0..2], self.cols);
        BigEndian::write_u16(&mut buf[2..4], self.rows);
        dst.put_slice(&buf);
    }
}

impl std::fmt::Display for WindowSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// A decoded `IAC SB ... IAC SE` payload.
#[derive(Clone, Debug, PartialEq)]
pub enum TelnetSubnegotiation {
    /// `TTYPE IS <name>`: the peer states its terminal type [RFC1091]
    TerminalTypeIs(String),
    /// `TTYPE SEND`: request the peer transmit its terminal type
    TerminalTypeSend,
    /// `NAWS <cols> <rows>`: the peer states its window size [RFC1073]
    WindowSize(WindowSize),
    /// Payload for an option this codec does not interpret
    Unknown(TelnetOption, BytesMut),
}

impl TelnetSubnegotiation {
    /// Decodes a raw subnegotiation payload for the given option.
    ///
    /// Payloads that fail to parse for a known option degrade to
    /// [`TelnetSubnegotiation::Unknown`] rather than erroring; the stream
    /// itself was well-formed.
    pub fn parse(option: TelnetOption, payload: BytesMut) -> Self {
        match option {
            TelnetOption::TerminalType => match payload.first() {
                Some(&consts::ttype::IS) => {
                    let name = String::from_utf8_lossy(&payload[1..]).into_owned();
                    TelnetSubnegotiation::TerminalTypeIs(name)
                }
                Some(&consts::ttype::SEND) => TelnetSubnegotiation::TerminalTypeSend,
                _ => TelnetSubnegotiation::Unknown(option, payload),
            },
            TelnetOption::Naws => match WindowSize::parse(&payload) {
                Some(size) => TelnetSubnegotiation::WindowSize(size),
                None => TelnetSubnegotiation::Unknown(option, payload),
            },
            _ => TelnetSubnegotiation::Unknown(option, payload),
        }
    }

    /// The option this payload belongs to.
    pub fn option(&self) -> TelnetOption {
        match self {
            TelnetSubnegotiation::TerminalTypeIs(_) | TelnetSubnegotiation::TerminalTypeSend => {
                TelnetOption::TerminalType
            }
            TelnetSubnegotiation::WindowSize(_) => TelnetOption::Naws,
            TelnetSubnegotiation::Unknown(option, _) => *option,
        }
    }

    /// Unescaped payload length, used for buffer reservation.
    pub fn payload_len(&self) -> usize {
        match self {
            TelnetSubnegotiation::TerminalTypeIs(name) => 1 + name.len(),
            TelnetSubnegotiation::TerminalTypeSend => 1,
            TelnetSubnegotiation::WindowSize(_) => 4,
            TelnetSubnegotiation::Unknown(_, payload) => payload.len(),
        }
    }

    /// Appends the payload bytes (between `IAC SB <option>` and `IAC SE`)
    /// to `dst`, escaping any literal `0xFF`.
    pub fn write_payload(&self, dst: &mut BytesMut) {
        let mut raw = BytesMut::with_capacity(self.payload_len());
        match self {
            TelnetSubnegotiation::TerminalTypeIs(name) => {
                raw.put_u8(consts::ttype::IS);
                raw.put_slice(name.as_bytes());
            }
            TelnetSubnegotiation::TerminalTypeSend => {
                raw.put_u8(consts::ttype::SEND);
            }
            TelnetSubnegotiation::WindowSize(size) => {
                size.write(&mut raw);
            }
            TelnetSubnegotiation::Unknown(_, payload) => {
                raw.put_slice(payload);
            }
        }
        for byte in &raw {
            if *byte == consts::IAC {
                dst.put_u8(consts::IAC);
            }
            dst.put_u8(*byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_size_parse_msb_first() {
        let size = WindowSize::parse(&[0x00, 0x50, 0x00, 0x18]).unwrap();
        assert_eq!(size, WindowSize::new(80, 24));
    }

    #[test]
    fn window_size_rejects_short_payload() {
        assert_eq!(WindowSize::parse(&[0x00, 0x50, 0x00]), None);
    }

    #[test]
    fn terminal_type_is_parses_name() {
        let payload = BytesMut::from(&[0u8, b'x', b't', b'e', b'r', b'm'][..]);
        let arg = TelnetSubnegotiation::parse(TelnetOption::TerminalType, payload);
        assert_eq!(arg, TelnetSubnegotiation::TerminalTypeIs("xterm".into()));
    }

    #[test]
    fn unknown_option_payload_is_preserved() {
        let payload = BytesMut::from(&[1u8, 2, 3][..]);
        let arg = TelnetSubnegotiation::parse(TelnetOption::Unknown(201), payload.clone());
        assert_eq!(
            arg,
            TelnetSubnegotiation::Unknown(TelnetOption::Unknown(201), payload)
        );
    }

    #[test]
    fn payload_iac_bytes_are_escaped() {
        let size = WindowSize::new(0xFF00, 24);
        let mut dst = BytesMut::new();
        TelnetSubnegotiation::WindowSize(size).write_payload(&mut dst);
        assert_eq!(&dst[..], &[0xFF, 0xFF, 0x00, 0x00, 0x18]);
    }
}
