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

use crate::subneg::TelnetSubnegotiation;
use crate::{TelnetOption, consts};
use bytes::{BufMut, BytesMut};

/// A single wire-level Telnet frame.
///
/// Frames are what the emitter puts on the wire; the decoder folds them into
/// higher-level [`TelnetEvent`](crate::TelnetEvent)s. Two-byte commands
/// outside the negotiation set are consumed by the decoder without producing
/// a frame, so they have no representation here.
#[derive(Clone, Debug, PartialEq)]
pub enum TelnetFrame {
    /// A single data byte; `0xFF` is escaped to `IAC IAC` on the wire
    Data(u8),
    /// `IAC DO <option>` - request the peer perform an option
    Do(TelnetOption),
    /// `IAC DONT <option>` - demand the peer stop performing an option
    Dont(TelnetOption),
    /// `IAC WILL <option>` - offer to perform an option
    Will(TelnetOption),
    /// `IAC WONT <option>` - refuse to perform an option
    Wont(TelnetOption),
    /// `IAC SB <option> <payload> IAC SE`
    Subnegotiate(TelnetSubnegotiation),
}

impl TelnetFrame {
    /// Appends the wire encoding of this frame to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        match self {
            TelnetFrame::Data(byte) => {
                dst.reserve(2);
                if *byte == consts::IAC {
                    dst.put_u8(consts::IAC);
                }
                dst.put_u8(*byte);
            }
            TelnetFrame::Do(option) => {
                dst.reserve(3);
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::DO);
                dst.put_u8(option.to_u8());
            }
            TelnetFrame::Dont(option) => {
                dst.reserve(3);
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::DONT);
                dst.put_u8(option.to_u8());
            }
            TelnetFrame::Will(option) => {
                dst.reserve(3);
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::WILL);
                dst.put_u8(option.to_u8());
            }
            TelnetFrame::Wont(option) => {
                dst.reserve(3);
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::WONT);
                dst.put_u8(option.to_u8());
            }
            TelnetFrame::Subnegotiate(argument) => {
                dst.reserve(5 + argument.payload_len());
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SB);
                dst.put_u8(argument.option().to_u8());
                argument.write_payload(dst);
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SE);
            }
        }
    }
}
