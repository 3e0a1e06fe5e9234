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

use crate::options::{TelnetOption, TelnetOptions, TelnetSide};
use crate::subneg::TelnetSubnegotiation;
use crate::{CodecError, TelnetEvent, TelnetFrame, consts};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// A stateful codec for the Telnet protocol.
///
/// The decoder consumes raw bytes and yields [`TelnetEvent`]s: cleaned data
/// bytes (IAC escaping undone), completed option negotiations, and
/// subnegotiation payloads. Negotiation frames are run through the RFC 1143
/// Q-Method state machine and any required replies are queued internally;
/// the driving loop drains them with [`take_replies`](Self::take_replies)
/// and puts them on the wire. The decoder itself never blocks and never
/// writes.
///
/// Each connection owns its own `TelnetCodec`; the type is not meant to be
/// shared across tasks.
pub struct TelnetCodec {
    decoder_state: DecoderState,
    decoder_buffer: BytesMut,
    options: TelnetOptions,
    replies: BytesMut,
}

/// Decoder state machine positions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DecoderState {
    /// Passing data bytes through
    NormalData,
    /// Saw `IAC`, awaiting the command byte
    InterpretAsCommand,
    /// Saw `IAC DO`, awaiting the option code
    NegotiateDo,
    /// Saw `IAC DONT`, awaiting the option code
    NegotiateDont,
    /// Saw `IAC WILL`, awaiting the option code
    NegotiateWill,
    /// Saw `IAC WONT`, awaiting the option code
    NegotiateWont,
    /// Saw `IAC SB`, awaiting the option code
    Subnegotiate,
    /// Accumulating subnegotiation payload for the given option
    SubnegotiateArgument(u8),
    /// Saw `IAC` inside a subnegotiation payload
    SubnegotiateArgumentIAC(u8),
}

impl Default for TelnetCodec {
    fn default() -> Self {
        TelnetCodec {
            decoder_state: DecoderState::NormalData,
            decoder_buffer: BytesMut::new(),
            options: TelnetOptions::default(),
            replies: BytesMut::new(),
        }
    }
}

impl TelnetCodec {
    /// Creates a new codec with all options disabled.
    pub fn new() -> TelnetCodec {
        TelnetCodec::default()
    }

    /// Whether we are currently performing `option`.
    pub fn local_enabled(&self, option: TelnetOption) -> bool {
        self.options.local_enabled(option)
    }

    /// Whether the peer is currently performing `option`.
    pub fn remote_enabled(&self, option: TelnetOption) -> bool {
        self.options.remote_enabled(option)
    }

    /// Queues the server's opening negotiation and returns the bytes to
    /// send: `DO SUPPRESS-GO-AHEAD`, `WILL SUPPRESS-GO-AHEAD`, `WILL ECHO`,
    /// `DO TERMINAL-TYPE`, `DO NAWS`.
    pub fn begin_negotiation(&mut self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(15);
        let requests = [
            self.options.enable_remote(TelnetOption::SuppressGoAhead),
            self.options.enable_local(TelnetOption::SuppressGoAhead),
            self.options.enable_local(TelnetOption::Echo),
            self.options.enable_remote(TelnetOption::TerminalType),
            self.options.enable_remote(TelnetOption::Naws),
        ];
        for frame in requests.into_iter().flatten() {
            frame.write(&mut dst);
        }
        dst
    }

    /// Drains any negotiation replies queued by the decoder since the last
    /// call. Returns `None` when there is nothing to send.
    pub fn take_replies(&mut self) -> Option<BytesMut> {
        if self.replies.is_empty() {
            None
        } else {
            Some(self.replies.split())
        }
    }

    /// Encodes application data for the wire, escaping literal `0xFF`
    /// bytes to `IAC IAC`.
    pub fn encode_data(&self, data: &[u8], dst: &mut BytesMut) {
        dst.reserve(data.len());
        for byte in data {
            if *byte == consts::IAC {
                dst.put_u8(consts::IAC);
            }
            dst.put_u8(*byte);
        }
    }

    fn queue_reply(&mut self, frame: TelnetFrame) {
        frame.write(&mut self.replies);
    }

    /// Runs a received negotiation frame through the option table, queueing
    /// the reply and any follow-up traffic. Returns the status event when
    /// the negotiation completed an enable/disable transition.
    fn negotiate(&mut self, frame: TelnetFrame, side: TelnetSide) -> Option<TelnetEvent> {
        let option = match frame {
            TelnetFrame::Do(option)
            | TelnetFrame::Dont(option)
            | TelnetFrame::Will(option)
            | TelnetFrame::Wont(option) => option,
            _ => return None,
        };
        let was_enabled = match side {
            TelnetSide::Local => self.options.local_enabled(option),
            TelnetSide::Remote => self.options.remote_enabled(option),
        };
        if let Some(reply) = self.options.handle_received(&frame) {
            self.queue_reply(reply);
        }
        let is_enabled = match side {
            TelnetSide::Local => self.options.local_enabled(option),
            TelnetSide::Remote => self.options.remote_enabled(option),
        };
        if is_enabled == was_enabled {
            return None;
        }
        debug!(%option, %side, enabled = is_enabled, "option negotiation completed");
        if option == TelnetOption::TerminalType && side == TelnetSide::Remote && is_enabled {
            // The peer agreed to TTYPE; ask it to state its terminal type.
            self.queue_reply(TelnetFrame::Subnegotiate(
                TelnetSubnegotiation::TerminalTypeSend,
            ));
        }
        Some(TelnetEvent::OptionStatus(option, side, is_enabled))
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetEvent;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TelnetEvent>, Self::Error> {
        while src.remaining() > 0 {
            let byte = src.get_u8();
            match (self.decoder_state, byte) {
                (DecoderState::NormalData, consts::IAC) => {
                    self.decoder_state = DecoderState::InterpretAsCommand;
                }
                (DecoderState::NormalData, _) => {
                    return Ok(Some(TelnetEvent::Data(byte)));
                }
                (DecoderState::InterpretAsCommand, consts::IAC) => {
                    // IAC IAC is a literal 0xFF data byte
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetEvent::Data(consts::IAC)));
                }
                (DecoderState::InterpretAsCommand, consts::DO) => {
                    self.decoder_state = DecoderState::NegotiateDo;
                }
                (DecoderState::InterpretAsCommand, consts::DONT) => {
                    self.decoder_state = DecoderState::NegotiateDont;
                }
                (DecoderState::InterpretAsCommand, consts::WILL) => {
                    self.decoder_state = DecoderState::NegotiateWill;
                }
                (DecoderState::InterpretAsCommand, consts::WONT) => {
                    self.decoder_state = DecoderState::NegotiateWont;
                }
                (DecoderState::InterpretAsCommand, consts::SB) => {
                    self.decoder_state = DecoderState::Subnegotiate;
                }
                (DecoderState::InterpretAsCommand, _) => {
                    // Any other two-byte command is consumed silently.
                    debug!("ignoring telnet command {:#04X}", byte);
                    self.decoder_state = DecoderState::NormalData;
                }
                (DecoderState::NegotiateDo, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let frame = TelnetFrame::Do(TelnetOption::from_u8(byte));
                    if let Some(event) = self.negotiate(frame, TelnetSide::Local) {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateDont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let frame = TelnetFrame::Dont(TelnetOption::from_u8(byte));
                    if let Some(event) = self.negotiate(frame, TelnetSide::Local) {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateWill, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let frame = TelnetFrame::Will(TelnetOption::from_u8(byte));
                    if let Some(event) = self.negotiate(frame, TelnetSide::Remote) {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateWont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let frame = TelnetFrame::Wont(TelnetOption::from_u8(byte));
                    if let Some(event) = self.negotiate(frame, TelnetSide::Remote) {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::Subnegotiate, _) => {
                    self.decoder_state = DecoderState::SubnegotiateArgument(byte);
                }
                (DecoderState::SubnegotiateArgument(option), consts::IAC) => {
                    self.decoder_state = DecoderState::SubnegotiateArgumentIAC(option);
                }
                (DecoderState::SubnegotiateArgument(option), _) => {
                    if self.decoder_buffer.len() >= consts::MAX_SUBNEGOTIATION_LEN {
                        self.decoder_state = DecoderState::NormalData;
                        self.decoder_buffer.clear();
                        return Err(CodecError::SubnegotiationOverflow {
                            option,
                            limit: consts::MAX_SUBNEGOTIATION_LEN,
                        });
                    }
                    self.decoder_buffer.put_u8(byte);
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::IAC) => {
                    if self.decoder_buffer.len() >= consts::MAX_SUBNEGOTIATION_LEN {
                        self.decoder_state = DecoderState::NormalData;
                        self.decoder_buffer.clear();
                        return Err(CodecError::SubnegotiationOverflow {
                            option,
                            limit: consts::MAX_SUBNEGOTIATION_LEN,
                        });
                    }
                    self.decoder_state = DecoderState::SubnegotiateArgument(option);
                    self.decoder_buffer.put_u8(consts::IAC);
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::SE) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(option);
                    let payload = self.decoder_buffer.split();
                    let argument = TelnetSubnegotiation::parse(option, payload);
                    return Ok(Some(TelnetEvent::Subnegotiation(argument)));
                }
                (DecoderState::SubnegotiateArgumentIAC(_), _) => {
                    warn!("invalid command {:#04X} inside subnegotiation, aborting", byte);
                    self.decoder_state = DecoderState::NormalData;
                    self.decoder_buffer.clear();
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<TelnetFrame> for TelnetCodec {
    type Error = CodecError;

    fn encode(&mut self, item: TelnetFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write(dst);
        Ok(())
    }
}

impl Encoder<&[u8]> for TelnetCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_data(item, dst);
        Ok(())
    }
}
