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

//! Telnet option negotiation state, tracked per RFC 1143 (the Q-Method).

use crate::{TelnetFrame, consts};
use std::fmt::Formatter;

/// Telnet options this codec negotiates. Anything else decodes to
/// [`TelnetOption::Unknown`] and is refused during negotiation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TelnetOption {
    /// [`consts::option::ECHO`] Telnet Echo Option [RFC857](https://tools.ietf.org/html/rfc857)
    Echo,
    /// [`consts::option::SGA`] Suppress Go Ahead [RFC858](https://tools.ietf.org/html/rfc858)
    SuppressGoAhead,
    /// [`consts::option::TTYPE`] Terminal Type [RFC1091](https://tools.ietf.org/html/rfc1091)
    TerminalType,
    /// [`consts::option::NAWS`] Negotiate About Window Size [RFC1073](https://tools.ietf.org/html/rfc1073)
    Naws,
    /// [`consts::option::LINEMODE`] Linemode [RFC1184](https://tools.ietf.org/html/rfc1184)
    Linemode,
    /// Any option outside the supported set
    Unknown(u8),
}

impl TelnetOption {
    /// Converts a `TelnetOption` into its wire option code.
    pub fn to_u8(self) -> u8 {
        match self {
            TelnetOption::Echo => consts::option::ECHO,
            TelnetOption::SuppressGoAhead => consts::option::SGA,
            TelnetOption::TerminalType => consts::option::TTYPE,
            TelnetOption::Naws => consts::option::NAWS,
            TelnetOption::Linemode => consts::option::LINEMODE,
            TelnetOption::Unknown(byte) => byte,
        }
    }

    /// Converts a wire option code into the corresponding `TelnetOption`.
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            consts::option::ECHO => TelnetOption::Echo,
            consts::option::SGA => TelnetOption::SuppressGoAhead,
            consts::option::TTYPE => TelnetOption::TerminalType,
            consts::option::NAWS => TelnetOption::Naws,
            consts::option::LINEMODE => TelnetOption::Linemode,
            byte => TelnetOption::Unknown(byte),
        }
    }

    /// Whether the server side of this codec will perform the option
    /// (i.e. we may answer `DO` with `WILL`).
    pub fn supported_local(self) -> bool {
        matches!(
            self,
            TelnetOption::Echo | TelnetOption::SuppressGoAhead | TelnetOption::Linemode
        )
    }

    /// Whether we accept the peer performing the option
    /// (i.e. we may answer `WILL` with `DO`).
    pub fn supported_remote(self) -> bool {
        matches!(
            self,
            TelnetOption::SuppressGoAhead
                | TelnetOption::TerminalType
                | TelnetOption::Naws
                | TelnetOption::Linemode
        )
    }
}

impl std::fmt::Display for TelnetOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetOption::Echo => write!(f, "Echo"),
            TelnetOption::SuppressGoAhead => write!(f, "SuppressGoAhead"),
            TelnetOption::TerminalType => write!(f, "TerminalType"),
            TelnetOption::Naws => write!(f, "Naws"),
            TelnetOption::Linemode => write!(f, "Linemode"),
            TelnetOption::Unknown(option) => write!(f, "Unknown({option})"),
        }
    }
}

impl From<u8> for TelnetOption {
    fn from(byte: u8) -> Self {
        Self::from_u8(byte)
    }
}

impl From<TelnetOption> for u8 {
    fn from(option: TelnetOption) -> Self {
        option.to_u8()
    }
}

/// The side of the connection an option applies to.
///
/// Each option runs two independent Q-Method state machines: the local path
/// (what *we* perform, negotiated with `WILL`/`WONT` against the peer's
/// `DO`/`DONT`) and the remote path (what the *peer* performs, negotiated
/// with `DO`/`DONT` against the peer's `WILL`/`WONT`).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TelnetSide {
    /// The local side of the connection (what we perform)
    Local,
    /// The remote side of the connection (what the peer performs)
    Remote,
}

impl std::fmt::Display for TelnetSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetSide::Local => write!(f, "Local"),
            TelnetSide::Remote => write!(f, "Remote"),
        }
    }
}

/// RFC 1143 negotiation states.
///
/// The `Opposite` states record that the desire flipped while a request was
/// still in flight, which is what prevents the negotiation loops the
/// Q-Method exists to rule out.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub(crate) enum QState {
    /// Option is disabled
    #[default]
    No,
    /// Option is enabled, we asked to disable, awaiting acknowledgement
    WantNo,
    /// As `WantNo`, but the desire flipped back to enabled mid-flight
    WantNoOpposite,
    /// Option is enabled
    Yes,
    /// Option is disabled, we asked to enable, awaiting acknowledgement
    WantYes,
    /// As `WantYes`, but the desire flipped back to disabled mid-flight
    WantYesOpposite,
}

#[derive(Clone, Copy, Debug, Default)]
struct OptionState {
    local: QState,
    remote: QState,
}

/// Per-connection negotiation state for every option code.
///
/// Indexed directly by option code; the supported set is gated through
/// [`TelnetOption::supported_local`] / [`TelnetOption::supported_remote`],
/// everything else is refused on receipt and never requested.
#[derive(Clone, Debug)]
pub struct TelnetOptions {
    state: [OptionState; 256],
}

impl Default for TelnetOptions {
    fn default() -> Self {
        TelnetOptions {
            state: [OptionState::default(); 256],
        }
    }
}

impl TelnetOptions {
    pub(crate) fn local_qstate(&self, option: TelnetOption) -> QState {
        self.state[option.to_u8() as usize].local
    }

    pub(crate) fn remote_qstate(&self, option: TelnetOption) -> QState {
        self.state[option.to_u8() as usize].remote
    }

    /// Whether we are currently performing the option.
    pub fn local_enabled(&self, option: TelnetOption) -> bool {
        matches!(
            self.state[option.to_u8() as usize].local,
            QState::Yes | QState::WantNo | QState::WantNoOpposite
        )
    }

    /// Whether the peer is currently performing the option.
    pub fn remote_enabled(&self, option: TelnetOption) -> bool {
        matches!(
            self.state[option.to_u8() as usize].remote,
            QState::Yes | QState::WantNo | QState::WantNoOpposite
        )
    }

    /// Request that we start performing `option` (send `WILL`).
    /// Returns the frame to put on the wire, if negotiation is needed.
    pub fn enable_local(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.request_will(option)
    }

    /// Request that we stop performing `option` (send `WONT`).
    pub fn disable_local(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.request_wont(option)
    }

    /// Request that the peer start performing `option` (send `DO`).
    pub fn enable_remote(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.request_do(option)
    }

    /// Request that the peer stop performing `option` (send `DONT`).
    pub fn disable_remote(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        self.request_dont(option)
    }

    /// Process a negotiation frame received from the peer and return the
    /// reply frame to send, if the state machine calls for one.
    pub fn handle_received(&mut self, frame: &TelnetFrame) -> Option<TelnetFrame> {
        match frame {
            TelnetFrame::Do(option) => self.recv_do(*option),
            TelnetFrame::Dont(option) => self.recv_dont(*option),
            TelnetFrame::Will(option) => self.recv_will(*option),
            TelnetFrame::Wont(option) => self.recv_wont(*option),
            _ => None,
        }
    }

    // #### Outgoing requests (what we initiate) ################################

    fn request_will(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        if !option.supported_local() {
            return None;
        }
        let state = &mut self.state[option.to_u8() as usize];
        match state.local {
            // Enabled or already in flight: a second request would violate
            // the Q-Method's one-outstanding-request rule.
            QState::Yes | QState::WantYes | QState::WantYesOpposite => None,
            QState::No => {
                state.local = QState::WantYes;
                Some(TelnetFrame::Will(option))
            }
            QState::WantNo => {
                state.local = QState::WantYesOpposite;
                None
            }
            QState::WantNoOpposite => {
                state.local = QState::WantYes;
                None
            }
        }
    }

    fn request_wont(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let state = &mut self.state[option.to_u8() as usize];
        match state.local {
            QState::No | QState::WantNo | QState::WantNoOpposite => None,
            QState::Yes => {
                state.local = QState::WantNo;
                Some(TelnetFrame::Wont(option))
            }
            QState::WantYes => {
                state.local = QState::WantNoOpposite;
                None
            }
            QState::WantYesOpposite => {
                state.local = QState::WantNo;
                None
            }
        }
    }

    fn request_do(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        if !option.supported_remote() {
            return None;
        }
        let state = &mut self.state[option.to_u8() as usize];
        match state.remote {
            QState::Yes | QState::WantYes | QState::WantYesOpposite => None,
            QState::No => {
                state.remote = QState::WantYes;
                Some(TelnetFrame::Do(option))
            }
            QState::WantNo => {
                state.remote = QState::WantYesOpposite;
                None
            }
            QState::WantNoOpposite => {
                state.remote = QState::WantYes;
                None
            }
        }
    }

    fn request_dont(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let state = &mut self.state[option.to_u8() as usize];
        match state.remote {
            QState::No | QState::WantNo | QState::WantNoOpposite => None,
            QState::Yes => {
                state.remote = QState::WantNo;
                Some(TelnetFrame::Dont(option))
            }
            QState::WantYes => {
                state.remote = QState::WantNoOpposite;
                None
            }
            QState::WantYesOpposite => {
                state.remote = QState::WantNo;
                None
            }
        }
    }

    // #### Incoming processing (peer sent us DO/DONT/WILL/WONT) ################

    fn recv_will(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        if !option.supported_remote() {
            return Some(TelnetFrame::Dont(option));
        }
        let state = &mut self.state[option.to_u8() as usize];
        match state.remote {
            QState::No => {
                // Peer offers; we accept supported options by default.
                state.remote = QState::Yes;
                Some(TelnetFrame::Do(option))
            }
            QState::Yes => None,
            QState::WantNo => {
                // Peer contradicts our in-flight DONT. RFC 1143 treats this
                // as an answer to the wrong question; queue the opposite.
                state.remote = QState::WantNoOpposite;
                None
            }
            QState::WantNoOpposite => {
                state.remote = QState::Yes;
                None
            }
            QState::WantYes => {
                state.remote = QState::Yes;
                None
            }
            QState::WantYesOpposite => {
                state.remote = QState::WantNo;
                Some(TelnetFrame::Dont(option))
            }
        }
    }

    fn recv_wont(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let state = &mut self.state[option.to_u8() as usize];
        match state.remote {
            QState::No => None,
            QState::Yes | QState::WantNo | QState::WantYes => {
                state.remote = QState::No;
                None
            }
            QState::WantNoOpposite => {
                state.remote = QState::WantYes;
                Some(TelnetFrame::Do(option))
            }
            QState::WantYesOpposite => {
                state.remote = QState::No;
                None
            }
        }
    }

    fn recv_do(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        if !option.supported_local() {
            return Some(TelnetFrame::Wont(option));
        }
        let state = &mut self.state[option.to_u8() as usize];
        match state.local {
            QState::No => {
                state.local = QState::Yes;
                Some(TelnetFrame::Will(option))
            }
            QState::Yes => None,
            QState::WantNo => {
                state.local = QState::WantNoOpposite;
                None
            }
            QState::WantNoOpposite => {
                state.local = QState::Yes;
                None
            }
            QState::WantYes => {
                state.local = QState::Yes;
                None
            }
            QState::WantYesOpposite => {
                state.local = QState::WantNo;
                Some(TelnetFrame::Wont(option))
            }
        }
    }

    fn recv_dont(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let state = &mut self.state[option.to_u8() as usize];
        match state.local {
            QState::No => None,
            QState::Yes | QState::WantNo | QState::WantYes => {
                state.local = QState::No;
                None
            }
            QState::WantNoOpposite => {
                state.local = QState::WantYes;
                Some(TelnetFrame::Will(option))
            }
            QState::WantYesOpposite => {
                state.local = QState::No;
                None
            }
        }
    }
}
