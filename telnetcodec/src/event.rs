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

use crate::options::{TelnetOption, TelnetSide};
use crate::subneg::TelnetSubnegotiation;

/// `TelnetEvent` represents user-facing events from the Telnet decoder.
///
/// Negotiation frames (`DO`/`DONT`/`WILL`/`WONT`) are absorbed by the
/// Q-Method state machine; the decoder surfaces only the completed
/// transition as [`TelnetEvent::OptionStatus`], with any required reply
/// queued on the codec for [`TelnetCodec::take_replies`](crate::TelnetCodec::take_replies).
#[derive(Clone, Debug, PartialEq)]
pub enum TelnetEvent {
    /// A cleaned data byte (IAC escaping already undone)
    Data(u8),
    /// A completed negotiation: (option, side, enabled)
    OptionStatus(TelnetOption, TelnetSide, bool),
    /// A completed subnegotiation payload
    Subnegotiation(TelnetSubnegotiation),
}
