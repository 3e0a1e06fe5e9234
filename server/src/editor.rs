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

//! Character-at-a-time line editor.
//!
//! Consumes cleaned bytes (Telnet stripping already done a layer down) and
//! assembles whole lines, handling local echo, backspace, CR/LF folding,
//! and the control keys. Lines are decoded as UTF-8 with invalid sequences
//! replaced by U+FFFD; assembly never fails the pipeline.

use bytes::{BufMut, BytesMut};

const BS: u8 = 0x08;
const DEL: u8 = 0x7F;
const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const NUL: u8 = 0x00;
const CR: u8 = 0x0D;
const LF: u8 = 0x0A;

/// The default prompt written after each handler response.
pub const DEFAULT_PROMPT: &str = "> ";

/// Events produced by feeding bytes to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete line, without its terminator
    Line(String),
    /// Ctrl-C: terminate the session
    Interrupt,
    /// Ctrl-D on an empty buffer: orderly close
    EndOfInput,
}

/// Line assembly state for one session.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: Vec<u8>,
    echo: bool,
    /// A CR was just consumed; swallow one following LF or NUL.
    pending_cr: bool,
}

impl LineEditor {
    /// Creates an editor with echo disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables local echo. Echo is turned on once the peer
    /// accepts `WILL ECHO` and off again if the option is disabled.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Whether local echo is currently on.
    pub fn echo(&self) -> bool {
        self.echo
    }

    /// Bytes currently accumulated toward the next line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Feeds one byte. Echo bytes for the client, if any, are appended to
    /// `echo_out`; a completed line or control action is returned.
    pub fn feed(&mut self, byte: u8, echo_out: &mut BytesMut) -> Option<LineEvent> {
        if self.pending_cr {
            self.pending_cr = false;
            // CR LF and CR NUL both terminated with the CR itself.
            if byte == LF || byte == NUL {
                return None;
            }
        }

        match byte {
            CR => {
                self.pending_cr = true;
                if self.echo {
                    echo_out.put_slice(b"\r\n");
                }
                Some(LineEvent::Line(self.take_line()))
            }
            LF => {
                if self.echo {
                    echo_out.put_slice(b"\r\n");
                }
                Some(LineEvent::Line(self.take_line()))
            }
            BS | DEL => {
                if self.pop_char() && self.echo {
                    echo_out.put_slice(b"\x08 \x08");
                }
                None
            }
            CTRL_C => Some(LineEvent::Interrupt),
            CTRL_D if self.buffer.is_empty() => Some(LineEvent::EndOfInput),
            byte if (0x20..0x7F).contains(&byte) || byte >= 0xA0 => {
                self.buffer.push(byte);
                if self.echo {
                    echo_out.put_u8(byte);
                }
                None
            }
            _ => None, // other control bytes are dropped
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Drops the last character, stepping back over UTF-8 continuation
    /// bytes. Returns false on an empty buffer.
    fn pop_char(&mut self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        while let Some(byte) = self.buffer.pop() {
            // Stop once a non-continuation byte has been removed.
            if byte & 0xC0 != 0x80 {
                break;
            }
        }
        true
    }
}
