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

//! Integration tests for the Telnet codec: round-trips, escaping,
//! negotiation behavior, and malformed-stream handling.

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use wireline_telnetcodec::{
    CodecError, TelnetCodec, TelnetEvent, TelnetOption, TelnetSide, TelnetSubnegotiation,
    WindowSize, consts,
};

// ============================================================================
// Helper functions
// ============================================================================

fn decode_all(codec: &mut TelnetCodec, buffer: &mut BytesMut) -> Vec<TelnetEvent> {
    let mut events = Vec::new();
    while let Some(event) = codec.decode(buffer).unwrap() {
        events.push(event);
    }
    events
}

fn data_bytes(events: &[TelnetEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            TelnetEvent::Data(byte) => Some(*byte),
            _ => None,
        })
        .collect()
}

/// Splits a reply buffer into 3-byte `IAC <verb> <option>` commands.
fn negotiation_commands(bytes: &[u8]) -> Vec<(u8, u8)> {
    bytes
        .chunks(3)
        .filter(|chunk| chunk.len() == 3 && chunk[0] == consts::IAC)
        .map(|chunk| (chunk[1], chunk[2]))
        .collect()
}

// ============================================================================
// Round-trip and escaping
// ============================================================================

#[test]
fn encode_decode_round_trips_without_iac() {
    let payload = b"The quick brown fox\r\njumped over the lazy dog";
    let mut codec = TelnetCodec::new();

    let mut wire = BytesMut::new();
    codec.encode_data(payload, &mut wire);
    assert_eq!(&wire[..], &payload[..]);

    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(data_bytes(&events), payload.to_vec());
}

#[test]
fn iac_escaping_round_trips() {
    let payload = [b'a', 0xFF, b'b', 0xFF, 0xFF];
    let mut codec = TelnetCodec::new();

    let mut wire = BytesMut::new();
    codec.encode_data(&payload, &mut wire);
    assert_eq!(&wire[..], &[b'a', 0xFF, 0xFF, b'b', 0xFF, 0xFF, 0xFF, 0xFF]);

    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(data_bytes(&events), payload.to_vec());
}

#[test]
fn peer_iac_iac_yields_single_literal() {
    let mut codec = TelnetCodec::new();
    let mut wire = BytesMut::from(&[consts::IAC, consts::IAC][..]);
    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(events, vec![TelnetEvent::Data(0xFF)]);
}

#[test]
fn decode_handles_split_buffers() {
    // A negotiation command delivered one byte at a time must decode the
    // same as one delivered whole.
    let mut codec = TelnetCodec::new();
    let wire = [consts::IAC, consts::DO, consts::option::ECHO];

    let mut events = Vec::new();
    for byte in wire {
        let mut chunk = BytesMut::from(&[byte][..]);
        while let Some(event) = codec.decode(&mut chunk).unwrap() {
            events.push(event);
        }
    }
    assert_eq!(
        events,
        vec![TelnetEvent::OptionStatus(
            TelnetOption::Echo,
            TelnetSide::Local,
            true
        )]
    );
}

// ============================================================================
// Negotiation
// ============================================================================

#[test]
fn initial_negotiation_offers_expected_options() {
    let mut codec = TelnetCodec::new();
    let opening = codec.begin_negotiation();
    let commands = negotiation_commands(&opening);

    assert!(commands.contains(&(consts::DO, consts::option::SGA)));
    assert!(commands.contains(&(consts::WILL, consts::option::SGA)));
    assert!(commands.contains(&(consts::WILL, consts::option::ECHO)));
    assert!(commands.contains(&(consts::DO, consts::option::TTYPE)));
    assert!(commands.contains(&(consts::DO, consts::option::NAWS)));
    assert_eq!(commands.len(), 5);
}

#[test]
fn refusal_of_pending_offer_produces_no_counter_offer() {
    let mut codec = TelnetCodec::new();
    codec.begin_negotiation();

    // Client refuses our WILL ECHO.
    let mut wire = BytesMut::from(&[consts::IAC, consts::DONT, consts::option::ECHO][..]);
    decode_all(&mut codec, &mut wire);
    assert!(!codec.local_enabled(TelnetOption::Echo));
    assert_eq!(codec.take_replies(), None);
}

#[test]
fn wont_for_idle_option_is_acknowledged_silently() {
    // Client volunteers IAC WONT ECHO while no request is outstanding on
    // the remote echo path; the server must not answer it.
    let mut codec = TelnetCodec::new();
    codec.begin_negotiation();

    let mut wire = BytesMut::from(&[consts::IAC, consts::WONT, consts::option::ECHO][..]);
    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(events, vec![]);
    assert_eq!(codec.take_replies(), None);
}

#[test]
fn accepted_offer_enables_option_without_extra_traffic() {
    let mut codec = TelnetCodec::new();
    codec.begin_negotiation();

    let mut wire = BytesMut::from(&[consts::IAC, consts::DO, consts::option::ECHO][..]);
    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(
        events,
        vec![TelnetEvent::OptionStatus(
            TelnetOption::Echo,
            TelnetSide::Local,
            true
        )]
    );
    assert!(codec.local_enabled(TelnetOption::Echo));
    // DO answered our outstanding WILL; nothing further to send.
    assert_eq!(codec.take_replies(), None);
}

#[test]
fn unsolicited_will_ttype_triggers_send_request() {
    let mut codec = TelnetCodec::new();
    codec.begin_negotiation();
    // Drain the opening state: our DO TTYPE is already in flight.
    let mut wire = BytesMut::from(&[consts::IAC, consts::WILL, consts::option::TTYPE][..]);
    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(
        events,
        vec![TelnetEvent::OptionStatus(
            TelnetOption::TerminalType,
            TelnetSide::Remote,
            true
        )]
    );

    // The codec queues IAC SB TTYPE SEND IAC SE for the session to flush.
    let replies = codec.take_replies().expect("SEND request queued");
    assert_eq!(
        &replies[..],
        &[
            consts::IAC,
            consts::SB,
            consts::option::TTYPE,
            consts::ttype::SEND,
            consts::IAC,
            consts::SE
        ]
    );
}

#[test]
fn unknown_option_is_refused() {
    let mut codec = TelnetCodec::new();
    let mut wire = BytesMut::from(&[consts::IAC, consts::WILL, 200][..]);
    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(events, vec![]);

    let replies = codec.take_replies().expect("refusal queued");
    assert_eq!(&replies[..], &[consts::IAC, consts::DONT, 200]);
}

// ============================================================================
// Subnegotiation
// ============================================================================

#[test]
fn naws_subnegotiation_yields_window_size() {
    let mut codec = TelnetCodec::new();
    let mut wire = BytesMut::from(
        &[
            consts::IAC,
            consts::SB,
            consts::option::NAWS,
            0x00,
            0x78, // 120 cols
            0x00,
            0x28, // 40 rows
            consts::IAC,
            consts::SE,
        ][..],
    );
    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(
        events,
        vec![TelnetEvent::Subnegotiation(TelnetSubnegotiation::WindowSize(
            WindowSize::new(120, 40)
        ))]
    );
}

#[test]
fn terminal_type_is_yields_name() {
    let mut payload = vec![consts::IAC, consts::SB, consts::option::TTYPE, 0x00];
    payload.extend_from_slice(b"xterm-256color");
    payload.extend_from_slice(&[consts::IAC, consts::SE]);

    let mut codec = TelnetCodec::new();
    let mut wire = BytesMut::from(&payload[..]);
    let events = decode_all(&mut codec, &mut wire);
    assert_eq!(
        events,
        vec![TelnetEvent::Subnegotiation(
            TelnetSubnegotiation::TerminalTypeIs("xterm-256color".into())
        )]
    );
}

#[test]
fn subnegotiation_without_terminator_errors_at_bound() {
    let mut codec = TelnetCodec::new();
    let mut wire = BytesMut::new();
    wire.extend_from_slice(&[consts::IAC, consts::SB, consts::option::TTYPE]);
    wire.extend_from_slice(&[b'x'; 1100]); // never sends IAC SE

    let mut result = Ok(None);
    while !wire.is_empty() {
        result = codec.decode(&mut wire);
        if result.is_err() {
            break;
        }
    }
    match result {
        Err(CodecError::SubnegotiationOverflow { option, limit }) => {
            assert_eq!(option, consts::option::TTYPE);
            assert_eq!(limit, 1024);
        }
        other => panic!("expected overflow error, got {other:?}"),
    }
}

#[test]
fn escaped_iac_inside_subnegotiation_is_unescaped() {
    let mut codec = TelnetCodec::new();
    let mut wire = BytesMut::from(
        &[
            consts::IAC,
            consts::SB,
            199, // unknown option, payload passed through
            0x01,
            consts::IAC,
            consts::IAC,
            0x02,
            consts::IAC,
            consts::SE,
        ][..],
    );
    let events = decode_all(&mut codec, &mut wire);
    match &events[..] {
        [TelnetEvent::Subnegotiation(TelnetSubnegotiation::Unknown(option, payload))] => {
            assert_eq!(*option, TelnetOption::Unknown(199));
            assert_eq!(&payload[..], &[0x01, 0xFF, 0x02]);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}
