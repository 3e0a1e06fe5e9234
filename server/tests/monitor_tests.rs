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

//! WebSocket transport and monitor endpoint tests.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use wireline_server::transport::WsEndpoint;
use wireline_server::{
    HandlerRegistry, MonitorBus, MonitorEvent, Server, ServerConfig, SessionConfig, TransportKind,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const IAC: u8 = 255;

fn ws_config(transport: TransportKind, allow_origins: Vec<String>) -> ServerConfig {
    let registry = HandlerRegistry::with_defaults();
    ServerConfig {
        name: "ws-test".to_string(),
        transport,
        listen: "127.0.0.1:0".to_string(),
        max_connections: 100,
        session: SessionConfig::default(),
        handler_factory: registry.get("echo").unwrap(),
        ws: Some(WsEndpoint {
            session_path: "/ws".to_string(),
            monitor_path: Some("/monitor".to_string()),
            allow_origins,
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            binary_frames: transport == TransportKind::WsTelnet,
            max_frame_bytes: 1024 * 1024,
        }),
        tls: None,
        shutdown_timeout: Duration::from_secs(10),
    }
}

async fn start_ws_server(transport: TransportKind) -> Arc<Server> {
    let config = ws_config(transport, vec!["*".to_string()]);
    let server = Server::bind(config, MonitorBus::new()).await.unwrap();
    server.start().await.unwrap();
    server
}

async fn connect(server: &Server, path: &str) -> WsClient {
    let url = format!("ws://{}{path}", server.local_addr());
    let (ws, _) = connect_async(url).await.expect("websocket connect");
    ws
}

/// Next text frame parsed as a monitor event, under a deadline.
async fn next_event(ws: &mut WsClient) -> MonitorEvent {
    loop {
        let message = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("event within deadline")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("valid monitor json");
        }
    }
}

/// Collects every monitor event arriving within `window`.
async fn drain_events(ws: &mut WsClient, window: Duration) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return events;
        }
        match timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                events.push(serde_json::from_str(&text).expect("valid monitor json"));
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) | Ok(None) | Err(_) => return events,
        }
    }
}

fn session_number(id: &str) -> u64 {
    id.trim_start_matches("sess-").parse().unwrap()
}

// ============================================================================
// WebSocket sessions
// ============================================================================

#[tokio::test]
async fn websocket_session_echoes_text_frames() {
    let server = start_ws_server(TransportKind::WebSocket).await;
    let mut client = connect(&server, "/ws").await;

    client
        .send(Message::Text("hello\n".to_string()))
        .await
        .unwrap();

    let mut received = String::new();
    while !received.contains("> ") {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("response within deadline")
            .unwrap()
            .unwrap();
        match message {
            Message::Text(text) => received.push_str(&text),
            Message::Binary(bytes) => received.push_str(&String::from_utf8_lossy(&bytes)),
            _ => {}
        }
    }
    assert_eq!(received, "Echo: hello\r\n> ");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn ws_telnet_negotiates_in_binary_frames() {
    let server = start_ws_server(TransportKind::WsTelnet).await;
    let mut client = connect(&server, "/ws").await;

    let first = timeout(Duration::from_secs(2), client.next())
        .await
        .expect("negotiation within deadline")
        .unwrap()
        .unwrap();
    match first {
        Message::Binary(bytes) => {
            assert_eq!(bytes.first(), Some(&IAC), "negotiation leads with IAC");
            assert_eq!(bytes.len() % 3, 0, "whole option commands");
        }
        other => panic!("expected binary negotiation frame, got {other:?}"),
    }

    client
        .send(Message::Binary(b"hi\r\n".to_vec()))
        .await
        .unwrap();
    let mut received = String::new();
    while !received.contains("> ") {
        let message = timeout(Duration::from_secs(3), client.next())
            .await
            .expect("response within deadline")
            .unwrap()
            .unwrap();
        if let Message::Binary(bytes) = message {
            received.push_str(&String::from_utf8_lossy(&bytes));
        }
    }
    assert!(received.contains("Echo: hi\r\n"), "got: {received:?}");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn disallowed_origin_is_rejected_with_403() {
    let config = ws_config(
        TransportKind::WebSocket,
        vec!["http://app.example".to_string()],
    );
    let server = Server::bind(config, MonitorBus::new()).await.unwrap();
    server.start().await.unwrap();

    let url = format!("ws://{}/ws", server.local_addr());
    let mut request = url.clone().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://evil.example".parse().unwrap());

    match connect_async(request).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 403);
        }
        other => panic!("expected HTTP 403 rejection, got {other:?}"),
    }
    assert_eq!(server.session_count(), 0, "no session for rejected origin");

    // A listed origin connects fine.
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://app.example".parse().unwrap());
    let (mut ws, _) = connect_async(request).await.expect("allowed origin");
    ws.close(None).await.unwrap();

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_path_is_rejected() {
    let server = start_ws_server(TransportKind::WebSocket).await;
    let url = format!("ws://{}/nowhere", server.local_addr());
    match connect_async(url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("expected HTTP 404 rejection, got {other:?}"),
    }
    server.shutdown().await.unwrap();
}

// ============================================================================
// Scenario: monitor fan-out
// ============================================================================

#[tokio::test]
async fn monitor_fan_out_watches_one_session() {
    let server = start_ws_server(TransportKind::WebSocket).await;

    let mut s1 = connect(&server, "/ws").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut s2 = connect(&server, "/ws").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut observer = connect(&server, "/monitor").await;

    // Snapshot lists both; the younger one carries is_newest.
    let (s1_id, s2_id) = match next_event(&mut observer).await {
        MonitorEvent::ActiveSessions { mut sessions } => {
            assert_eq!(sessions.len(), 2);
            sessions.sort_by_key(|session| session_number(&session.id));
            assert!(!sessions[0].is_newest);
            assert!(sessions[1].is_newest);
            (sessions[0].id.clone(), sessions[1].id.clone())
        }
        other => panic!("expected active_sessions, got {other:?}"),
    };

    observer
        .send(Message::Text(format!(
            r#"{{"type":"watch_session","session_id":"{s1_id}"}}"#
        )))
        .await
        .unwrap();
    match next_event(&mut observer).await {
        MonitorEvent::WatchResponse {
            session_id, status, ..
        } => {
            assert_eq!(session_id, s1_id);
            assert_eq!(status, "success");
        }
        other => panic!("expected watch_response, got {other:?}"),
    }

    s1.send(Message::Text("hello\n".to_string())).await.unwrap();
    s2.send(Message::Text("quiet\n".to_string())).await.unwrap();

    let events = drain_events(&mut observer, Duration::from_millis(500)).await;
    let mut saw_input = false;
    for event in &events {
        match event {
            MonitorEvent::ClientInput { session_id, data } => {
                assert_eq!(session_id, &s1_id, "input from unwatched session leaked");
                assert_eq!(data.text, "hello");
                saw_input = true;
            }
            MonitorEvent::ServerMessage { session_id, .. } => {
                assert_eq!(session_id, &s1_id, "output from unwatched session leaked");
            }
            _ => {}
        }
    }
    assert!(saw_input, "watched session's input must be observed");

    // stop_watching is idempotent, even for a session never watched.
    observer
        .send(Message::Text(format!(
            r#"{{"type":"stop_watching","session_id":"{s2_id}"}}"#
        )))
        .await
        .unwrap();
    match next_event(&mut observer).await {
        MonitorEvent::WatchResponse { status, error, .. } => {
            assert_eq!(status, "stopped");
            assert!(error.is_none());
        }
        other => panic!("expected watch_response, got {other:?}"),
    }

    // Ending a session reaches every subscriber.
    s2.close(None).await.unwrap();
    let events = drain_events(&mut observer, Duration::from_millis(500)).await;
    assert!(
        events
            .iter()
            .any(|event| matches!(event, MonitorEvent::SessionEnded { session } if session.id == s2_id)),
        "session_ended for s2 not observed: {events:?}"
    );

    server.shutdown().await.unwrap();
}
